//! 内置的浏览器端页面

pub const INDEX_HTML: &str = include_str!("../../static/index.html");

const BUNDLED: &[(&str, &str)] = &[
    ("app.js", include_str!("../../static/app.js")),
    ("style.css", include_str!("../../static/style.css")),
];

pub struct Asset {
    pub content_type: String,
    pub body: &'static str,
}

/// 按 `/static/` 之后的路径查找内置资源
pub fn lookup(path: &str) -> Option<Asset> {
    let path = path.trim_start_matches('/');
    BUNDLED
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(name, body)| Asset {
            content_type: mime_guess::from_path(name)
                .first_or_text_plain()
                .essence_str()
                .to_string(),
            body,
        })
}
