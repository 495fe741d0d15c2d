//! 文件动作分类

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "svg"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf", "pages"];

/// 收到文件后可以执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// 用默认程序打开
    Open,
    /// 在文件管理器中显示
    Show,
    /// 打开整个目录
    OpenFolder,
}

impl FileAction {
    pub fn name(&self) -> &'static str {
        match self {
            FileAction::Open => "open",
            FileAction::Show => "show",
            FileAction::OpenFolder => "open_folder",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 图片和文档直接打开，其余在文件管理器中显示
///
/// 扩展名区分大小写。
pub fn best_action_for(path: &Path) -> FileAction {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if IMAGE_EXTENSIONS.contains(&ext) || DOCUMENT_EXTENSIONS.contains(&ext) {
        FileAction::Open
    } else {
        FileAction::Show
    }
}

/// 状态栏显示用的短文件名：超过 10 个字符时保留前 7 个加省略号
pub fn display_name(name: &str) -> String {
    if name.chars().count() > 10 {
        let head: String = name.chars().take(7).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}
