//! 根目录包含检查
//!
//! 按路径分量比较而不是按字符串前缀比较：`/data/shared-other`
//! 不在 `/data/shared` 之内。

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    /// 目标位于根目录之外
    #[error("path escapes its root directory")]
    Escape,
    /// 请求的路径无法解析
    #[error("path cannot be resolved: {0}")]
    Unresolvable(String),
    /// 根目录本身不可访问
    #[error("root directory is not accessible: {0}")]
    Root(#[from] io::Error),
}

/// 把客户端给出的相对路径解析到 `root` 之下
///
/// 根目录和目标都先规范化为绝对路径；目标存在时还会跟随符号链接再检查一次。
/// 返回词法规范化后的路径（不跟随最后一级符号链接），目标不存在时同样返回，
/// 由调用方决定 404。
pub fn contained_path(root: &Path, requested: &str) -> Result<PathBuf, PathError> {
    if requested.contains('\0') {
        return Err(PathError::Unresolvable("path contains a NUL byte".into()));
    }

    let root = root.canonicalize()?;
    let joined = root.join(requested);
    let normalized = normalize(&joined).ok_or(PathError::Escape)?;

    if !normalized.starts_with(&root) {
        return Err(PathError::Escape);
    }

    match normalized.canonicalize() {
        Ok(real) if real.starts_with(&root) => Ok(normalized),
        Ok(_) => Err(PathError::Escape),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(normalized),
        Err(e) => Err(PathError::Unresolvable(e.to_string())),
    }
}

/// 词法清理客户端给出的路径，用于在列表中拼出子项的相对路径
///
/// 只应用于已经通过 [`contained_path`] 检查的请求；`.`、`./`、`sub/..`
/// 都清理为空路径。
pub fn clean_relative(requested: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 词法消去 `.` 和 `..`，越过文件系统根时返回 `None`
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}
