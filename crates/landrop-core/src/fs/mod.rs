//! 文件系统辅助
//!
//! - 不冲突的保存路径 (`name.ext` → `name_1.ext` → `name_2.ext` …)
//! - 根目录包含检查
//!
//! 两条接收路径（HTTP 上传和 WebRTC 数据通道）都经由这里写盘。

mod containment;

pub use containment::{PathError, clean_relative, contained_path};

use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// 客户端文件名为空时使用的名字
pub const FALLBACK_FILE_NAME: &str = "unnamed";

const MAX_CREATE_ATTEMPTS: usize = 64;

/// 只保留客户端文件名的最后一段，去掉任何目录部分
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace('\0', "");
    match last.as_str() {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        _ => last,
    }
}

/// 在 `root` 下为 `desired` 选择一个当前不存在的路径
///
/// 不存在冲突时原样返回 `root/desired`，否则依次尝试 `base_1.ext`、`base_2.ext` …
/// 直到找到空位。检查和创建之间没有加锁，需要原子性时使用 [`create_unique`]。
pub fn resolve_save_path(root: &Path, desired: &str) -> PathBuf {
    let candidate = root.join(desired);
    if !entry_exists(&candidate) {
        return candidate;
    }

    let (base, ext) = split_name(desired);
    let mut i: u64 = 1;
    loop {
        let candidate = root.join(format!("{}_{}{}", base, i, ext));
        if !entry_exists(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// 解析安全路径并以独占方式创建文件
///
/// 另一个写入方在检查之后抢先创建了同名文件时重新解析，
/// 因此并发上传同名文件不会互相覆盖。
pub async fn create_unique(root: &Path, file_name: &str) -> io::Result<(PathBuf, File)> {
    let name = sanitize_file_name(file_name);

    for _ in 0..MAX_CREATE_ATTEMPTS {
        let path = resolve_save_path(root, &name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Lost create race for {:?}, retrying", path);
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} after {} attempts", name, MAX_CREATE_ATTEMPTS),
    ))
}

// 悬空的符号链接也算占用，否则创建会顺着链接写到别处
fn entry_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => (
            stem.to_string_lossy().into_owned(),
            format!(".{}", ext.to_string_lossy()),
        ),
        _ => (name.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_no_collision_returns_desired_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_save_path(dir.path(), "test.txt"),
            dir.path().join("test.txt")
        );
    }

    #[test]
    fn test_collisions_probe_sequential_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        assert_eq!(resolve_save_path(dir.path(), "a.txt"), dir.path().join("a_1.txt"));

        fs::write(dir.path().join("a_1.txt"), b"x").unwrap();
        assert_eq!(resolve_save_path(dir.path(), "a.txt"), dir.path().join("a_2.txt"));
    }

    #[test]
    fn test_gap_in_suffixes_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        fs::write(dir.path().join("a_2.txt"), b"x").unwrap();
        assert_eq!(resolve_save_path(dir.path(), "a.txt"), dir.path().join("a_1.txt"));
    }

    #[test]
    fn test_only_last_extension_is_split() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("backup.tar.gz"), b"x").unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        fs::write(dir.path().join(".env"), b"x").unwrap();

        assert_eq!(
            resolve_save_path(dir.path(), "backup.tar.gz"),
            dir.path().join("backup.tar_1.gz")
        );
        assert_eq!(resolve_save_path(dir.path(), "README"), dir.path().join("README_1"));
        assert_eq!(resolve_save_path(dir.path(), ".env"), dir.path().join(".env_1"));
    }

    #[test]
    fn test_directory_counts_as_collision() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("photos")).unwrap();
        assert_eq!(resolve_save_path(dir.path(), "photos"), dir.path().join("photos_1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_counts_as_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join("link.txt")).unwrap();
        assert_eq!(
            resolve_save_path(dir.path(), "link.txt"),
            dir.path().join("link_1.txt")
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\fakepath\\photo.png"), "photo.png");
        assert_eq!(sanitize_file_name("/abs/dir/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn test_create_unique_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"original").unwrap();

        let (path, _file) = create_unique(dir.path(), "a.txt").await.unwrap();
        assert_eq!(path, dir.path().join("a_1.txt"));
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_create_unique_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _file) = create_unique(dir.path(), "../escape.txt").await.unwrap();
        assert_eq!(path, dir.path().join("escape.txt"));
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let root = root.clone();
            handles.push(tokio::spawn(async move {
                create_unique(&root, "same.bin").await.unwrap().0
            }));
        }

        let mut paths = Vec::new();
        for h in handles {
            paths.push(h.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }
}
