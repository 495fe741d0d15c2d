//! 调用系统文件管理器 / 默认应用

use anyhow::{Context, Result, bail};
use landrop_core::FileAction;
use std::path::Path;
use tokio::process::Command;

/// 执行总线上请求的文件动作；打开失败时退回到在文件管理器中显示
pub async fn perform(path: &Path, action: FileAction) -> Result<()> {
    match action {
        FileAction::Open => match open_file(path) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Open failed for {:?}: {:#}, showing in file manager", path, e);
                show_in_file_manager(path)
            }
        },
        FileAction::Show => show_in_file_manager(path),
        FileAction::OpenFolder => open_folder(path).await,
    }
}

pub async fn open_folder(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot access directory {}", path.display()))?;
    if !metadata.is_dir() {
        bail!("path is not a directory: {}", path.display());
    }
    let path = std::path::absolute(path)?;

    #[cfg(target_os = "windows")]
    let mut cmd = Command::new("explorer");
    #[cfg(target_os = "macos")]
    let mut cmd = Command::new("open");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let mut cmd = Command::new("xdg-open");

    cmd.arg(&path);
    spawn(cmd)
}

pub fn open_file(path: &Path) -> Result<()> {
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut cmd = Command::new("rundll32");
        cmd.arg("url.dll,FileProtocolHandler");
        cmd
    };
    #[cfg(target_os = "macos")]
    let mut cmd = Command::new("open");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let mut cmd = Command::new("xdg-open");

    cmd.arg(path);
    spawn(cmd)
}

pub fn show_in_file_manager(path: &Path) -> Result<()> {
    #[cfg(target_os = "windows")]
    let cmd = {
        let mut cmd = Command::new("explorer");
        cmd.arg("/select,").arg(path);
        cmd
    };
    #[cfg(target_os = "macos")]
    let cmd = {
        let mut cmd = Command::new("open");
        cmd.arg("-R").arg(path);
        cmd
    };
    // 没有统一的“选中文件”协议，打开所在目录
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let cmd = {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path.parent().unwrap_or(path));
        cmd
    };

    spawn(cmd)
}

fn spawn(mut cmd: Command) -> Result<()> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;

    // 回收子进程，不阻塞调用方
    tokio::spawn(async move {
        if let Err(e) = child.wait().await {
            tracing::debug!("{} exited abnormally: {}", program, e);
        }
    });
    Ok(())
}
