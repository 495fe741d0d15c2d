//! LAN-Drop Daemon
//!
//! 后台守护进程，负责：
//! - HTTP 上传/下载与 WebRTC 信令服务
//! - 记录状态总线事件，执行打开文件 / 显示文件等动作
//! - 通过 Unix Socket 接受设置界面的控制请求

mod events;
#[cfg(unix)]
mod ipc;
mod opener;

use anyhow::Result;
use clap::Parser;
use landrop_core::net::share_url;
use landrop_core::{Preferences, ServerController, StatusBus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "landrop-daemon", version, about = "LAN-Drop file drop service")]
struct Args {
    /// 设置文件路径（默认 <config_dir>/landrop/settings.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP 端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 接收文件的目录
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// 共享给浏览器下载的目录
    #[arg(long)]
    shared_dir: Option<PathBuf>,

    /// 开放共享目录的浏览和下载
    #[arg(long)]
    enable_downloads: bool,

    /// 控制 socket 路径
    #[arg(long)]
    socket: Option<PathBuf>,
}

impl Args {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Preferences::config_path)
    }

    /// 命令行参数覆盖设置文件
    fn apply(&self, prefs: &mut Preferences) {
        if let Some(port) = self.port {
            prefs.port = port;
        }
        if let Some(dir) = &self.upload_dir {
            prefs.upload_dir = dir.clone();
        }
        if let Some(dir) = &self.shared_dir {
            prefs.shared_dir = dir.clone();
        }
        if self.enable_downloads {
            prefs.enable_downloads = true;
        }
    }
}

/// 控制端共享的守护进程状态
pub struct Daemon {
    pub controller: ServerController,
    /// 通过控制端修改的设置写回这里
    pub config_path: Option<PathBuf>,
    pub shutdown: Notify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 桥接 log crate（landrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,landrop_core=debug")),
        )
        .try_init();

    tracing::info!("LAN-Drop Daemon starting...");

    let config_path = args.config_path();
    let mut prefs = Preferences::load_from(&config_path);
    args.apply(&mut prefs);
    if let Err(e) = prefs.ensure_dirs() {
        tracing::warn!("Failed to create LAN-Drop directories: {:#}", e);
    }

    let bus = StatusBus::new();
    let events_handle = tokio::spawn(events::run_event_loop(bus.clone()));

    let daemon = Arc::new(Daemon {
        controller: ServerController::new(prefs, env!("CARGO_PKG_VERSION"), bus),
        config_path: Some(config_path),
        shutdown: Notify::new(),
    });

    let addr = daemon.controller.start().await?;
    tracing::info!("Open {} in a browser on the same network", share_url(addr.port()));

    #[cfg(unix)]
    let ipc_handle = {
        let path = args.socket.clone().unwrap_or_else(ipc::socket_path);
        tokio::spawn(ipc::run_ipc_server(Arc::clone(&daemon), path))
    };
    #[cfg(not(unix))]
    let ipc_handle = {
        tracing::info!("Control socket is not available on this platform");
        tokio::spawn(std::future::pending::<Result<()>>())
    };

    // 等待退出信号或任一任务结束
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
        _ = daemon.shutdown.notified() => {
            tracing::info!("Shutdown requested over IPC");
        }
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        res = events_handle => {
            tracing::error!("Status listener exited: {:?}", res);
        }
    }

    daemon.controller.stop().await;
    Ok(())
}
