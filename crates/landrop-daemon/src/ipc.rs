//! IPC Server - Unix Domain Socket 通信
//!
//! 每行一个 JSON 请求，每行一个 JSON 响应，供外部设置界面查询和控制服务。

use anyhow::Result;
use landrop_core::net::share_url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::Daemon;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("landrop.sock")
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "stop")]
    Stop,
    /// 修改端口 / 上传目录，保存设置并重启服务
    #[serde(rename = "update")]
    Update {
        port: Option<u16>,
        upload_dir: Option<PathBuf>,
    },
    /// 退出守护进程
    #[serde(rename = "shutdown")]
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "status")]
    Status {
        running: bool,
        port: u16,
        url: Option<String>,
        upload_dir: PathBuf,
        shared_dir: PathBuf,
        enable_downloads: bool,
    },
}

pub async fn run_ipc_server(daemon: Arc<Daemon>, path: PathBuf) -> Result<()> {
    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(daemon, stream).await {
                        tracing::debug!("IPC client error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn handle_client(daemon: Arc<Daemon>, stream: UnixStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                tracing::debug!("IPC request: {:?}", request);
                handle_request(&daemon, request).await
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
        line.clear();
    }

    Ok(())
}

pub async fn handle_request(daemon: &Daemon, request: IpcRequest) -> IpcResponse {
    let controller = &daemon.controller;
    match request {
        IpcRequest::Status => {
            let prefs = controller.preferences().await;
            let addr = controller.local_addr().await;
            IpcResponse::Status {
                running: addr.is_some(),
                port: addr.map_or(prefs.port, |a| a.port()),
                url: addr.map(|a| share_url(a.port())),
                upload_dir: prefs.upload_dir,
                shared_dir: prefs.shared_dir,
                enable_downloads: prefs.enable_downloads,
            }
        }
        IpcRequest::Start => match controller.start().await {
            Ok(addr) => IpcResponse::Ok {
                message: format!("Server listening on port {}", addr.port()),
            },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to start server: {:#}", e),
            },
        },
        IpcRequest::Stop => {
            controller.stop().await;
            IpcResponse::Ok {
                message: "Server stopped".to_string(),
            }
        }
        IpcRequest::Update { port, upload_dir } => {
            let current = controller.preferences().await;
            let port = port.unwrap_or(current.port);
            let upload_dir = upload_dir.unwrap_or(current.upload_dir);

            let result = controller.update(port, upload_dir).await;
            save_preferences(daemon, &controller.preferences().await);
            match result {
                Ok(addr) => IpcResponse::Ok {
                    message: format!("Server listening on port {}", addr.port()),
                },
                Err(e) => IpcResponse::Error {
                    message: format!("Failed to restart server: {:#}", e),
                },
            }
        }
        IpcRequest::Shutdown => {
            daemon.shutdown.notify_one();
            IpcResponse::Ok {
                message: "Shutting down".to_string(),
            }
        }
    }
}

fn save_preferences(daemon: &Daemon, prefs: &landrop_core::Preferences) {
    let Some(path) = daemon.config_path.as_deref() else {
        return;
    };
    if let Err(e) = prefs.save_to(path) {
        tracing::warn!("Failed to save preferences to {}: {:#}", path.display(), e);
    }
}
