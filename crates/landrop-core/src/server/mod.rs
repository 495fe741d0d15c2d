//! HTTP 服务
//!
//! # 路由
//!
//! - `GET /`、`GET /static/*path` 内置网页
//! - `GET /version` 版本号
//! - `POST /upload` multipart 上传到上传目录
//! - `POST /delete` 删除上传目录中的文件
//! - `GET /files`、`GET /download` 浏览和下载共享目录（需开启下载）
//! - `GET /signaling` WebRTC 信令 WebSocket

mod assets;
pub mod handlers;

pub use handlers::{BrowseResponse, FileInfo};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::config::Preferences;
use crate::signaling::PeerNegotiator;
use crate::status::StatusBus;
use crate::transfer::TransferEngine;

/// 停止时等待服务任务退出的上限
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 处理器共享的状态
pub struct AppState {
    /// 服务启动时的偏好快照
    pub prefs: Arc<Preferences>,
    pub version: String,
    pub bus: StatusBus,
    pub negotiator: Arc<dyn PeerNegotiator>,
}

impl AppState {
    /// 使用 WebRTC 传输引擎作为信令的协商方
    pub fn new(prefs: Arc<Preferences>, version: impl Into<String>, bus: StatusBus) -> anyhow::Result<Self> {
        let engine = TransferEngine::new(Arc::clone(&prefs), bus.clone())?;
        Ok(Self::with_negotiator(prefs, version, bus, Arc::new(engine)))
    }

    pub fn with_negotiator(
        prefs: Arc<Preferences>,
        version: impl Into<String>,
        bus: StatusBus,
        negotiator: Arc<dyn PeerNegotiator>,
    ) -> Self {
        Self {
            prefs,
            version: version.into(),
            bus,
            negotiator,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/static/*path", get(handlers::static_asset))
        .route("/version", get(handlers::version))
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/delete", post(handlers::delete))
        .route("/files", get(handlers::browse))
        .route("/download", get(handlers::download))
        .route("/signaling", get(handlers::signaling))
        .with_state(state)
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct ControllerInner {
    prefs: Preferences,
    running: Option<RunningServer>,
}

/// 服务生命周期管理
///
/// `start` / `stop` / `update` 在同一把锁下串行执行，
/// 重启时先完整停掉旧服务再绑定新端口。
pub struct ServerController {
    version: String,
    bus: StatusBus,
    inner: Mutex<ControllerInner>,
}

impl ServerController {
    pub fn new(prefs: Preferences, version: impl Into<String>, bus: StatusBus) -> Self {
        Self {
            version: version.into(),
            bus,
            inner: Mutex::new(ControllerInner {
                prefs,
                running: None,
            }),
        }
    }

    /// 启动服务；已在运行时会先停止再重新启动
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// 修改端口和上传目录后重启
    pub async fn update(&self, port: u16, upload_dir: PathBuf) -> anyhow::Result<SocketAddr> {
        let mut inner = self.inner.lock().await;
        inner.prefs.port = port;
        inner.prefs.upload_dir = upload_dir;
        self.start_locked(&mut inner).await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.running.as_ref().map(|r| r.addr)
    }

    pub async fn preferences(&self) -> Preferences {
        self.inner.lock().await.prefs.clone()
    }

    async fn start_locked(&self, inner: &mut ControllerInner) -> anyhow::Result<SocketAddr> {
        self.stop_locked(inner).await;

        if let Err(e) = tokio::fs::create_dir_all(&inner.prefs.upload_dir).await {
            warn!(
                "Failed to create upload directory {:?}: {}",
                inner.prefs.upload_dir, e
            );
        }

        let prefs = Arc::new(inner.prefs.clone());
        let state = Arc::new(AppState::new(prefs, self.version.clone(), self.bus.clone())?);
        let app = router(state);

        let listener = TcpListener::bind(("0.0.0.0", inner.prefs.port)).await?;
        let addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let bus = self.bus.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("Server error: {}", e);
                bus.report(format!("Server stopped: {}", e));
            }
        });

        info!("HTTP server bound to {}", addr);
        self.bus
            .report(format!("Server listening on port {}", addr.port()));

        inner.running = Some(RunningServer {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    async fn stop_locked(&self, inner: &mut ControllerInner) {
        let Some(running) = inner.running.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        let mut task = running.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Server on {} did not stop in time, aborting", running.addr);
            task.abort();
        }
        self.bus.report("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_prefs(dir: &TempDir) -> Preferences {
        Preferences {
            port: 0,
            upload_dir: dir.path().join("uploads"),
            shared_dir: dir.path().join("shared"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_reports_and_binds_ephemeral_port() {
        let dir = TempDir::new().unwrap();
        let bus = StatusBus::new();
        let mut events = bus.subscribe();
        let controller = ServerController::new(test_prefs(&dir), "1.0.0", bus);

        let addr = controller.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(controller.local_addr().await, Some(addr));
        assert!(dir.path().join("uploads").is_dir());

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            crate::status::StatusEvent::Status(format!("Server listening on port {}", addr.port()))
        );

        controller.stop().await;
        assert_eq!(controller.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_update_restarts_with_new_upload_dir() {
        let dir = TempDir::new().unwrap();
        let controller = ServerController::new(test_prefs(&dir), "1.0.0", StatusBus::new());
        controller.start().await.unwrap();

        let new_dir = dir.path().join("elsewhere");
        controller.update(0, new_dir.clone()).await.unwrap();

        assert_eq!(controller.preferences().await.upload_dir, new_dir);
        assert!(controller.local_addr().await.is_some());
        assert!(new_dir.is_dir());

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let controller = ServerController::new(test_prefs(&dir), "1.0.0", StatusBus::new());
        controller.stop().await;
        assert!(controller.local_addr().await.is_none());
    }
}
