//! LAN-Drop Core Library
//!
//! 局域网内桌面主机与浏览器之间的文件互传
//!
//! # 模块
//!
//! - **fs**: 防冲突的保存路径、目录包含检查
//! - **server**: HTTP 上传/下载/删除/浏览、服务生命周期
//! - **signaling**: WebSocket 信令中继
//! - **transfer**: WebRTC 数据通道分块传输
//! - **status**: 状态与通知总线
//! - **config**: 用户偏好
//!
//! # 使用示例
//!
//! ```ignore
//! use landrop_core::{Preferences, ServerController, StatusBus, StatusEvent};
//!
//! let bus = StatusBus::new();
//! let mut events = bus.subscribe();
//!
//! let controller = ServerController::new(Preferences::load(), env!("CARGO_PKG_VERSION"), bus);
//! let addr = controller.start().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let StatusEvent::Status(text) = event {
//!         println!("{}", text);
//!     }
//! }
//! ```

pub mod config;
pub mod fs;
pub mod net;
pub mod server;
pub mod signaling;
pub mod status;
pub mod transfer;

// Config re-exports
pub use config::Preferences;

// Status re-exports
pub use status::{FileAction, Notification, StatusBus, StatusEvent};

// Server re-exports
pub use server::{AppState, FileInfo, ServerController, router};

// Signaling / transfer re-exports
pub use signaling::{PeerNegotiator, SignalMessage};
pub use transfer::TransferEngine;
