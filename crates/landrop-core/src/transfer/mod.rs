//! WebRTC 文件传输
//!
//! 包含:
//! - 数据通道消息格式
//! - 单通道接收状态机（会话、分块写盘）
//! - 对端连接管理（offer / answer / ICE）

pub mod engine;
pub mod protocol;
pub mod receiver;

pub use engine::TransferEngine;
pub use protocol::{ChannelMessage, GREETING};
pub use receiver::{ChannelReceiver, ReceiveError, TransferSession};
