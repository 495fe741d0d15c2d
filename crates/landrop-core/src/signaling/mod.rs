//! 信令中继
//!
//! 把 `/signaling` 上的 HTTP 连接升级为 WebSocket，
//! 在浏览器和 [`PeerNegotiator`]（通常是 [`crate::TransferEngine`]）之间转发
//! offer / answer / candidate。

mod message;
mod relay;

pub use message::{SignalKind, SignalMessage};
pub use relay::{CloseKind, run_relay};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 一条信令连接的标识
pub type ConnectionId = Uuid;

/// 发往浏览器的信令消息队列
pub type SignalSender = mpsc::UnboundedSender<SignalMessage>;

/// 信令中继调用的对端协商接口
#[async_trait]
pub trait PeerNegotiator: Send + Sync {
    /// 收到 offer：为该连接（重新）建立对端连接，answer 和本地候选经 `outbound` 回传
    async fn handle_offer(
        &self,
        conn: ConnectionId,
        sdp: String,
        outbound: SignalSender,
    ) -> anyhow::Result<()>;

    /// 收到远端候选；该连接尚无对端连接时返回 `Ok(false)` 表示已丢弃
    async fn add_remote_candidate(
        &self,
        conn: ConnectionId,
        candidate: String,
    ) -> anyhow::Result<bool>;

    /// 信令连接结束，释放与之绑定的对端连接
    async fn close_connection(&self, conn: ConnectionId);
}
