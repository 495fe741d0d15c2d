//! 状态与通知总线
//!
//! HTTP 上传、信令循环和数据通道回调都在各自的任务里上报状态，
//! 这里用 `broadcast` 通道把它们分发给任意数量的订阅者（日志、界面、测试）。
//! 发布永远不会阻塞调用方。

mod action;

pub use action::{FileAction, best_action_for, display_name};

use log::info;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// 通知标题
pub const NOTIFICATION_TITLE: &str = "LAN-Drop";

const BUS_CAPACITY: usize = 256;

/// 富通知，由界面层决定如何展示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub content: String,
    pub file_path: PathBuf,
    pub action: FileAction,
}

/// 总线事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// 一行状态文本
    Status(String),
    /// 文件就绪通知
    Notification(Notification),
    /// 请求界面层对文件执行动作（打开、在文件管理器中显示）
    Action { path: PathBuf, action: FileAction },
}

/// 多订阅者状态总线
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// 订阅状态更新
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(StatusEvent::Status(message));
    }

    pub fn notify(&self, content: impl Into<String>, file_path: PathBuf, action: FileAction) {
        self.publish(StatusEvent::Notification(Notification {
            title: NOTIFICATION_TITLE.to_string(),
            content: content.into(),
            file_path,
            action,
        }));
    }

    pub fn request_action(&self, path: PathBuf, action: FileAction) {
        self.publish(StatusEvent::Action { path, action });
    }

    fn publish(&self, event: StatusEvent) {
        // 没有订阅者时 send 返回 Err，属于正常情况
        let _ = self.tx.send(event);
    }
}
