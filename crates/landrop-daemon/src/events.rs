//! 状态总线订阅者：记录日志并执行文件动作

use landrop_core::{StatusBus, StatusEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::opener;

pub async fn run_event_loop(bus: StatusBus) {
    let mut events = bus.subscribe();

    loop {
        match events.recv().await {
            Ok(event) => handle_event(event).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Status listener lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn handle_event(event: StatusEvent) {
    match event {
        // 状态文本已由 core 以 info 级别记录
        StatusEvent::Status(_) => {}
        StatusEvent::Notification(n) => {
            tracing::info!(
                title = %n.title,
                path = %n.file_path.display(),
                action = %n.action,
                "{}",
                n.content
            );
        }
        StatusEvent::Action { path, action } => {
            tracing::info!("Performing {} on {:?}", action, path);
            if let Err(e) = opener::perform(&path, action).await {
                tracing::warn!("Failed to {} {:?}: {:#}", action, path, e);
            }
        }
    }
}
