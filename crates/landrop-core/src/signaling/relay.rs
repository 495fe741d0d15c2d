use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ConnectionId, PeerNegotiator, SignalKind, SignalMessage, SignalSender};
use crate::status::StatusBus;

/// 读循环的结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    /// 对端正常关闭（1000 / 1001）
    Clean,
    /// 其他关闭码、读错误或连接被直接断开
    Error(String),
}

/// 运行一条已升级的信令连接直到它关闭
pub async fn run_relay(
    socket: WebSocket,
    negotiator: Arc<dyn PeerNegotiator>,
    bus: StatusBus,
) -> CloseKind {
    let conn: ConnectionId = Uuid::new_v4();
    info!("Signaling connection {} established", conn);
    bus.report("WebRTC client connected");

    let (mut write, mut read) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();

    // 对端连接的回调也通过 outbound 写回，所以写半部单独跑一个任务
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode signaling message: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text)).await {
                debug!("Signaling write failed: {}", e);
                break;
            }
        }
    });

    let outcome = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_text(conn, &text, negotiator.as_ref(), &outbound, &bus).await;
            }
            Some(Ok(Message::Close(frame))) => break classify_close(frame),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break CloseKind::Error(e.to_string()),
            None => break CloseKind::Error("connection dropped without close frame".into()),
        }
    };

    negotiator.close_connection(conn).await;
    drop(outbound);
    writer.abort();

    match &outcome {
        CloseKind::Clean => bus.report("WebRTC client disconnected"),
        CloseKind::Error(reason) => {
            warn!("Signaling connection {} failed: {}", conn, reason);
            bus.report("WebRTC connection error");
        }
    }

    outcome
}

async fn handle_text(
    conn: ConnectionId,
    text: &str,
    negotiator: &dyn PeerNegotiator,
    outbound: &SignalSender,
    bus: &StatusBus,
) {
    debug!("Received signaling message: {}", text);

    let signal: SignalMessage = match serde_json::from_str(text) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("Invalid signaling message: {}", e);
            bus.report("Invalid signaling message");
            return;
        }
    };

    match signal.kind {
        SignalKind::Offer => {
            let Some(sdp) = signal.sdp else {
                warn!("Offer without SDP on {}", conn);
                bus.report("Invalid signaling message");
                return;
            };
            if let Err(e) = negotiator.handle_offer(conn, sdp, outbound.clone()).await {
                error!("WebRTC negotiation failed: {:#}", e);
                bus.report(format!("WebRTC negotiation failed: {}", e));
            }
        }
        SignalKind::Candidate => {
            let Some(candidate) = signal.candidate else {
                debug!("Candidate message without candidate on {}", conn);
                return;
            };
            match negotiator.add_remote_candidate(conn, candidate).await {
                Ok(true) => {}
                Ok(false) => debug!("Dropped candidate for {}: no peer connection yet", conn),
                Err(e) => warn!("Failed to add ICE candidate: {}", e),
            }
        }
        SignalKind::Answer | SignalKind::Unknown => {
            debug!("Ignoring {:?} signaling message", signal.kind);
        }
    }
}

fn classify_close(frame: Option<CloseFrame<'static>>) -> CloseKind {
    match frame {
        None => CloseKind::Clean,
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            CloseKind::Clean
        }
        Some(frame) => CloseKind::Error(format!("closed with code {}", frame.code)),
    }
}
