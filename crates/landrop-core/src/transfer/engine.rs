//! WebRTC 传输引擎
//!
//! 每条信令连接最多绑定一个对端连接，保存在按 [`ConnectionId`] 索引的表中。
//! 新的 offer 会先关闭旧连接再安装新连接；每个数据通道拥有独立的
//! [`ChannelReceiver`]，随通道关闭而释放。

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::Preferences;
use crate::signaling::{ConnectionId, PeerNegotiator, SignalMessage, SignalSender};
use crate::status::StatusBus;
use crate::transfer::protocol::GREETING;
use crate::transfer::receiver::ChannelReceiver;

pub struct TransferEngine {
    api: API,
    prefs: Arc<Preferences>,
    bus: StatusBus,
    peers: Mutex<HashMap<ConnectionId, Arc<RTCPeerConnection>>>,
}

impl TransferEngine {
    pub fn new(prefs: Arc<Preferences>, bus: StatusBus) -> anyhow::Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            prefs,
            bus,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// 当前活跃的对端连接数
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn has_peer(&self, conn: ConnectionId) -> bool {
        self.peers.lock().await.contains_key(&conn)
    }

    async fn create_peer(&self, outbound: SignalSender) -> anyhow::Result<Arc<RTCPeerConnection>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration::default())
                .await?,
        );

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let outbound = outbound.clone();
            Box::pin(async move {
                // None 表示收集结束
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = outbound.send(SignalMessage::candidate(init.candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let bus = self.bus.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection state changed: {}", state);
            if let Some(text) = connection_state_text(state) {
                bus.report(text);
            }
            Box::pin(async {})
        }));

        let prefs = self.prefs.clone();
        let bus = self.bus.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let receiver = ChannelReceiver::new(&prefs, bus.clone());
            let idle = prefs.idle_timeout();
            let bus = bus.clone();
            Box::pin(async move {
                info!("New data channel '{}' ({})", dc.label(), dc.id());
                wire_data_channel(dc, receiver, bus, idle);
            })
        }));

        Ok(pc)
    }

    async fn negotiate(pc: &RTCPeerConnection, sdp: String) -> anyhow::Result<String> {
        let offer = RTCSessionDescription::offer(sdp)?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| anyhow::anyhow!("failed to set remote description: {}", e))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create answer: {}", e))?;
        let answer_sdp = answer.sdp.clone();

        pc.set_local_description(answer)
            .await
            .map_err(|e| anyhow::anyhow!("failed to set local description: {}", e))?;

        Ok(answer_sdp)
    }
}

#[async_trait]
impl PeerNegotiator for TransferEngine {
    async fn handle_offer(
        &self,
        conn: ConnectionId,
        sdp: String,
        outbound: SignalSender,
    ) -> anyhow::Result<()> {
        // 先拆除旧连接，再安装新连接
        let previous = self.peers.lock().await.remove(&conn);
        if let Some(previous) = previous {
            info!("Replacing peer connection for {}", conn);
            if let Err(e) = previous.close().await {
                warn!("Failed to close previous peer connection: {}", e);
            }
        }

        let pc = self
            .create_peer(outbound.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to create peer connection: {}", e))?;

        match Self::negotiate(&pc, sdp).await {
            Ok(answer_sdp) => {
                self.peers.lock().await.insert(conn, Arc::clone(&pc));
                if outbound.send(SignalMessage::answer(answer_sdp)).is_err() {
                    warn!("Signaling connection {} closed before the answer was sent", conn);
                }
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!("Closing failed peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn add_remote_candidate(
        &self,
        conn: ConnectionId,
        candidate: String,
    ) -> anyhow::Result<bool> {
        let pc = self.peers.lock().await.get(&conn).cloned();
        let Some(pc) = pc else {
            return Ok(false);
        };

        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate,
            ..Default::default()
        })
        .await?;
        Ok(true)
    }

    async fn close_connection(&self, conn: ConnectionId) {
        let pc = self.peers.lock().await.remove(&conn);
        if let Some(pc) = pc {
            debug!("Closing peer connection for {}", conn);
            if let Err(e) = pc.close().await {
                error!("Failed to close peer connection: {}", e);
            }
        }
    }
}

fn connection_state_text(state: RTCPeerConnectionState) -> Option<&'static str> {
    match state {
        RTCPeerConnectionState::Connected => Some("WebRTC peer connected"),
        RTCPeerConnectionState::Disconnected => Some("WebRTC peer disconnected"),
        RTCPeerConnectionState::Failed => Some("WebRTC connection failed"),
        RTCPeerConnectionState::Closed => Some("WebRTC connection closed"),
        _ => None,
    }
}

fn wire_data_channel(
    dc: Arc<RTCDataChannel>,
    receiver: ChannelReceiver,
    bus: StatusBus,
    idle: Duration,
) {
    let receiver = Arc::new(Mutex::new(receiver));
    let closed = CancellationToken::new();

    {
        let receiver = Arc::clone(&receiver);
        let bus = bus.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let receiver = Arc::clone(&receiver);
            let bus = bus.clone();
            Box::pin(async move {
                let result = receiver
                    .lock()
                    .await
                    .handle_frame(msg.is_string, &msg.data)
                    .await;
                if let Err(e) = result {
                    warn!("Data channel message rejected: {}", e);
                    bus.report(format!("Transfer error: {}", e));
                }
            })
        }));
    }

    {
        let receiver = Arc::clone(&receiver);
        let bus = bus.clone();
        let closed = closed.clone();
        dc.on_close(Box::new(move || {
            let receiver = Arc::clone(&receiver);
            let bus = bus.clone();
            let closed = closed.clone();
            Box::pin(async move {
                closed.cancel();
                receiver.lock().await.abandon().await;
                bus.report("Data channel closed");
            })
        }));
    }

    // 通道可能已经打开，此时 on_open 立即触发，所以最后注册
    let dc_open = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            bus.report("Data channel opened");
            if let Err(e) = dc_open.send_text(GREETING.to_string()).await {
                warn!("Failed to send greeting: {}", e);
            }
            tokio::spawn(watch_idle(receiver, idle, closed));
        })
    }));
}

/// 通道空闲超时后丢弃未完成的文件和会话
async fn watch_idle(
    receiver: Arc<Mutex<ChannelReceiver>>,
    idle: Duration,
    closed: CancellationToken,
) {
    let period = (idle / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            _ = ticker.tick() => {
                receiver.lock().await.expire_if_idle(idle).await;
            }
        }
    }
}
