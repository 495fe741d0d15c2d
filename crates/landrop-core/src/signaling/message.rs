use serde::{Deserialize, Serialize};

/// 信令消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    #[serde(other)]
    Unknown,
}

/// 浏览器与传输引擎之间转发的 SDP / ICE 消息
///
/// 线上格式: `{"type": "...", "sdp": "...", "candidate": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

impl SignalMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: Some(sdp.into()),
            candidate: None,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Answer,
            sdp: Some(sdp.into()),
            candidate: None,
        }
    }

    pub fn candidate(candidate: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Candidate,
            sdp: None,
            candidate: Some(candidate.into()),
        }
    }
}
