use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Negotiation status stored in the session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    #[default]
    Pending,
    Offered,
    Answered,
    Disconnected,
}

/// One document per session id. `offer*` is written only by the source,
/// `answer*` only by the viewer, candidate arrays only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    pub offer: Option<SessionDescription>,
    pub offer_id: Option<i64>,
    pub answer: Option<SessionDescription>,
    pub answer_id: Option<i64>,
    pub offer_candidates: Vec<IceCandidate>,
    pub answer_candidates: Vec<IceCandidate>,
    pub status: SessionStatus,
    pub version: i64,
}

/// Entry of the source's published recording index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub id: String,
    pub timestamp: i64,
    #[serde(rename = "size", alias = "sizeLabel")]
    pub size_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataRecord {
    pub clips: Vec<ClipInfo>,
    pub last_pulse: i64,
    pub active: bool,
}

impl MetadataRecord {
    /// Pulse older than `window_ms` (or missing) means the source is gone.
    pub fn is_stale(&self, now_ms: i64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_pulse) > window_ms as i64
    }
}

pub fn metadata_key(session_id: &str) -> String {
    format!("{session_id}_metadata")
}
