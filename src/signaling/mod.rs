pub mod memory;
pub mod records;
pub mod store;

pub use memory::MemoryStore;
pub use records::{metadata_key, ClipInfo, MetadataRecord, SessionRecord, SessionStatus};
pub use store::{DocPatch, DocumentStore, FieldOp, Subscription};

use crate::error::Result;
use crate::peer::types::{IceCandidate, Role, SessionDescription};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Typed view of a [`Subscription`]; malformed snapshots are logged and
/// skipped.
pub struct RecordWatch<T> {
    sub: Subscription,
    key: String,
    _record: PhantomData<T>,
}

impl<T: DeserializeOwned> RecordWatch<T> {
    /// `None` when the listener is closed, `Some(None)` for a missing document.
    pub async fn next(&mut self) -> Option<Option<T>> {
        loop {
            match self.sub.next().await? {
                None => return Some(None),
                Some(doc) => match serde_json::from_value(doc) {
                    Ok(record) => return Some(Some(record)),
                    Err(e) => warn!(key = %self.key, "skipping malformed snapshot: {e}"),
                },
            }
        }
    }
}

/// Session mailbox on top of a [`DocumentStore`]: one session document per id
/// plus `<id>_metadata`.
#[derive(Clone)]
pub struct SignalingChannel {
    store: Arc<dyn DocumentStore>,
}

impl SignalingChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Новая эпоха камеры: всё прежнее согласование выбрасывается
    pub async fn reset_session(&self, session_id: &str, version: i64) -> Result<()> {
        let patch = DocPatch::replace()
            .null("offer")
            .null("answer")
            .set("offerCandidates", Vec::<IceCandidate>::new())
            .set("answerCandidates", Vec::<IceCandidate>::new())
            .set("status", SessionStatus::Pending)
            .set("version", version);
        self.store.write(session_id, patch).await
    }

    pub async fn publish_offer(
        &self,
        session_id: &str,
        offer: &SessionDescription,
        offer_id: i64,
    ) -> Result<()> {
        let patch = DocPatch::merge()
            .set("offer", offer)
            .set("offerId", offer_id)
            .set("status", SessionStatus::Offered);
        self.store.write(session_id, patch).await
    }

    pub async fn publish_answer(
        &self,
        session_id: &str,
        answer: &SessionDescription,
        answer_id: i64,
    ) -> Result<()> {
        let patch = DocPatch::merge()
            .set("answer", answer)
            .set("answerId", answer_id)
            .set("status", SessionStatus::Answered);
        self.store.write(session_id, patch).await
    }

    /// Кандидат стороны `role`: камера пишет в `offerCandidates`, монитор в `answerCandidates`
    pub async fn append_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let field = match role {
            Role::Source => "offerCandidates",
            Role::Viewer => "answerCandidates",
        };
        self.store
            .write(session_id, DocPatch::merge().append(field, candidate))
            .await
    }

    /// Teardown write: mark the session disconnected and null out the fields
    /// this role owns so the other side can renegotiate.
    pub async fn release(&self, session_id: &str, role: Role) -> Result<()> {
        let patch = DocPatch::merge().set("status", SessionStatus::Disconnected);
        let patch = match role {
            Role::Source => patch.null("offer").null("offerId"),
            Role::Viewer => patch.null("answer").null("answerId"),
        };
        self.store.write(session_id, patch).await
    }

    pub async fn publish_pulse(&self, session_id: &str, now_ms: i64) -> Result<()> {
        let patch = DocPatch::merge().set("lastPulse", now_ms).set("active", true);
        self.store.write(&metadata_key(session_id), patch).await
    }

    /// Clip index is replaced wholesale on every publish.
    pub async fn publish_clips(&self, session_id: &str, clips: &[ClipInfo], now_ms: i64) -> Result<()> {
        let patch = DocPatch::merge()
            .set("clips", clips)
            .set("lastPulse", now_ms)
            .set("active", true);
        self.store.write(&metadata_key(session_id), patch).await
    }

    pub async fn deactivate(&self, session_id: &str) -> Result<()> {
        let patch = DocPatch::merge().set("active", false).set("lastPulse", 0);
        self.store.write(&metadata_key(session_id), patch).await
    }

    pub async fn watch_session(&self, session_id: &str) -> Result<RecordWatch<SessionRecord>> {
        self.watch(session_id.to_owned()).await
    }

    pub async fn watch_metadata(&self, session_id: &str) -> Result<RecordWatch<MetadataRecord>> {
        self.watch(metadata_key(session_id)).await
    }

    async fn watch<T>(&self, key: String) -> Result<RecordWatch<T>> {
        let sub = self.store.subscribe(&key).await?;
        Ok(RecordWatch {
            sub,
            key,
            _record: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Arc<MemoryStore>, SignalingChannel) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SignalingChannel::new(store))
    }

    #[tokio::test]
    async fn reset_discards_previous_negotiation() {
        let (_store, signaling) = channel();
        signaling
            .publish_answer("cam", &SessionDescription::answer("old"), 5)
            .await
            .unwrap();
        signaling.reset_session("cam", 100).await.unwrap();

        let mut watch = signaling.watch_session("cam").await.unwrap();
        let record = watch.next().await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Pending);
        assert_eq!(record.answer, None);
        assert_eq!(record.answer_id, None);
        assert_eq!(record.version, 100);
    }

    #[tokio::test]
    async fn candidates_land_in_role_array() {
        let (_store, signaling) = channel();
        let cand = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 1 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        signaling.append_candidate("cam", Role::Source, &cand).await.unwrap();
        signaling.append_candidate("cam", Role::Source, &cand).await.unwrap();
        signaling.append_candidate("cam", Role::Viewer, &cand).await.unwrap();

        let mut watch = signaling.watch_session("cam").await.unwrap();
        let record = watch.next().await.unwrap().unwrap();
        assert_eq!(record.offer_candidates, vec![cand.clone()]);
        assert_eq!(record.answer_candidates, vec![cand]);
    }

    #[tokio::test]
    async fn release_nulls_only_own_fields() {
        let (_store, signaling) = channel();
        signaling
            .publish_offer("cam", &SessionDescription::offer("o"), 1)
            .await
            .unwrap();
        signaling
            .publish_answer("cam", &SessionDescription::answer("a"), 2)
            .await
            .unwrap();
        signaling.release("cam", Role::Viewer).await.unwrap();

        let mut watch = signaling.watch_session("cam").await.unwrap();
        let record = watch.next().await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Disconnected);
        assert_eq!(record.answer, None);
        assert_eq!(record.offer_id, Some(1));
    }

    #[tokio::test]
    async fn metadata_lives_under_suffixed_key() {
        let (store, signaling) = channel();
        signaling.publish_pulse("cam", 42).await.unwrap();
        assert!(store.get("cam_metadata").is_some());
        assert!(store.get("cam").is_none());

        signaling.deactivate("cam").await.unwrap();
        let mut watch = signaling.watch_metadata("cam").await.unwrap();
        let meta = watch.next().await.unwrap().unwrap();
        assert!(!meta.active);
        assert_eq!(meta.last_pulse, 0);
    }
}
