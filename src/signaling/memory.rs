use crate::error::{LinkError, Result};
use crate::signaling::store::{DocPatch, DocumentStore, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Slot {
    doc: Option<Value>,
    listeners: Vec<mpsc::UnboundedSender<Option<Value>>>,
}

impl Slot {
    fn notify(&mut self) {
        let snapshot = self.doc.clone();
        self.listeners.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

/// In-process document store shared by every engine that holds a clone of
/// the same `Arc`. Writes are applied atomically per document and fanned out
/// to listeners in write order.
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Slot>>,
    signed_in: AtomicBool,
    reachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            signed_in: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn signed_out() -> Self {
        let store = Self::new();
        store.signed_in.store(false, Ordering::SeqCst);
        store
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::SeqCst);
    }

    /// Unreachable stores reject writes and new subscriptions.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.docs
            .lock()
            .ok()
            .and_then(|docs| docs.get(key).and_then(|slot| slot.doc.clone()))
    }

    /// Delivers the current snapshot again to every listener of `key`.
    pub fn redeliver(&self, key: &str) {
        if let Ok(mut docs) = self.docs.lock() {
            if let Some(slot) = docs.get_mut(key) {
                slot.notify();
            }
        }
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.docs
            .lock()
            .map(|mut docs| match docs.get_mut(key) {
                Some(slot) => {
                    slot.listeners.retain(|tx| !tx.is_closed());
                    slot.listeners.len()
                }
                None => 0,
            })
            .unwrap_or(0)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LinkError::Signaling("document store unreachable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn is_ready(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }

    async fn write(&self, key: &str, patch: DocPatch) -> Result<()> {
        self.check_reachable()?;
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| LinkError::Signaling("document store poisoned".into()))?;
        let slot = docs.entry(key.to_owned()).or_default();
        slot.doc = Some(patch.apply_to(slot.doc.as_ref()));
        slot.notify();
        debug!(key, listeners = slot.listeners.len(), "document written");
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription> {
        self.check_reachable()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| LinkError::Signaling("document store poisoned".into()))?;
        let slot = docs.entry(key.to_owned()).or_default();
        let _ = tx.send(slot.doc.clone());
        slot.listeners.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_get_current_then_changes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("s1").await.unwrap();
        assert_eq!(sub.next().await, Some(None));

        store
            .write("s1", DocPatch::merge().set("status", "PENDING"))
            .await
            .unwrap();
        assert_eq!(sub.next().await, Some(Some(json!({"status": "PENDING"}))));

        store.redeliver("s1");
        assert_eq!(sub.next().await, Some(Some(json!({"status": "PENDING"}))));
    }

    #[tokio::test]
    async fn dropped_subscription_unsubscribes() {
        let store = MemoryStore::new();
        let sub = store.subscribe("s1").await.unwrap();
        assert_eq!(store.listener_count("s1"), 1);
        drop(sub);
        assert_eq!(store.listener_count("s1"), 0);
    }

    #[tokio::test]
    async fn unreachable_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        let result = store.write("s1", DocPatch::merge().set("a", 1)).await;
        assert!(matches!(result, Err(LinkError::Signaling(_))));
        assert!(store.get("s1").is_none());
    }
}
