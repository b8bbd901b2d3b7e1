use crate::archive::{LocalArchive, RecordingSummary};
use crate::error::Result;
use crate::signaling::{ClipInfo, SignalingChannel};
use crate::utils::Clock;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Where the clip index goes while a source is broadcasting.
#[derive(Clone)]
pub struct ClipPublisher {
    pub signaling: SignalingChannel,
    pub session_id: String,
    pub clock: Clock,
}

/// Keeps the in-memory history list in step with the archive and mirrors it
/// into the session metadata while a source is active.
pub struct HistorySync {
    archive: LocalArchive,
    history: watch::Sender<Vec<RecordingSummary>>,
    publisher: Mutex<Option<ClipPublisher>>,
}

impl HistorySync {
    pub fn new(archive: LocalArchive, history: watch::Sender<Vec<RecordingSummary>>) -> Self {
        Self {
            archive,
            history,
            publisher: Mutex::new(None),
        }
    }

    pub fn archive(&self) -> &LocalArchive {
        &self.archive
    }

    pub fn set_publisher(&self, publisher: Option<ClipPublisher>) {
        if let Ok(mut slot) = self.publisher.lock() {
            *slot = publisher;
        }
    }

    fn publisher(&self) -> Option<ClipPublisher> {
        self.publisher.lock().ok().and_then(|p| p.clone())
    }

    /// Full resync: re-reads the archive, republishes the list and, for an
    /// active source, the clip index. Clip publish failures are swallowed.
    pub async fn refresh(&self) -> Result<Vec<RecordingSummary>> {
        let list = self.archive.list().await?;
        self.history.send_replace(list.clone());
        debug!(recordings = list.len(), "history resynced");

        if let Some(p) = self.publisher() {
            let clips: Vec<ClipInfo> = list
                .iter()
                .map(|r| ClipInfo {
                    id: r.id.clone(),
                    timestamp: r.timestamp,
                    size_label: r.size_label.clone(),
                })
                .collect();
            if let Err(e) = p
                .signaling
                .publish_clips(&p.session_id, &clips, p.clock.now_millis())
                .await
            {
                warn!(session = %p.session_id, "clip index publish failed: {e}");
            }
        }
        Ok(list)
    }
}
