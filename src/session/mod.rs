//! Camera/monitor session engine.
//!
//! [`LinkEngine`] is a cheap handle; the actual state machine runs in a single
//! driver task that owns the transport, the trackers, the recorders and every
//! timer. Shell calls travel to it as commands, snapshot listeners and
//! transport callbacks as epoch-tagged events, so work belonging to a torn
//! down session is dropped on arrival.

mod driver;
mod source;
mod teardown;
mod viewer;


use crate::archive::{LocalArchive, LocalRecording, RecordingSummary};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::history::HistorySync;
use crate::media::MediaDevices;
use crate::peer::connection::PeerFactory;
use crate::signaling::{ClipInfo, DocumentStore};
use crate::status::{LinkStatus, StatusBoard};
use driver::{Command, Driver};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Collaborators of one engine.
pub struct EngineDeps {
    pub config: LinkConfig,
    pub store: Arc<dyn DocumentStore>,
    pub peers: Arc<dyn PeerFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub archive: LocalArchive,
}

pub struct LinkEngine {
    commands: mpsc::UnboundedSender<Command>,
    board: Arc<StatusBoard>,
    history: Arc<HistorySync>,
}

impl LinkEngine {
    /// Spawns the driver task; must be called inside a tokio runtime.
    pub fn new(deps: EngineDeps) -> Self {
        let board = Arc::new(StatusBoard::new());
        let history = Arc::new(HistorySync::new(deps.archive.clone(), board.history_sender()));
        let (commands, rx) = mpsc::unbounded_channel();
        let driver = Driver::new(deps, board.clone(), history.clone());
        tokio::spawn(driver.run(rx));
        Self {
            commands,
            board,
            history,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| LinkError::EngineClosed)?;
        rx.await.map_err(|_| LinkError::EngineClosed)
    }

    /// Starts broadcasting the local camera under `session_id`.
    pub async fn start_source(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_owned();
        self.call(|reply| Command::StartSource { session_id, reply })
            .await?
    }

    /// Starts watching the camera published under `session_id`.
    pub async fn start_viewer(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_owned();
        self.call(|reply| Command::StartViewer { session_id, reply })
            .await?
    }

    /// Tears down whatever is running and returns home. Safe to repeat.
    pub async fn terminate(&self) -> Result<()> {
        self.call(|reply| Command::Terminate { reply }).await
    }

    /// Returns the applied level, `None` when ignored.
    pub async fn set_zoom(&self, level: f64) -> Result<Option<f64>> {
        self.call(|reply| Command::SetZoom { level, reply }).await
    }

    pub async fn list_recordings(&self) -> Result<Vec<RecordingSummary>> {
        self.history.archive().list().await
    }

    pub async fn play(&self, id: &str) -> Result<Option<LocalRecording>> {
        self.history.archive().get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.history.archive().delete(id).await?;
        self.history.refresh().await?;
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self.history.archive().clear().await?;
        debug!(removed, "archive flushed");
        self.history.refresh().await?;
        Ok(removed)
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.board.status()
    }

    pub fn current_status(&self) -> LinkStatus {
        self.board.current()
    }

    pub fn history(&self) -> watch::Receiver<Vec<RecordingSummary>> {
        self.board.history()
    }

    pub fn remote_clips(&self) -> watch::Receiver<Vec<ClipInfo>> {
        self.board.clips()
    }

    pub fn archive(&self) -> &LocalArchive {
        self.history.archive()
    }
}
