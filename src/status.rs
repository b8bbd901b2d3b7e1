//! Observable engine state published to the shell.

use crate::archive::RecordingSummary;
use crate::signaling::ClipInfo;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnState {
    Disconnected,
    Negotiating,
    Live,
}

/// Which screen the shell should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Home,
    Source,
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: ConnState,
    pub message: String,
    pub mode: Mode,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: ConnState::Disconnected,
            message: "Ready".into(),
            mode: Mode::Home,
        }
    }
}

pub const MSG_READY: &str = "Ready";
pub const MSG_NOT_CONFIGURED: &str = "Signaling backend not configured - sign in first";
pub const MSG_CAMERA_ERROR: &str = "Camera unavailable";
pub const MSG_WAITING_FOR_VIEWER: &str = "Broadcasting - waiting for a monitor";
pub const MSG_CONNECTING: &str = "Connecting to camera...";
pub const MSG_LIVE: &str = "Live";
pub const MSG_SOURCE_OFFLINE: &str = "Source offline - reconnecting...";
pub const MSG_RECONNECT_FAILED: &str = "Reconnection failed - check the source";

/// Отправители состояния для оболочки
pub struct StatusBoard {
    status: watch::Sender<LinkStatus>,
    history: watch::Sender<Vec<RecordingSummary>>,
    clips: watch::Sender<Vec<ClipInfo>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            status: watch::Sender::new(LinkStatus::default()),
            history: watch::Sender::new(Vec::new()),
            clips: watch::Sender::new(Vec::new()),
        }
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn history(&self) -> watch::Receiver<Vec<RecordingSummary>> {
        self.history.subscribe()
    }

    pub fn history_sender(&self) -> watch::Sender<Vec<RecordingSummary>> {
        self.history.clone()
    }

    pub fn clips(&self) -> watch::Receiver<Vec<ClipInfo>> {
        self.clips.subscribe()
    }

    pub fn current(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    fn emit(&self, state: ConnState, message: &str, mode: Mode) {
        let next = LinkStatus {
            state,
            message: message.to_owned(),
            mode,
        };
        self.status.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            info!(state = ?next.state, mode = ?next.mode, "status: {}", next.message);
            *cur = next;
            true
        });
    }

    pub fn emit_home(&self) {
        self.emit(ConnState::Disconnected, MSG_READY, Mode::Home);
    }

    /// Error on the home screen; the engine never left (or went back to) home.
    pub fn emit_error(&self, message: &str) {
        self.emit(ConnState::Disconnected, message, Mode::Home);
    }

    pub fn emit_negotiating(&self, mode: Mode, message: &str) {
        self.emit(ConnState::Negotiating, message, mode);
    }

    pub fn emit_live(&self, mode: Mode) {
        self.emit(ConnState::Live, MSG_LIVE, mode);
    }

    pub fn emit_disconnected(&self, mode: Mode, message: &str) {
        self.emit(ConnState::Disconnected, message, mode);
    }

    pub fn emit_clips(&self, clips: Vec<ClipInfo>) {
        self.clips.send_if_modified(|cur| {
            if *cur == clips {
                return false;
            }
            *cur = clips;
            true
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

pub fn reconnecting_message(attempt: u32, max: u32) -> String {
    format!("Reconnecting ({attempt}/{max})...")
}
