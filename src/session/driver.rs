use crate::config::LinkConfig;
use crate::error::Result;
use crate::history::HistorySync;
use crate::media::{CaptureDevice, MediaDevices, MediaFrame};
use crate::peer::connection::{MediaTransport, PeerContext, PeerEvent, PeerEventSink, PeerFactory};
use crate::peer::state::NegotiationState;
use crate::peer::types::{IceCandidate, PeerState, RemoteTrackInfo, Role};
use crate::reconnect::{Backoff, ReconnectSupervisor};
use crate::recorder::RecorderHandle;
use crate::signaling::{MetadataRecord, RecordWatch, SessionRecord, SignalingChannel};
use crate::status::{Mode, StatusBoard, MSG_RECONNECT_FAILED, MSG_SOURCE_OFFLINE};
use crate::utils::Clock;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::EngineDeps;

pub(super) const REMOTE_FRAME_CAPACITY: usize = 1024;

pub(super) enum Command {
    StartSource {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StartViewer {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
    SetZoom {
        level: f64,
        reply: oneshot::Sender<Option<f64>>,
    },
}

pub(super) enum Event {
    Peer(PeerEvent),
    Session(Option<SessionRecord>),
    Metadata(Option<MetadataRecord>),
    LivenessTick,
    /// Backoff timer of the given generation fired.
    RetryDue(u64),
}

pub(super) type Tagged = (u64, Event);

/// Resources of the running session; everything here dies with the epoch.
pub(super) struct ActiveSession {
    pub role: Role,
    pub session_id: String,
    pub transport: Arc<dyn MediaTransport>,
    pub negotiation: NegotiationState,
    pub capture: Option<Arc<dyn CaptureDevice>>,
    pub remote_frames: broadcast::Sender<MediaFrame>,
    /// Заглушка удалённого потока: треки без повторов
    pub remote_tracks: Vec<RemoteTrackInfo>,
    pub recorder: Option<RecorderHandle>,
    pub listeners: Vec<JoinHandle<()>>,
    pub heartbeat: Option<JoinHandle<()>>,
    pub watchdog: Option<JoinHandle<()>>,
    /// Last `lastPulse` value and the local instant it corresponds to.
    pub pulse_seen: Option<(i64, Instant)>,
    pub last_answer_id: Option<i64>,
}

impl ActiveSession {
    pub fn new(
        role: Role,
        session_id: String,
        transport: Arc<dyn MediaTransport>,
        remote_frames: broadcast::Sender<MediaFrame>,
    ) -> Self {
        Self {
            role,
            session_id,
            transport,
            negotiation: NegotiationState::new(),
            capture: None,
            remote_frames,
            remote_tracks: Vec::new(),
            recorder: None,
            listeners: Vec::new(),
            heartbeat: None,
            watchdog: None,
            pulse_seen: None,
            last_answer_id: None,
        }
    }

    /// Cancels listeners and timers; the recorder and transport are handled
    /// by the caller because they need awaiting.
    pub fn abort_tasks(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

pub(super) struct Driver {
    pub config: LinkConfig,
    pub signaling: SignalingChannel,
    pub peers: Arc<dyn PeerFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub history: Arc<HistorySync>,
    pub board: Arc<StatusBoard>,
    pub clock: Clock,
    pub events: mpsc::UnboundedSender<Tagged>,
    events_rx: Option<mpsc::UnboundedReceiver<Tagged>>,
    pub epoch: u64,
    pub mode: Mode,
    pub session_id: Option<String>,
    pub session: Option<ActiveSession>,
    pub supervisor: ReconnectSupervisor,
    /// Reconnection gave up; only a user action restarts the viewer.
    pub terminal: bool,
}

impl Driver {
    pub fn new(deps: EngineDeps, board: Arc<StatusBoard>, history: Arc<HistorySync>) -> Self {
        let EngineDeps {
            config,
            store,
            peers,
            devices,
            archive: _,
        } = deps;
        let (events, events_rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(
            config.max_reconnect_attempts,
            std::time::Duration::from_millis(config.backoff_base_ms),
            std::time::Duration::from_millis(config.backoff_cap_ms),
        );
        Self {
            config,
            signaling: SignalingChannel::new(store),
            peers,
            devices,
            history,
            board,
            clock: Clock::new(),
            events,
            events_rx: Some(events_rx),
            epoch: 0,
            mode: Mode::Home,
            session_id: None,
            session: None,
            supervisor,
            terminal: false,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut events) = self.events_rx.take() else {
            return;
        };
        if let Err(e) = self.history.refresh().await {
            warn!("initial history load failed: {e}");
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // последний дескриптор движка удалён
                        debug!("engine handle dropped, shutting down");
                        self.terminate().await;
                        break;
                    }
                },
                Some((epoch, event)) = events.recv() => {
                    if epoch == self.epoch {
                        self.handle_event(event).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartSource { session_id, reply } => {
                let result = self.start_source(session_id).await;
                let _ = reply.send(result);
            }
            Command::StartViewer { session_id, reply } => {
                let result = self.start_viewer(session_id).await;
                let _ = reply.send(result);
            }
            Command::Terminate { reply } => {
                self.terminate().await;
                let _ = reply.send(());
            }
            Command::SetZoom { level, reply } => {
                let _ = reply.send(self.set_zoom(level));
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        let Some(role) = self.session.as_ref().map(|s| s.role) else {
            // RetryDue arrives while the viewer has no live session
            if let Event::RetryDue(generation) = event {
                self.on_retry_due(generation).await;
            }
            return;
        };
        match (role, event) {
            (_, Event::Peer(PeerEvent::LocalCandidate(candidate))) => {
                self.publish_candidate(role, candidate)
            }
            (Role::Source, Event::Peer(PeerEvent::StateChanged(state))) => {
                self.on_source_state(state).await
            }
            (Role::Viewer, Event::Peer(PeerEvent::StateChanged(state))) => {
                debug!(?state, "viewer transport state");
            }
            (Role::Viewer, Event::Peer(PeerEvent::Track(track))) => self.on_track(track),
            (Role::Source, Event::Peer(PeerEvent::Track(track))) => {
                debug!(track = %track.id, "ignoring inbound track on source");
            }
            (Role::Source, Event::Session(record)) => self.on_source_snapshot(record).await,
            (Role::Viewer, Event::Session(record)) => self.on_viewer_snapshot(record).await,
            (Role::Viewer, Event::Metadata(meta)) => self.on_metadata(meta).await,
            (Role::Viewer, Event::LivenessTick) => self.on_liveness_tick().await,
            (_, Event::RetryDue(generation)) => self.on_retry_due(generation).await,
            (Role::Source, Event::Metadata(_) | Event::LivenessTick) => {}
        }
    }

    fn publish_candidate(&self, role: Role, candidate: IceCandidate) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        let signaling = self.signaling.clone();
        // fire-and-forget: кандидаты избыточны
        tokio::spawn(async move {
            if let Err(e) = signaling.append_candidate(&session_id, role, &candidate).await {
                debug!("dropping local candidate, write failed: {e}");
            }
        });
    }

    /// Builds a transport whose callbacks are tagged with the current epoch.
    pub async fn open_transport(
        &self,
        role: Role,
        remote_frames: broadcast::Sender<MediaFrame>,
    ) -> Result<Arc<dyn MediaTransport>> {
        let tx = self.events.clone();
        let epoch = self.epoch;
        let sink = PeerEventSink::new(move |event| {
            let _ = tx.send((epoch, Event::Peer(event)));
        });
        self.peers
            .create(PeerContext {
                role,
                events: sink,
                remote_frames,
            })
            .await
    }

    /// Forwards a snapshot listener into the event loop until aborted.
    pub fn forward<T, F>(&self, mut watch: RecordWatch<T>, wrap: F) -> JoinHandle<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Option<T>) -> Event + Send + 'static,
    {
        let tx = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            while let Some(record) = watch.next().await {
                if tx.send((epoch, wrap(record))).is_err() {
                    break;
                }
            }
        })
    }

    fn set_zoom(&self, level: f64) -> Option<f64> {
        if self.mode != Mode::Source {
            return None;
        }
        let capture = self.session.as_ref()?.capture.as_ref()?;
        capture.zoom_range()?;
        match capture.apply_zoom(level) {
            Ok(applied) => {
                debug!(requested = level, applied, "zoom applied");
                Some(applied)
            }
            Err(e) => {
                debug!("zoom not applied: {e}");
                None
            }
        }
    }

    async fn on_source_state(&mut self, state: PeerState) {
        match state {
            PeerState::Connected => self.board.emit_live(Mode::Source),
            PeerState::Disconnected | PeerState::Failed => self.renegotiate().await,
            PeerState::Connecting | PeerState::Closed => {}
        }
    }

    /// Stale heartbeat on the viewer side.
    pub fn on_stale(&mut self) {
        if self.mode != Mode::Viewer || self.terminal || self.supervisor.is_pending() {
            return;
        }
        match self.supervisor.on_stale() {
            Backoff::Retry { attempt, delay } => {
                self.board.emit_disconnected(Mode::Viewer, MSG_SOURCE_OFFLINE);
                let tx = self.events.clone();
                let epoch = self.epoch;
                let generation = self.supervisor.arm(move |generation| {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send((epoch, Event::RetryDue(generation)));
                    })
                });
                debug!(attempt, generation, "retry timer armed");
            }
            Backoff::Exhausted => {
                info!("giving up on the source");
                self.terminal = true;
                if let Some(session) = self.session.as_mut() {
                    if let Some(watchdog) = session.watchdog.take() {
                        watchdog.abort();
                    }
                }
                self.board.emit_disconnected(Mode::Viewer, MSG_RECONNECT_FAILED);
            }
        }
    }
}
