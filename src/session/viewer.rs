use super::driver::{ActiveSession, Driver, Event, REMOTE_FRAME_CAPACITY};
use crate::error::{LinkError, Result};
use crate::peer::ice::apply_new_candidates;
use crate::peer::types::{RemoteTrackInfo, Role, SessionDescription, SignalingState};
use crate::recorder::{PipeSettings, RecorderHandle, REMOTE_PREFIX};
use crate::signaling::{MetadataRecord, SessionRecord, SessionStatus};
use crate::status::{reconnecting_message, Mode, MSG_CONNECTING, MSG_NOT_CONFIGURED};
use tokio::sync::broadcast;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl Driver {
    /// User-initiated start: fresh attempt budget.
    pub(super) async fn start_viewer(&mut self, session_id: String) -> Result<()> {
        self.terminate().await;

        if !self.signaling.is_ready() {
            self.board.emit_error(MSG_NOT_CONFIGURED);
            return Err(LinkError::NotConfigured);
        }

        self.supervisor.reset();
        self.terminal = false;
        self.mode = Mode::Viewer;
        self.session_id = Some(session_id.clone());
        self.board.emit_negotiating(Mode::Viewer, MSG_CONNECTING);

        if let Err(e) = self.launch_viewer(&session_id).await {
            warn!(session = %session_id, "viewer start failed: {e}");
            self.release_local().await;
            self.mode = Mode::Home;
            self.session_id = None;
            self.board.emit_error(&format!("Monitor start failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    async fn launch_viewer(&mut self, session_id: &str) -> Result<()> {
        self.epoch += 1;
        // микрофон не обязателен для просмотра
        if let Err(e) = self.devices.request_microphone().await {
            debug!("microphone permission not granted: {e}");
        }

        let (remote_frames, _) = broadcast::channel(REMOTE_FRAME_CAPACITY);
        let transport = self.open_transport(Role::Viewer, remote_frames.clone()).await?;
        self.session = Some(ActiveSession::new(
            Role::Viewer,
            session_id.to_owned(),
            transport,
            remote_frames,
        ));

        let session_watch = self.signaling.watch_session(session_id).await?;
        let metadata_watch = self.signaling.watch_metadata(session_id).await?;
        let listeners = vec![
            self.forward(session_watch, Event::Session),
            self.forward(metadata_watch, Event::Metadata),
        ];
        let watchdog = self.spawn_watchdog();
        if let Some(session) = self.session.as_mut() {
            session.listeners.extend(listeners);
            session.watchdog = Some(watchdog);
        }
        info!(session = %session_id, "viewer waiting for offer");
        Ok(())
    }

    fn spawn_watchdog(&self) -> tokio::task::JoinHandle<()> {
        let tx = self.events.clone();
        let epoch = self.epoch;
        let period = self.config.liveness_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if tx.send((epoch, Event::LivenessTick)).is_err() {
                    break;
                }
            }
        })
    }

    pub(super) async fn on_viewer_snapshot(&mut self, record: Option<SessionRecord>) {
        let Some(record) = record else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let transport = session.transport.clone();

        if record.status == SessionStatus::Offered
            && transport.signaling_state() == SignalingState::Stable
        {
            if let Some(offer) = record.offer.clone() {
                if session.negotiation.claim_offer(record.offer_id) {
                    if let Err(e) = self.answer_offer(offer).await {
                        warn!("failed to answer offer, will retry on next snapshot: {e}");
                        if let Some(session) = self.session.as_mut() {
                            session.negotiation.rollback_offer();
                        }
                    }
                }
            }
        }

        if let Some(session) = self.session.as_mut() {
            let applied = apply_new_candidates(
                transport.as_ref(),
                &mut session.negotiation.offer_candidates,
                &record.offer_candidates,
            )
            .await;
            if applied > 0 {
                debug!(applied, "offer candidates applied");
            }
        }
    }

    async fn answer_offer(&mut self, offer: SessionDescription) -> Result<()> {
        let (Some(session_id), Some(transport)) = (
            self.session_id.clone(),
            self.session.as_ref().map(|s| s.transport.clone()),
        ) else {
            return Ok(());
        };
        transport.set_remote_description(offer).await?;
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        let answer_id = self.clock.next_token();
        self.signaling
            .publish_answer(&session_id, &answer, answer_id)
            .await?;
        info!(answer_id, "answer published");
        Ok(())
    }

    /// Inbound media: merge into the remote stream, go live, start the
    /// remote recorder on the first track.
    pub(super) fn on_track(&mut self, track: RemoteTrackInfo) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.remote_tracks.iter().any(|t| t.id == track.id) {
            debug!(track = %track.id, "track already attached");
            return;
        }
        info!(track = %track.id, kind = %track.kind, "remote track attached");
        session.remote_tracks.push(track);

        if session.recorder.is_none() {
            session.recorder = Some(RecorderHandle::spawn(
                session.remote_frames.subscribe(),
                PipeSettings {
                    prefix: REMOTE_PREFIX,
                    slice: self.config.slice_duration(),
                    min_chunk_bytes: self.config.min_chunk_bytes,
                },
                self.history.clone(),
                self.clock.clone(),
            ));
        }

        self.supervisor.reset();
        self.terminal = false;
        self.board.emit_live(Mode::Viewer);
    }

    pub(super) async fn on_metadata(&mut self, meta: Option<MetadataRecord>) {
        let Some(meta) = meta else {
            self.board.emit_clips(Vec::new());
            return;
        };
        self.board.emit_clips(meta.clips.clone());

        let now = self.clock.now_millis();
        if let Some(session) = self.session.as_mut() {
            if session.pulse_seen.map(|(pulse, _)| pulse) != Some(meta.last_pulse) {
                session.pulse_seen = Some((meta.last_pulse, pulse_instant(now, meta.last_pulse)));
            }
        }
        if meta.is_stale(now, self.config.liveness_window_ms) {
            debug!(last_pulse = meta.last_pulse, now, "stale heartbeat in snapshot");
            self.on_stale();
        }
    }

    /// No snapshot means no news: the pulse is judged by its age on every
    /// tick, not only when a snapshot arrives.
    pub(super) async fn on_liveness_tick(&mut self) {
        let window = self.config.liveness_window();
        let stale = self
            .session
            .as_ref()
            .and_then(|s| s.pulse_seen)
            .is_some_and(|(_, seen)| seen.elapsed() > window);
        if stale {
            debug!("heartbeat has not moved within the liveness window");
            self.on_stale();
        }
    }

    /// Backoff timer fired: rebuild the viewer locally, keeping the attempt
    /// count.
    pub(super) async fn on_retry_due(&mut self, generation: u64) {
        if !self.supervisor.take_pending(generation) {
            debug!(generation, "ignoring superseded retry");
            return;
        }
        if self.mode != Mode::Viewer {
            return;
        }
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        let message =
            reconnecting_message(self.supervisor.attempts(), self.supervisor.max_attempts());
        self.board.emit_negotiating(Mode::Viewer, &message);

        self.release_local().await;
        if let Err(e) = self.launch_viewer(&session_id).await {
            warn!(session = %session_id, "reconnection attempt failed: {e}");
            self.release_local().await;
            self.on_stale();
        }
    }
}

/// Local instant of a pulse written `now_ms - pulse_ms` ago. A pulse from the
/// future (source clock ahead) counts as written now.
fn pulse_instant(now_ms: i64, pulse_ms: i64) -> Instant {
    let age = Duration::from_millis(now_ms.saturating_sub(pulse_ms).max(0) as u64);
    let now = Instant::now();
    now.checked_sub(age).unwrap_or(now)
}
