use super::driver::{ActiveSession, Driver, Event, REMOTE_FRAME_CAPACITY};
use crate::error::{LinkError, Result};
use crate::history::ClipPublisher;
use crate::media::{CaptureConstraints, CaptureDevice};
use crate::peer::ice::apply_new_candidates;
use crate::peer::types::{Role, SignalingState};
use crate::recorder::{PipeSettings, RecorderHandle, LOCAL_PREFIX};
use crate::signaling::SessionRecord;
use crate::status::{Mode, MSG_CAMERA_ERROR, MSG_NOT_CONFIGURED, MSG_WAITING_FOR_VIEWER};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

impl Driver {
    pub(super) async fn start_source(&mut self, session_id: String) -> Result<()> {
        // повторный запуск: сначала освобождаем всё от прошлой сессии
        self.terminate().await;

        if !self.signaling.is_ready() {
            self.board.emit_error(MSG_NOT_CONFIGURED);
            return Err(LinkError::NotConfigured);
        }

        let capture = match self.devices.open_camera(&CaptureConstraints::default()).await {
            Ok(capture) => capture,
            Err(e) => {
                warn!("camera unavailable: {e}");
                self.board.emit_error(MSG_CAMERA_ERROR);
                return Err(e);
            }
        };

        self.epoch += 1;
        self.mode = Mode::Source;
        self.session_id = Some(session_id.clone());
        self.board.emit_negotiating(Mode::Source, "Starting camera...");

        if let Err(e) = self.launch_source(&session_id, capture.clone()).await {
            warn!(session = %session_id, "source start failed: {e}");
            capture.stop();
            self.release_local().await;
            self.mode = Mode::Home;
            self.session_id = None;
            self.board.emit_error(&format!("Camera start failed: {e}"));
            return Err(e);
        }
        info!(session = %session_id, "source broadcasting");
        Ok(())
    }

    async fn launch_source(
        &mut self,
        session_id: &str,
        capture: Arc<dyn CaptureDevice>,
    ) -> Result<()> {
        // новая эпоха камеры всегда сбрасывает документ сессии
        self.signaling
            .reset_session(session_id, self.clock.now_millis())
            .await?;

        let (remote_frames, _) = broadcast::channel(REMOTE_FRAME_CAPACITY);
        let transport = self.open_transport(Role::Source, remote_frames.clone()).await?;
        let mut session = ActiveSession::new(
            Role::Source,
            session_id.to_owned(),
            transport.clone(),
            remote_frames,
        );
        session.capture = Some(capture.clone());
        // сразу кладём в self, чтобы при ошибке ниже всё закрылось
        self.session = Some(session);

        transport.add_local_tracks(capture.as_ref()).await?;
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        let offer_id = self.clock.next_token();
        self.signaling
            .publish_offer(session_id, &offer, offer_id)
            .await?;
        debug!(offer_id, "initial offer published");

        let watch = self.signaling.watch_session(session_id).await?;
        let listener = self.forward(watch, Event::Session);
        let heartbeat = self.spawn_heartbeat(session_id.to_owned());
        let recorder = RecorderHandle::spawn(
            capture.frames(),
            PipeSettings {
                prefix: LOCAL_PREFIX,
                slice: self.config.slice_duration(),
                min_chunk_bytes: self.config.min_chunk_bytes,
            },
            self.history.clone(),
            self.clock.clone(),
        );
        if let Some(session) = self.session.as_mut() {
            session.listeners.push(listener);
            session.heartbeat = Some(heartbeat);
            session.recorder = Some(recorder);
        }

        self.history.set_publisher(Some(ClipPublisher {
            signaling: self.signaling.clone(),
            session_id: session_id.to_owned(),
            clock: self.clock.clone(),
        }));
        if let Err(e) = self.history.refresh().await {
            warn!("history resync failed: {e}");
        }
        self.board
            .emit_negotiating(Mode::Source, MSG_WAITING_FOR_VIEWER);
        Ok(())
    }

    fn spawn_heartbeat(&self, session_id: String) -> tokio::task::JoinHandle<()> {
        let signaling = self.signaling.clone();
        let clock = self.clock.clone();
        let period = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = signaling.publish_pulse(&session_id, clock.now_millis()).await {
                    debug!("heartbeat write failed: {e}");
                }
            }
        })
    }

    pub(super) async fn on_source_snapshot(&mut self, record: Option<SessionRecord>) {
        let Some(record) = record else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.last_answer_id = record.answer_id;
        let transport = session.transport.clone();

        if let Some(answer) = record.answer {
            if transport.signaling_state() == SignalingState::HaveLocalOffer
                && session.negotiation.claim_answer(record.answer_id)
            {
                match transport.set_remote_description(answer).await {
                    Ok(()) => {
                        info!(answer_id = ?record.answer_id, "answer applied");
                        self.board.emit_live(Mode::Source);
                    }
                    Err(e) => {
                        warn!("failed to apply answer, will retry on next snapshot: {e}");
                        if let Some(session) = self.session.as_mut() {
                            session.negotiation.rollback_answer();
                        }
                    }
                }
            }
        }

        if let Some(session) = self.session.as_mut() {
            let applied = apply_new_candidates(
                transport.as_ref(),
                &mut session.negotiation.answer_candidates,
                &record.answer_candidates,
            )
            .await;
            if applied > 0 {
                debug!(applied, "answer candidates applied");
            }
        }
    }

    /// Transport dropped: publish a fresh offer on the same connection so a
    /// viewer can answer again.
    pub(super) async fn renegotiate(&mut self) {
        let Some((transport, seen_answer)) = self
            .session
            .as_ref()
            .map(|s| (s.transport.clone(), s.last_answer_id))
        else {
            return;
        };
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        info!(session = %session_id, "transport lost, re-offering");
        self.board
            .emit_negotiating(Mode::Source, "Connection lost - renegotiating...");

        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("re-offer failed: {e}");
                return;
            }
        };
        if let Err(e) = transport.set_local_description(offer.clone()).await {
            warn!("re-offer local description failed: {e}");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.negotiation.restart_offer(seen_answer);
        }
        let offer_id = self.clock.next_token();
        if let Err(e) = self.signaling.publish_offer(&session_id, &offer, offer_id).await {
            warn!("re-offer publish failed: {e}");
        }
    }
}
