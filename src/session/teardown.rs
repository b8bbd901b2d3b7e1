use super::driver::Driver;
use crate::error::Result;
use crate::peer::types::Role;
use crate::status::Mode;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Remote teardown writes never block or fail the local teardown.
async fn best_effort(what: &str, limit: Duration, write: impl Future<Output = Result<()>>) {
    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("teardown write '{what}' failed: {e}"),
        Err(_) => debug!("teardown write '{what}' timed out"),
    }
}

impl Driver {
    /// Full teardown back to home. Safe to call repeatedly.
    pub(super) async fn terminate(&mut self) {
        let role = match self.mode {
            Mode::Source => Some(Role::Source),
            Mode::Viewer => Some(Role::Viewer),
            Mode::Home => None,
        };
        let session_id = self.session_id.take();

        self.release_local().await;
        self.supervisor.reset();
        self.terminal = false;
        self.history.set_publisher(None);

        if let (Some(role), Some(session_id)) = (role, session_id) {
            let limit = self.config.remote_write_timeout();
            // монитор освобождает answer, камера освобождает offer
            best_effort(
                "release session",
                limit,
                self.signaling.release(&session_id, role),
            )
            .await;
            best_effort("deactivate metadata", limit, self.signaling.deactivate(&session_id)).await;
            info!(session = %session_id, ?role, "session terminated");
        }

        self.mode = Mode::Home;
        self.board.emit_clips(Vec::new());
        self.board.emit_home();
    }

    /// Drops the current session's local resources: listeners, timers,
    /// tracks, the recorder (flushed first) and the transport. No remote
    /// writes.
    pub(super) async fn release_local(&mut self) {
        self.epoch += 1;
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.abort_tasks();
        if let Some(capture) = session.capture.take() {
            capture.stop();
        }
        if let Some(recorder) = session.recorder.take() {
            recorder.stop(self.config.recorder_stop_timeout()).await;
        }
        session.transport.close().await;
        session.negotiation.reset();
        session.remote_tracks.clear();
        debug!(session = %session.session_id, role = ?session.role, "local session resources released");
    }
}
