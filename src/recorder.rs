//! Chunked recording of a live stream into the local archive.
//!
//! A pipe buffers every frame from its tap and cuts a chunk on each slice
//! boundary. Stopping is a rendezvous: the owner asks for the remaining data,
//! then for a stop, and waits for the acknowledgement with a timeout.

use crate::archive::LocalRecording;
use crate::history::HistorySync;
use crate::media::MediaFrame;
use crate::utils::{recording_id, size_label, Clock};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const LOCAL_PREFIX: &str = "rec";
pub const REMOTE_PREFIX: &str = "rec_remote";

#[derive(Debug, Clone)]
pub struct PipeSettings {
    pub prefix: &'static str,
    pub slice: Duration,
    pub min_chunk_bytes: usize,
}

enum Control {
    RequestData,
    Stop(oneshot::Sender<()>),
}

pub struct RecorderHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
    prefix: &'static str,
}

impl RecorderHandle {
    pub fn spawn(
        frames: broadcast::Receiver<MediaFrame>,
        settings: PipeSettings,
        history: Arc<HistorySync>,
        clock: Clock,
    ) -> Self {
        let (control, rx) = mpsc::unbounded_channel();
        let prefix = settings.prefix;
        info!(prefix, slice_ms = settings.slice.as_millis() as u64, "recording pipe started");
        let pipe = Pipe {
            settings,
            history,
            clock,
            buffer: BytesMut::new(),
        };
        let task = tokio::spawn(pipe.run(frames, rx));
        Self {
            control,
            task,
            prefix,
        }
    }

    /// Cut a chunk now instead of waiting for the slice boundary.
    pub fn request_data(&self) {
        let _ = self.control.send(Control::RequestData);
    }

    /// Flushes the remaining data and stops. Returns whether the pipe
    /// acknowledged within `timeout`.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.request_data();
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control.send(Control::Stop(ack_tx)).is_err() {
            return false;
        }
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(())) => {
                debug!(prefix = self.prefix, "recording pipe stopped");
                true
            }
            _ => {
                warn!(prefix = self.prefix, "recording pipe did not acknowledge stop, aborting");
                self.task.abort();
                false
            }
        }
    }
}

struct Pipe {
    settings: PipeSettings,
    history: Arc<HistorySync>,
    clock: Clock,
    buffer: BytesMut,
}

impl Pipe {
    async fn run(
        mut self,
        mut frames: broadcast::Receiver<MediaFrame>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        let slice = self.settings.slice;
        let mut ticker = interval_at(Instant::now() + slice, slice);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stream_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush(&mut frames).await,
                frame = frames.recv(), if stream_open => match frame {
                    Ok(frame) => self.buffer.extend_from_slice(&frame.data),
                    Err(RecvError::Lagged(n)) => warn!(prefix = self.settings.prefix, "recorder lagged, {n} frames dropped"),
                    // поток закончился, ждём команду остановки
                    Err(RecvError::Closed) => stream_open = false,
                },
                cmd = control.recv() => match cmd {
                    Some(Control::RequestData) => self.flush(&mut frames).await,
                    Some(Control::Stop(ack)) => {
                        self.flush(&mut frames).await;
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.flush(&mut frames).await;
                        return;
                    }
                },
            }
        }
    }

    /// Moves frames already queued in the tap into the buffer.
    fn drain(&mut self, frames: &mut broadcast::Receiver<MediaFrame>) {
        loop {
            match frames.try_recv() {
                Ok(frame) => self.buffer.extend_from_slice(&frame.data),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(prefix = self.settings.prefix, "recorder lagged, {n} frames dropped")
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    async fn flush(&mut self, frames: &mut broadcast::Receiver<MediaFrame>) {
        self.drain(frames);
        let data = self.buffer.split().freeze();
        if data.len() < self.settings.min_chunk_bytes {
            if !data.is_empty() {
                debug!(prefix = self.settings.prefix, bytes = data.len(), "discarding short chunk");
            }
            return;
        }

        let timestamp = self.clock.now_millis();
        let recording = LocalRecording {
            id: recording_id(self.settings.prefix, timestamp),
            timestamp,
            size_label: size_label(data.len()),
            data,
        };
        let id = recording.id.clone();
        match self.history.archive().put(recording).await {
            Ok(()) => {
                info!(%id, "chunk saved");
                if let Err(e) = self.history.refresh().await {
                    warn!("history resync failed: {e}");
                }
            }
            Err(e) => warn!(%id, "failed to persist chunk: {e}"),
        }
    }
}
