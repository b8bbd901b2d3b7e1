//! In-memory transport for driving the negotiation engine in tests.

use crate::error::{LinkError, Result};
use crate::media::{CaptureDevice, MediaFrame};
use crate::peer::connection::{MediaTransport, PeerContext, PeerEvent, PeerEventSink, PeerFactory};
use crate::peer::types::{
    IceCandidate, PeerState, RemoteTrackInfo, Role, SdpKind, SessionDescription, SignalingState,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct Inner {
    signaling: Option<SignalingState>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_applied: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    local_tracks: usize,
    closed: bool,
    fail_remote: usize,
}

pub struct FakeTransport {
    inner: Mutex<Inner>,
    events: Option<PeerEventSink>,
    remote_frames: Option<broadcast::Sender<MediaFrame>>,
    emit_track_on_answer: bool,
    offers: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events: None,
            remote_frames: None,
            emit_track_on_answer: false,
            offers: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().candidates.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.lock().remote_applied.clone()
    }

    pub fn local_track_count(&self) -> usize {
        self.lock().local_tracks
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Next `n` calls to `set_remote_description` fail.
    pub fn fail_next_remote(&self, n: usize) {
        self.lock().fail_remote = n;
    }

    pub fn emit(&self, event: PeerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    pub fn remote_frames(&self) -> Option<broadcast::Sender<MediaFrame>> {
        self.remote_frames.clone()
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn add_local_tracks(&self, capture: &dyn CaptureDevice) -> Result<()> {
        self.lock().local_tracks += capture.tracks().len();
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("v=0 fake-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let inner = self.lock();
        match &inner.remote {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(SessionDescription::answer(
                format!("v=0 answer-to:{}", remote.sdp),
            )),
            _ => Err(LinkError::Transport("no remote offer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let emit_track = {
            let mut inner = self.lock();
            inner.signaling = Some(match desc.kind {
                SdpKind::Offer => SignalingState::HaveLocalOffer,
                SdpKind::Answer => SignalingState::Stable,
            });
            let answered = desc.kind == SdpKind::Answer;
            inner.local = Some(desc);
            answered && self.emit_track_on_answer
        };
        if emit_track {
            self.emit(PeerEvent::StateChanged(PeerState::Connected));
            self.emit(PeerEvent::Track(RemoteTrackInfo {
                id: "camlink-video".into(),
                stream_id: "camlink".into(),
                kind: "video".into(),
            }));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_remote > 0 {
            inner.fail_remote -= 1;
            return Err(LinkError::Transport("injected failure".into()));
        }
        inner.signaling = Some(match desc.kind {
            SdpKind::Offer => SignalingState::HaveRemoteOffer,
            SdpKind::Answer => SignalingState::Stable,
        });
        inner.remote_applied.push(desc.clone());
        inner.remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.lock();
        if inner.remote.is_none() {
            return Err(LinkError::Transport("remote description not set".into()));
        }
        inner.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        let inner = self.lock();
        if inner.closed {
            return SignalingState::Closed;
        }
        inner.signaling.unwrap_or(SignalingState::Stable)
    }

    async fn has_remote_description(&self) -> bool {
        self.lock().remote.is_some()
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}

/// Factory handing out fake transports and remembering each one.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    fail_create: Mutex<bool>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    pub fn fail_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(&self, ctx: PeerContext) -> Result<Arc<dyn MediaTransport>> {
        if *self.fail_create.lock().unwrap() {
            return Err(LinkError::Transport("injected create failure".into()));
        }
        let transport = Arc::new(FakeTransport {
            inner: Mutex::new(Inner::default()),
            emit_track_on_answer: ctx.role == Role::Viewer,
            events: Some(ctx.events),
            remote_frames: Some(ctx.remote_frames),
            offers: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}
