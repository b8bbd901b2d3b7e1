use crate::error::{LinkError, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::{CaptureDevice, MediaFrame, MediaKind};
use crate::peer::types::{
    IceCandidate, PeerState, RemoteTrackInfo, Role, ServerConfig, SessionDescription,
    SignalingState,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

/// Offer/answer/ICE primitives of one media connection.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn add_local_tracks(&self, capture: &dyn CaptureDevice) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;

    async fn has_remote_description(&self) -> bool;

    async fn close(&self);
}

/// События транспорта для движка
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
    Track(RemoteTrackInfo),
}

/// Callback into the engine loop; bound to one session epoch by the caller.
#[derive(Clone)]
pub struct PeerEventSink(Arc<dyn Fn(PeerEvent) + Send + Sync>);

impl PeerEventSink {
    pub fn new(f: impl Fn(PeerEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: PeerEvent) {
        (self.0)(event)
    }
}

pub struct PeerContext {
    pub role: Role,
    pub events: PeerEventSink,
    /// Сюда транспорт складывает полезную нагрузку входящих треков
    pub remote_frames: broadcast::Sender<MediaFrame>,
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ctx: PeerContext) -> Result<Arc<dyn MediaTransport>>;
}

/// Peer connections backed by the `webrtc` crate.
pub struct WebRtcFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerFactory for WebRtcFactory {
    async fn create(&self, ctx: PeerContext) -> Result<Arc<dyn MediaTransport>> {
        let pc = new_peer(rtc_config(&self.ice_servers), ctx).await?;
        Ok(Arc::new(WebRtcTransport { pc }))
    }
}

/// создаём Peer и вешаем обработчики кандидатов, состояния и треков
pub async fn new_peer(config: RTCConfiguration, ctx: PeerContext) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(config).await?);
    let PeerContext {
        role,
        events,
        remote_frames,
    } = ctx;
    info!(?role, "peer connection created");

    // Trickle ICE: каждый локальный кандидат сразу уходит в документ
    let cand_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = cand_events.clone();
        Box::pin(async move {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c).await;
                    match c.to_json() {
                        Ok(init) => events.emit(PeerEvent::LocalCandidate(init.into())),
                        Err(e) => warn!("cannot serialize local candidate: {e}"),
                    }
                }
                // None означает конец сбора
                None => debug!("ICE candidate gathering completed"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    // слабая ссылка, чтобы обработчик не держал соединение живым
    let pc_stats: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!("Peer connection state changed to: {:?}", st);
        let mapped = match st {
            RTCPeerConnectionState::Connected => Some(PeerState::Connected),
            RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
            RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
            RTCPeerConnectionState::Failed => Some(PeerState::Failed),
            RTCPeerConnectionState::Closed => Some(PeerState::Closed),
            _ => None,
        };
        if matches!(mapped, Some(PeerState::Disconnected | PeerState::Failed)) {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        if let Some(state) = mapped {
            state_events.emit(PeerEvent::StateChanged(state));
        }
        Box::pin(async {})
    }));

    let track_events = events;
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let info = RemoteTrackInfo {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().to_string(),
        };
        info!(track = %info.id, kind = %info.kind, "remote track received");
        track_events.emit(PeerEvent::Track(info));

        let kind = if track.kind() == RTPCodecType::Audio {
            MediaKind::Audio
        } else {
            MediaKind::Video
        };
        let frames = remote_frames.clone();
        tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((pkt, _)) => {
                        let _ = frames.send(MediaFrame {
                            kind,
                            data: pkt.payload,
                        });
                    }
                    Err(e) => {
                        debug!("remote RTP read ended: {e}");
                        break;
                    }
                }
            }
        });
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn add_local_tracks(&self, capture: &dyn CaptureDevice) -> Result<()> {
        for track in capture.tracks() {
            let sender = self.pc.add_track(track).await?;
            // RTCP нужно вычитывать, иначе интерсепторы не работают
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        SessionDescription::from_rtc(&offer)
            .ok_or_else(|| LinkError::Transport("unexpected description type for offer".into()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        SessionDescription::from_rtc(&answer)
            .ok_or_else(|| LinkError::Transport("unexpected description type for answer".into()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(desc.into_rtc()?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(desc.into_rtc()?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Other,
        }
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("peer connection close failed: {e}");
        }
    }
}
