//! Local media acquisition.
//!
//! The engine never talks to camera hardware directly; it asks a
//! [`MediaDevices`] implementation for a [`CaptureDevice`] that exposes the
//! outgoing tracks, a frame tap for recording and the zoom control.

use crate::error::{LinkError, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const FRAME_TAP_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// One encoded media unit flowing from a stream to the recorder.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    // задняя камера, 1280x720, со звуком
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            ideal_width: 1280,
            ideal_height: 720,
            audio: true,
        }
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_camera(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureDevice>>;

    /// Microphone permission for the viewer side. Callers treat failure as
    /// non-fatal.
    async fn request_microphone(&self) -> Result<()>;
}

pub trait CaptureDevice: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>>;

    fn frames(&self) -> broadcast::Receiver<MediaFrame>;

    /// `None` when the camera has no zoom capability.
    fn zoom_range(&self) -> Option<RangeInclusive<f64>>;

    /// Applies a zoom constraint, returning the level actually set.
    fn apply_zoom(&self, level: f64) -> Result<f64>;

    fn is_active(&self) -> bool;

    fn stop(&self);
}

/// Devices that always fail, for hosts without a camera.
pub struct UnavailableDevices;

#[async_trait]
impl MediaDevices for UnavailableDevices {
    async fn open_camera(&self, _constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureDevice>> {
        Err(LinkError::Hardware("no camera available".into()))
    }

    async fn request_microphone(&self) -> Result<()> {
        Err(LinkError::Hardware("no microphone available".into()))
    }
}

/// Synthetic camera producing a deterministic frame pattern at a fixed
/// cadence on VP8/Opus tracks.
#[derive(Debug, Clone)]
pub struct TestPatternDevices {
    pub frame_bytes: usize,
    pub frame_interval: Duration,
}

impl Default for TestPatternDevices {
    fn default() -> Self {
        Self {
            frame_bytes: 1200,
            frame_interval: Duration::from_millis(33),
        }
    }
}

#[async_trait]
impl MediaDevices for TestPatternDevices {
    async fn open_camera(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureDevice>> {
        info!(
            "opening test pattern camera {}x{} facing={:?} audio={}",
            constraints.ideal_width, constraints.ideal_height, constraints.facing, constraints.audio
        );
        let camera: Arc<dyn CaptureDevice> = Arc::new(TestPatternCamera::start(
            self.frame_bytes,
            self.frame_interval,
            constraints.audio,
        ));
        Ok(camera)
    }

    async fn request_microphone(&self) -> Result<()> {
        Ok(())
    }
}

pub struct TestPatternCamera {
    video: Arc<TrackLocalStaticSample>,
    audio: Option<Arc<TrackLocalStaticSample>>,
    frames: broadcast::Sender<MediaFrame>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TestPatternCamera {
    pub const ZOOM_RANGE: RangeInclusive<f64> = 1.0..=8.0;

    fn start(frame_bytes: usize, frame_interval: Duration, with_audio: bool) -> Self {
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "camlink-video".to_owned(),
            "camlink".to_owned(),
        ));
        let audio = with_audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "camlink-audio".to_owned(),
                "camlink".to_owned(),
            ))
        });
        let (frames, _) = broadcast::channel(FRAME_TAP_CAPACITY);

        let pump = tokio::spawn(pump_pattern(
            video.clone(),
            audio.clone(),
            frames.clone(),
            frame_bytes,
            frame_interval,
        ));

        Self {
            video,
            audio,
            frames,
            pump: Mutex::new(Some(pump)),
        }
    }
}

async fn pump_pattern(
    video: Arc<TrackLocalStaticSample>,
    audio: Option<Arc<TrackLocalStaticSample>>,
    frames: broadcast::Sender<MediaFrame>,
    frame_bytes: usize,
    frame_interval: Duration,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    let mut seq: u32 = 0;
    loop {
        ticker.tick().await;
        seq = seq.wrapping_add(1);

        let mut buf = BytesMut::with_capacity(frame_bytes);
        buf.put_u32(seq);
        while buf.len() < frame_bytes {
            buf.put_u8((seq as usize + buf.len()) as u8);
        }
        buf.truncate(frame_bytes);
        let data = buf.freeze();

        // write_sample без привязанного sender'а просто ничего не отправляет
        let sample = Sample {
            data: data.clone(),
            duration: frame_interval,
            ..Default::default()
        };
        if let Err(e) = video.write_sample(&sample).await {
            debug!("video write_sample failed: {e}");
        }
        let _ = frames.send(MediaFrame {
            kind: MediaKind::Video,
            data,
        });

        if let Some(audio) = &audio {
            let silence = Bytes::from_static(&[0xf8, 0xff, 0xfe]);
            let sample = Sample {
                data: silence.clone(),
                duration: frame_interval,
                ..Default::default()
            };
            if let Err(e) = audio.write_sample(&sample).await {
                debug!("audio write_sample failed: {e}");
            }
            let _ = frames.send(MediaFrame {
                kind: MediaKind::Audio,
                data: silence,
            });
        }
    }
}

impl CaptureDevice for TestPatternCamera {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = vec![self.video.clone()];
        if let Some(audio) = &self.audio {
            tracks.push(audio.clone());
        }
        tracks
    }

    fn frames(&self) -> broadcast::Receiver<MediaFrame> {
        self.frames.subscribe()
    }

    fn zoom_range(&self) -> Option<RangeInclusive<f64>> {
        Some(Self::ZOOM_RANGE)
    }

    fn apply_zoom(&self, level: f64) -> Result<f64> {
        // синтетическая камера только ограничивает значение диапазоном
        Ok(level.clamp(*Self::ZOOM_RANGE.start(), *Self::ZOOM_RANGE.end()))
    }

    fn is_active(&self) -> bool {
        self.pump
            .lock()
            .map(|p| p.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    fn stop(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pattern_camera_feeds_the_frame_tap() {
        let devices = TestPatternDevices {
            frame_bytes: 500,
            frame_interval: Duration::from_millis(10),
        };
        let camera = devices.open_camera(&CaptureConstraints::default()).await.unwrap();
        let mut frames = camera.frames();

        let frame = loop {
            let frame = frames.recv().await.unwrap();
            if frame.kind == MediaKind::Video {
                break frame;
            }
        };
        assert_eq!(frame.data.len(), 500);
        assert_eq!(camera.tracks().len(), 2);
        assert!(camera.is_active());

        camera.stop();
        assert!(!camera.is_active());
    }

    #[tokio::test]
    async fn zoom_is_clamped_to_device_range() {
        let camera = TestPatternDevices::default()
            .open_camera(&CaptureConstraints::default())
            .await
            .unwrap();
        assert_eq!(camera.apply_zoom(2.5).unwrap(), 2.5);
        assert_eq!(camera.apply_zoom(20.0).unwrap(), 8.0);
        assert_eq!(camera.apply_zoom(0.1).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unavailable_devices_report_hardware_error() {
        let result = UnavailableDevices.open_camera(&CaptureConstraints::default()).await;
        assert!(matches!(result, Err(LinkError::Hardware(_))));
    }
}
