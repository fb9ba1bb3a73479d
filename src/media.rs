//! Local capture tracks, the session-wide local media source, and the
//! aggregate streams built from tracks arriving from remote peers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::MediaConstraints;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaAccessError {
    #[error("permission to capture {0} was denied")]
    PermissionDenied(MediaKind),
    #[error("no {0} capture device available")]
    NoDevice(MediaKind),
    #[error("neither audio nor video was requested")]
    NothingRequested,
    #[error("capture device failed: {0}")]
    Device(String),
}

/// An outbound track shared by every peer connection of the session.
///
/// Disabling a track keeps it attached everywhere but drops the samples
/// written to it; stopping is terminal.
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let capability = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(capability, id.clone(), stream_id.into()));

        Self {
            id,
            kind,
            rtc,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// The webrtc-rs track to attach to a native connection.
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Write one encoded frame. Returns `false` when the frame was dropped
    /// because the track is disabled or stopped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.rtc.write_sample(sample).await?;
        Ok(true)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { id: id.into(), tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }
}

/// Opens capture for the requested kinds of media.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> std::result::Result<LocalStream, MediaAccessError>;
}

/// Tracks fed by the host application: it encodes captured frames itself and
/// writes them with [`LocalTrack::write_sample`].
#[derive(Debug, Default)]
pub struct FeedDevices;

#[async_trait]
impl CaptureDevices for FeedDevices {
    async fn open(&self, constraints: &MediaConstraints) -> std::result::Result<LocalStream, MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::NothingRequested);
        }

        let stream_id = format!("local-{:08x}", rand::random::<u32>());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Audio, "audio", stream_id.clone())));
        }
        if constraints.video {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Video, "video", stream_id.clone())));
        }
        Ok(LocalStream::new(stream_id, tracks))
    }
}

/// Owns the local stream for the lifetime of a session. Only this type stops
/// or re-enables local tracks; connections merely attach them.
pub struct LocalMediaSource {
    devices: Arc<dyn CaptureDevices>,
    stream: Option<LocalStream>,
    muted: bool,
    camera_off: bool,
    released: bool,
}

impl LocalMediaSource {
    pub fn new(devices: Arc<dyn CaptureDevices>) -> Self {
        Self {
            devices,
            stream: None,
            muted: false,
            camera_off: false,
            released: false,
        }
    }

    pub async fn acquire(&mut self, constraints: &MediaConstraints) -> std::result::Result<&LocalStream, MediaAccessError> {
        if self.released {
            return Err(MediaAccessError::Device("local media already released".into()));
        }
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream = self.devices.open(constraints).await?;
                info!(stream = %stream.id(), tracks = stream.tracks().len(), "acquired local media");
                stream
            }
        };
        let stream = self.stream.insert(stream);
        Ok(&*stream)
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        self.stream.as_ref().map(LocalStream::tracks).unwrap_or(&[])
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_camera_off(&self) -> bool {
        self.camera_off
    }

    /// Flip mute. Returns the new `muted` value; no-op without live media.
    pub fn toggle_audio(&mut self) -> bool {
        if self.live_stream().is_some() {
            self.muted = !self.muted;
            self.set_kind_enabled(MediaKind::Audio, !self.muted);
        }
        self.muted
    }

    /// Flip the camera. Returns the new `camera_off` value; no-op without
    /// live media.
    pub fn toggle_video(&mut self) -> bool {
        if self.live_stream().is_some() {
            self.camera_off = !self.camera_off;
            self.set_kind_enabled(MediaKind::Video, !self.camera_off);
        }
        self.camera_off
    }

    /// Stop every local track. Terminal for the session; repeated calls are
    /// no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(stream) = &self.stream {
            for track in stream.tracks() {
                track.stop();
            }
            debug!(stream = %stream.id(), "stopped local tracks");
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn live_stream(&self) -> Option<&LocalStream> {
        if self.released {
            None
        } else {
            self.stream.as_ref()
        }
    }

    fn set_kind_enabled(&self, kind: MediaKind, enabled: bool) {
        if let Some(stream) = &self.stream {
            for track in stream.tracks_of(kind) {
                track.set_enabled(enabled);
            }
        }
    }
}

/// A track received from a remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    stream_id: String,
    kind: MediaKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            rtp: None,
        }
    }

    pub fn from_rtp(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().into(),
            rtp: Some(track),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// The live RTP source, when this track is backed by a webrtc-rs receiver.
    pub fn rtp(&self) -> Option<&Arc<TrackRemote>> {
        self.rtp.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Aggregate of every track received from one peer. Grows, never shrinks.
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Returns `false` if a track with the same id is already part of the
    /// stream.
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &RemoteTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
