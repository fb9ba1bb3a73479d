//! Full-mesh WebRTC call client.
//!
//! Every participant in a room holds one direct connection to every other
//! participant. A relay server forwards join notifications, offers, answers
//! and ICE candidates between them; [`PeerConnectionManager`] turns that
//! traffic into one negotiated connection per remote participant and reports
//! remote streams to a [`RemoteStreamSink`].

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod media;
mod negotiation;
pub mod peer;
pub mod room;
pub mod signaling;
pub mod sink;
pub mod webrtc;

pub use config::{IceServer, MediaConstraints, SessionConfig};
pub use connection::{PeerConnectionEntry, PeerState, Role};
pub use error::{Error, ProtocolRace, Result};
pub use manager::{PeerConnectionManager, SessionPhase};
pub use media::{CaptureDevices, FeedDevices, LocalMediaSource, MediaAccessError, MediaKind, RemoteStream};
pub use peer::{ParticipantId, PeerConnector, PeerLink};
pub use room::{ConnectionRegistry, RoomState};
pub use signaling::{ClientEvent, ServerEvent, Signaling, SignalingDialer, WsDialer};
pub use sink::{ChannelSink, RemoteStreamSink, RemoteVideoView, RemoteVideos, SinkEvent};
pub use self::webrtc::WebRtcConnector;
