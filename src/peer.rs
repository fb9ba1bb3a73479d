//! Port traits for native peer connections and the events they report.
//!
//! The manager never touches webrtc-rs directly; `crate::webrtc` adapts it to
//! these traits, and tests substitute in-memory links.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack};

/// Relay-assigned identifier of a connected client. Unique for the lifetime of
/// that client's relay connection, not stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// One half of an offer/answer exchange, in the browser's `{type, sdp}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Transport-level state of a native connection, independent of where the
/// offer/answer exchange is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::New => write!(f, "new"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Failed => write!(f, "failed"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// An exclusively-owned native peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the native connection. Safe to call more than once; only the
    /// first call has an effect.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Creates native connections. Implementations register their inbound-track,
/// candidate-discovered and state-change callbacks so that they report
/// through `events`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, peer: &ParticipantId, events: PeerEventSender) -> Result<Arc<dyn PeerLink>>;
}

#[derive(Debug)]
pub struct PeerEvent {
    pub peer: ParticipantId,
    /// Identifies which entry for `peer` raised the event, so that events
    /// from a connection that has since been closed are recognised as stale.
    pub generation: u64,
    pub kind: PeerEventKind,
}

#[derive(Debug)]
pub enum PeerEventKind {
    Track(RemoteTrack),
    LocalCandidate(IceCandidate),
    LinkState(LinkState),
    LocalDescription(SessionDescription),
    Negotiated,
    NegotiationFailed(String),
    TimedOut,
}

/// Handle a native connection (or a per-peer task) uses to report back to the
/// manager. Sends after the manager has gone are silently dropped.
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    peer: ParticipantId,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSender {
    pub fn new(peer: ParticipantId, generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { peer, generation, tx }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn track(&self, track: RemoteTrack) {
        self.emit(PeerEventKind::Track(track));
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn link_state(&self, state: LinkState) {
        self.emit(PeerEventKind::LinkState(state));
    }

    pub(crate) fn local_description(&self, description: SessionDescription) {
        self.emit(PeerEventKind::LocalDescription(description));
    }

    pub(crate) fn negotiated(&self) {
        self.emit(PeerEventKind::Negotiated);
    }

    pub(crate) fn negotiation_failed(&self, reason: String) {
        self.emit(PeerEventKind::NegotiationFailed(reason));
    }

    pub(crate) fn timed_out(&self) {
        self.emit(PeerEventKind::TimedOut);
    }

    fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            peer: self.peer.clone(),
            generation: self.generation,
            kind,
        });
    }
}
