use std::fmt;

use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

use crate::connection::PeerState;
use crate::media::MediaAccessError;
use crate::peer::ParticipantId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera/microphone could not be opened. Fatal to session start.
    #[error("local media unavailable: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// The relay is unreachable or the connection to it was lost. Fatal.
    #[error("signaling delivery failed: {0}")]
    SignalingDelivery(String),

    /// Offer/answer/candidate application failed for a single peer.
    #[error("negotiation with {peer} failed: {reason}")]
    Negotiation { peer: ParticipantId, reason: String },

    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("malformed signaling payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session {0}")]
    Session(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Out-of-order or duplicate signaling that is discarded without affecting
/// the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRace {
    /// An offer arrived from a participant we already have an entry for.
    DuplicateOffer(ParticipantId),
    /// An answer arrived from a participant we never offered to.
    UnknownAnswer(ParticipantId),
    /// An answer arrived for an entry that is not waiting for one.
    UnexpectedAnswer(ParticipantId, PeerState),
    /// A candidate arrived for a participant with no live entry.
    UnknownCandidate(ParticipantId),
    /// A roster snapshot or join named a participant we already track.
    DuplicatePeer(ParticipantId),
}

impl fmt::Display for ProtocolRace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolRace::DuplicateOffer(id) => write!(f, "already have a connection for {}, dropping offer", id),
            ProtocolRace::UnknownAnswer(id) => write!(f, "no peer for answer from {}", id),
            ProtocolRace::UnexpectedAnswer(id, state) => {
                write!(f, "answer from {} while {}, dropping", id, state)
            }
            ProtocolRace::UnknownCandidate(id) => write!(f, "no live peer for candidate from {}", id),
            ProtocolRace::DuplicatePeer(id) => write!(f, "already connecting to {}", id),
        }
    }
}
