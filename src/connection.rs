use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::media::{RemoteStream, RemoteTrack};
use crate::negotiation::PeerCommand;
use crate::peer::{IceCandidate, LinkState, ParticipantId, PeerEventSender, PeerLink};

/// Which side of the offer/answer exchange this client took. Fixed at
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offerer => write!(f, "offerer"),
            Role::Answerer => write!(f, "answerer"),
        }
    }
}

/// Where a peer is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Offering,
    Answering,
    /// The offer/answer exchange completed.
    Connected,
    Closed,
}

impl PeerState {
    pub fn is_negotiating(self) -> bool {
        matches!(self, PeerState::Idle | PeerState::Offering | PeerState::Answering)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Idle => write!(f, "idle"),
            PeerState::Offering => write!(f, "offering"),
            PeerState::Answering => write!(f, "answering"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything this client holds for one remote participant.
///
/// The native connection is closed exactly once: by [`close`](Self::close)
/// or, failing that, when the entry is dropped.
pub struct PeerConnectionEntry {
    id: ParticipantId,
    generation: u64,
    link: Arc<dyn PeerLink>,
    remote_stream: RemoteStream,
    role: Role,
    state: PeerState,
    link_state: LinkState,
    stalled: Option<String>,
    /// Whether our offer or answer has gone out to the relay.
    description_sent: bool,
    /// Local candidates gathered before that happened.
    held_candidates: Vec<IceCandidate>,
    events: PeerEventSender,
    commands: Option<mpsc::UnboundedSender<PeerCommand>>,
    negotiation: Option<JoinHandle<()>>,
    timeout: Option<JoinHandle<()>>,
}

impl PeerConnectionEntry {
    pub fn new(link: Arc<dyn PeerLink>, role: Role, events: PeerEventSender) -> Self {
        Self {
            id: events.peer().clone(),
            generation: events.generation(),
            link,
            remote_stream: RemoteStream::default(),
            role,
            state: PeerState::Idle,
            link_state: LinkState::New,
            stalled: None,
            description_sent: false,
            held_candidates: Vec::new(),
            events,
            commands: None,
            negotiation: None,
            timeout: None,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    /// Why negotiation stopped, if it failed. The entry stays registered.
    pub fn stalled_reason(&self) -> Option<&str> {
        self.stalled.as_deref()
    }

    pub fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    /// Hand the entry its running negotiation task.
    pub(crate) fn begin(
        &mut self,
        state: PeerState,
        commands: mpsc::UnboundedSender<PeerCommand>,
        negotiation: JoinHandle<()>,
    ) {
        self.state = state;
        self.commands = Some(commands);
        self.negotiation = Some(negotiation);
    }

    /// Queue a command for the negotiation task. Returns `false` if the task
    /// has already finished.
    pub(crate) fn dispatch(&self, command: PeerCommand) -> bool {
        match &self.commands {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    pub(crate) fn arm_timeout(&mut self, after: Duration) {
        let events = self.events.clone();
        self.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            events.timed_out();
        }));
    }

    pub(crate) fn mark_connected(&mut self) {
        self.state = PeerState::Connected;
        if let Some(timer) = self.timeout.take() {
            timer.abort();
        }
    }

    pub(crate) fn stall(&mut self, reason: String) {
        self.stalled = Some(reason);
        self.commands = None;
    }

    /// Returns the candidate if it may be relayed now, or holds it until the
    /// local description has been sent.
    pub(crate) fn release_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.description_sent {
            Some(candidate)
        } else {
            self.held_candidates.push(candidate);
            None
        }
    }

    /// Record that the local description went out and hand back the held
    /// candidates in gathering order.
    pub(crate) fn description_sent(&mut self) -> Vec<IceCandidate> {
        self.description_sent = true;
        std::mem::take(&mut self.held_candidates)
    }

    pub(crate) fn record_link_state(&mut self, state: LinkState) {
        self.link_state = state;
    }

    pub(crate) fn add_remote_track(&mut self, track: RemoteTrack) -> bool {
        self.remote_stream.add_track(track)
    }

    pub fn close(&mut self) {
        if self.state == PeerState::Closed {
            return;
        }
        self.state = PeerState::Closed;
        self.commands = None;
        if let Some(task) = self.negotiation.take() {
            task.abort();
        }
        if let Some(timer) = self.timeout.take() {
            timer.abort();
        }
        self.link.close();
        debug!(peer = %self.id, role = %self.role, "closed peer connection");
    }
}

impl Drop for PeerConnectionEntry {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PeerConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnectionEntry")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("link_state", &self.link_state)
            .field("remote_tracks", &self.remote_stream.len())
            .field("stalled", &self.stalled)
            .field("held_candidates", &self.held_candidates.len())
            .finish()
    }
}
