//! Mesh orchestration: one native connection per remote participant, driven
//! by relay events and by events the connections themselves raise.
//!
//! Whoever learns about a peer from the roster snapshot or a join
//! notification offers; whoever learns about a peer from an incoming offer
//! answers. No tie-breaking is needed, and the registry's one-entry-per-id
//! rule absorbs whatever duplicates still race in.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::connection::{PeerConnectionEntry, PeerState, Role};
use crate::error::{Error, ProtocolRace, Result};
use crate::media::{CaptureDevices, LocalMediaSource};
use crate::negotiation::{self, Opening, PeerCommand};
use crate::peer::{
    IceCandidate, LinkState, ParticipantId, PeerConnector, PeerEvent, PeerEventKind, PeerEventSender,
    SessionDescription,
};
use crate::room::{ConnectionRegistry, RoomState};
use crate::signaling::{ClientEvent, ServerEvent, Signaling, SignalingDialer};
use crate::sink::{RemoteStreamSink, RemoteVideoView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Active,
    Ended,
}

pub struct PeerConnectionManager {
    config: SessionConfig,
    phase: SessionPhase,
    registry: ConnectionRegistry,
    room: RoomState,
    media: LocalMediaSource,
    connector: Arc<dyn PeerConnector>,
    sink: Arc<dyn RemoteStreamSink>,
    signaling: Option<Arc<dyn Signaling>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerConnectionManager {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn CaptureDevices>,
        sink: Arc<dyn RemoteStreamSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            room: RoomState::new(config.room_id.clone(), config.display_name.clone()),
            config,
            phase: SessionPhase::NotStarted,
            registry: ConnectionRegistry::new(),
            media: LocalMediaSource::new(devices),
            connector,
            sink,
            signaling: None,
            events_tx,
            events_rx,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn room(&self) -> &RoomState {
        &self.room
    }

    pub fn media(&self) -> &LocalMediaSource {
        &self.media
    }

    /// Mute or unmute the microphone. Returns the new `muted` value.
    pub fn toggle_audio(&mut self) -> bool {
        self.media.toggle_audio()
    }

    /// Turn the camera off or back on. Returns the new `camera_off` value.
    pub fn toggle_video(&mut self) -> bool {
        self.media.toggle_video()
    }

    /// Current remote tiles: every peer that has delivered at least one track.
    pub fn remote_views(&self) -> Vec<RemoteVideoView> {
        self.registry
            .entries()
            .filter(|entry| !entry.remote_stream().is_empty())
            .map(|entry| RemoteVideoView {
                id: entry.id().clone(),
                stream: entry.remote_stream().clone(),
                display_name: self.room.display_name(entry.id()).map(str::to_owned),
            })
            .collect()
    }

    /// Acquire local media, connect to the relay and announce ourselves.
    ///
    /// Media failure is reported to the sink and leaves the session unstarted
    /// so the caller may retry. Relay failure ends the session.
    pub async fn start_session(&mut self, dialer: &dyn SignalingDialer) -> Result<mpsc::UnboundedReceiver<ServerEvent>> {
        match self.phase {
            SessionPhase::Active => return Err(Error::Session("already started")),
            SessionPhase::Ended => return Err(Error::Session("has ended")),
            SessionPhase::NotStarted => {}
        }

        if let Err(e) = self.media.acquire(&self.config.media).await {
            error!("could not access camera/microphone: {}", e);
            self.sink.on_local_media_error(&e);
            return Err(Error::MediaAccess(e));
        }

        let (signaling, inbound) = match dialer.dial(&self.config.relay_url).await {
            Ok(connected) => connected,
            Err(e) => {
                let e = match e {
                    Error::SignalingDelivery(_) => e,
                    other => Error::SignalingDelivery(other.to_string()),
                };
                error!("{}", e);
                self.end_session();
                return Err(e);
            }
        };
        self.signaling = Some(signaling);
        self.phase = SessionPhase::Active;

        let join = ClientEvent::JoinRoom {
            room_id: self.room.id().to_owned(),
            name: self.room.local_name().to_owned(),
        };
        if let Err(e) = self.send(join) {
            error!("{}", e);
            self.end_session();
            return Err(e);
        }
        info!(room = %self.room.id(), name = %self.room.local_name(), "joined room");
        Ok(inbound)
    }

    /// Process relay and peer events until the session ends or the relay goes
    /// away. Losing the relay cleans up and returns `SignalingDelivery`.
    pub async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<ServerEvent>) -> Result<()> {
        if self.phase != SessionPhase::Active {
            return Err(Error::Session("is not active"));
        }
        loop {
            tokio::select! {
                incoming = inbound.recv() => match incoming {
                    Some(event) => {
                        self.handle_event(event).await;
                    }
                    None => {
                        if self.phase == SessionPhase::Ended {
                            return Ok(());
                        }
                        let e = Error::SignalingDelivery("relay connection lost".into());
                        error!("{}", e);
                        self.end_session();
                        return Err(e);
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = self.handle_peer_event(event) {
                        error!("{}", e);
                        self.end_session();
                        return Err(e);
                    }
                }
            }
            if self.phase == SessionPhase::Ended {
                return Ok(());
            }
        }
    }

    /// Apply one relay event. Duplicates and out-of-order messages are
    /// discarded, logged, and returned for inspection.
    pub async fn handle_event(&mut self, event: ServerEvent) -> Vec<ProtocolRace> {
        if self.phase != SessionPhase::Active {
            debug!(phase = ?self.phase, "session not active, ignoring {:?}", event);
            return Vec::new();
        }

        let mut races = Vec::new();
        match event {
            ServerEvent::AllUsers(participants) => {
                info!(count = participants.len(), "received room roster");
                for peer in participants {
                    races.extend(self.connect_to(peer).await);
                }
            }
            ServerEvent::UserJoined { socket_id, name } => {
                info!(peer = %socket_id, name = name.as_deref().unwrap_or(""), "participant joined");
                self.room.remember(&socket_id, name);
                races.extend(self.connect_to(socket_id).await);
            }
            ServerEvent::Offer { caller, sdp } => races.extend(self.accept_offer(caller, sdp).await),
            ServerEvent::Answer { responder, sdp } => races.extend(self.accept_answer(responder, sdp)),
            ServerEvent::IceCandidate { from, candidate } => races.extend(self.accept_candidate(from, candidate)),
            ServerEvent::UserLeft { socket_id } => self.depart(&socket_id),
        }

        for race in &races {
            match race {
                ProtocolRace::UnknownCandidate(_) => debug!("{}", race),
                _ => warn!("{}", race),
            }
        }
        races
    }

    /// Apply one event raised by a native connection or negotiation task.
    /// Events from connections that have since been closed are dropped.
    pub fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        if self.phase != SessionPhase::Active {
            return Ok(());
        }
        let PeerEvent { peer, generation, kind } = event;
        let Some(entry) = self.registry.live_mut(&peer, generation) else {
            trace!(peer = %peer, "dropping event for closed peer");
            return Ok(());
        };

        match kind {
            PeerEventKind::Track(track) => {
                debug!(peer = %peer, track = track.id(), kind = %track.kind(), "remote track arrived");
                if entry.add_remote_track(track) {
                    let view = RemoteVideoView {
                        id: peer.clone(),
                        stream: entry.remote_stream().clone(),
                        display_name: self.room.display_name(&peer).map(str::to_owned),
                    };
                    self.sink.on_remote_stream(&view);
                }
            }
            PeerEventKind::LocalCandidate(candidate) => match entry.release_candidate(candidate) {
                Some(candidate) => {
                    trace!(peer = %peer, "forwarding local candidate");
                    self.send(ClientEvent::IceCandidate { target: peer, candidate })?;
                }
                None => trace!(peer = %peer, "holding local candidate until description is sent"),
            },
            PeerEventKind::LocalDescription(sdp) => {
                if !entry.state().is_negotiating() {
                    return Ok(());
                }
                let event = match entry.role() {
                    Role::Offerer => ClientEvent::Offer { target: peer.clone(), sdp },
                    Role::Answerer => ClientEvent::Answer { target: peer.clone(), sdp },
                };
                let held = entry.description_sent();
                self.send(event)?;
                for candidate in held {
                    self.send(ClientEvent::IceCandidate {
                        target: peer.clone(),
                        candidate,
                    })?;
                }
            }
            PeerEventKind::Negotiated => {
                entry.mark_connected();
                info!(peer = %peer, role = %entry.role(), "negotiation complete");
            }
            PeerEventKind::NegotiationFailed(reason) => {
                entry.stall(reason.clone());
                let e = Error::Negotiation { peer, reason };
                error!("{}", e);
            }
            PeerEventKind::LinkState(state) => {
                entry.record_link_state(state);
                match state {
                    LinkState::Failed => {
                        warn!(peer = %peer, "connection failed, tearing down");
                        self.drop_peer(&peer);
                    }
                    LinkState::Connected => info!(peer = %peer, "media connected"),
                    _ => debug!(peer = %peer, state = %state, "link state changed"),
                }
            }
            PeerEventKind::TimedOut => {
                if entry.state().is_negotiating() {
                    warn!(peer = %peer, state = %entry.state(), "negotiation timed out, tearing down");
                    self.drop_peer(&peer);
                }
            }
        }
        Ok(())
    }

    /// Handle every peer event already queued, without waiting for more.
    pub fn process_pending_peer_events(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_peer_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Close every connection, stop local media and leave the relay. Safe to
    /// call any number of times.
    pub fn end_session(&mut self) {
        for id in self.registry.close_all() {
            self.sink.on_remote_stream_removed(&id);
        }
        self.media.release();
        if let Some(signaling) = self.signaling.take() {
            signaling.close();
        }
        if self.phase != SessionPhase::Ended {
            self.phase = SessionPhase::Ended;
            info!(room = %self.room.id(), "left room");
        }
    }

    async fn connect_to(&mut self, peer: ParticipantId) -> Option<ProtocolRace> {
        if self.registry.contains(&peer) {
            return Some(ProtocolRace::DuplicatePeer(peer));
        }
        self.open(peer, Opening::Offer).await;
        None
    }

    async fn accept_offer(&mut self, caller: ParticipantId, offer: SessionDescription) -> Option<ProtocolRace> {
        if self.registry.contains(&caller) {
            return Some(ProtocolRace::DuplicateOffer(caller));
        }
        self.open(caller, Opening::Answer(offer)).await;
        None
    }

    fn accept_answer(&mut self, responder: ParticipantId, answer: SessionDescription) -> Option<ProtocolRace> {
        let Some(entry) = self.registry.get(&responder) else {
            return Some(ProtocolRace::UnknownAnswer(responder));
        };
        if entry.role() != Role::Offerer || entry.state() != PeerState::Offering {
            let state = entry.state();
            return Some(ProtocolRace::UnexpectedAnswer(responder, state));
        }
        if !entry.dispatch(PeerCommand::RemoteAnswer(answer)) {
            let state = entry.state();
            return Some(ProtocolRace::UnexpectedAnswer(responder, state));
        }
        None
    }

    fn accept_candidate(&mut self, from: ParticipantId, candidate: IceCandidate) -> Option<ProtocolRace> {
        match self.registry.get(&from) {
            Some(entry) if entry.state() != PeerState::Closed => {
                if !entry.dispatch(PeerCommand::RemoteCandidate(candidate)) {
                    trace!(peer = %from, "negotiation stopped, candidate dropped");
                }
                None
            }
            _ => Some(ProtocolRace::UnknownCandidate(from)),
        }
    }

    fn depart(&mut self, peer: &ParticipantId) {
        if self.registry.remove(peer) {
            info!(peer = %peer, "participant left");
            self.sink.on_remote_stream_removed(peer);
        }
        self.room.forget(peer);
    }

    fn drop_peer(&mut self, peer: &ParticipantId) {
        if self.registry.remove(peer) {
            self.sink.on_remote_stream_removed(peer);
        }
    }

    /// Build a connection for `peer`, register it, then start negotiating.
    async fn open(&mut self, peer: ParticipantId, opening: Opening) {
        let (role, state) = match opening {
            Opening::Offer => (Role::Offerer, PeerState::Offering),
            Opening::Answer(_) => (Role::Answerer, PeerState::Answering),
        };
        let events = PeerEventSender::new(peer.clone(), self.registry.next_generation(), self.events_tx.clone());

        let link = match self.connector.connect(&peer, events.clone()).await {
            Ok(link) => link,
            Err(e) => {
                error!(peer = %peer, role = %role, "could not create peer connection: {}", e);
                return;
            }
        };
        for track in self.media.tracks() {
            if let Err(e) = link.add_track(Arc::clone(track)).await {
                warn!(peer = %peer, track = track.id(), "could not attach local track: {}", e);
            }
        }

        if !self.registry.put(PeerConnectionEntry::new(Arc::clone(&link), role, events.clone())) {
            return;
        }
        let (commands, task) = negotiation::spawn(link, opening, events);
        match self.registry.get_mut(&peer) {
            Some(entry) => {
                entry.begin(state, commands, task);
                if let Some(after) = self.config.negotiation_timeout() {
                    entry.arm_timeout(after);
                }
                debug!(peer = %peer, role = %role, "negotiation started");
            }
            None => task.abort(),
        }
    }

    fn send(&self, event: ClientEvent) -> Result<()> {
        match &self.signaling {
            Some(signaling) => signaling.send(event),
            None => Err(Error::SignalingDelivery("not connected to the relay".into())),
        }
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.end_session();
    }
}
