#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use meshcall::error::{Error, Result};
use meshcall::media::{CaptureDevices, FeedDevices, LocalStream, LocalTrack, MediaAccessError, MediaKind};
use meshcall::peer::{IceCandidate, ParticipantId, PeerConnector, PeerEventSender, PeerLink, SessionDescription};
use meshcall::{
    ClientEvent, MediaConstraints, PeerConnectionManager, RemoteStreamSink, RemoteVideoView, ServerEvent,
    SessionConfig, Signaling, SignalingDialer, SinkEvent,
};

/// In-memory native connection that records every call made on it.
#[derive(Default)]
pub struct FakeLink {
    calls: Mutex<Vec<String>>,
    closes: AtomicUsize,
    fail_remote: bool,
    /// Raises a local candidate from inside `set_local_description`, the way
    /// a real stack starts gathering there.
    gather: Option<PeerEventSender>,
}

impl FakeLink {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.record(format!("add_track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{:?}", description.kind));
        if let Some(events) = &self.gather {
            events.local_candidate(IceCandidate::new("candidate:gathered"));
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote {
            return Err(Error::Config("malformed remote description".into()));
        }
        self.record(format!("set_remote:{:?}", description.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closes() > 0
    }
}

/// Hands out [`FakeLink`]s and keeps the event senders the manager gave it,
/// so tests can raise native-connection events.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<ParticipantId, Vec<Arc<FakeLink>>>>,
    senders: Mutex<HashMap<ParticipantId, PeerEventSender>>,
    failing: HashSet<ParticipantId>,
    gathering: bool,
}

impl FakeConnector {
    /// Links to these peers reject the remote description.
    pub fn failing_remote_for(peers: &[&str]) -> Self {
        Self {
            failing: peers.iter().map(|p| (*p).into()).collect(),
            ..Default::default()
        }
    }

    /// Links gather a local candidate while the local description is set.
    pub fn gathering() -> Self {
        Self {
            gathering: true,
            ..Default::default()
        }
    }

    /// Most recent link created for `peer`.
    pub fn link(&self, peer: &str) -> Arc<FakeLink> {
        let links = self.links.lock().unwrap();
        Arc::clone(links[&ParticipantId::from(peer)].last().unwrap())
    }

    pub fn connects(&self, peer: &str) -> usize {
        self.links
            .lock()
            .unwrap()
            .get(&ParticipantId::from(peer))
            .map_or(0, Vec::len)
    }

    pub fn sender(&self, peer: &str) -> PeerEventSender {
        self.senders.lock().unwrap()[&ParticipantId::from(peer)].clone()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, peer: &ParticipantId, events: PeerEventSender) -> Result<Arc<dyn PeerLink>> {
        let link = Arc::new(FakeLink {
            fail_remote: self.failing.contains(peer),
            gather: self.gathering.then(|| events.clone()),
            ..Default::default()
        });
        self.links
            .lock()
            .unwrap()
            .entry(peer.clone())
            .or_default()
            .push(Arc::clone(&link));
        self.senders.lock().unwrap().insert(peer.clone(), events);
        Ok(link)
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    sent: Mutex<Vec<ClientEvent>>,
    closed: AtomicBool,
}

impl FakeSignaling {
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn offers_to(&self, peer: &str) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::Offer { target, .. } if target.as_str() == peer))
            .count()
    }

    pub fn answers_to(&self, peer: &str) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::Answer { target, .. } if target.as_str() == peer))
            .count()
    }

    /// Drain what has been sent so far.
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Signaling for FakeSignaling {
    fn send(&self, event: ClientEvent) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SignalingDelivery("closed".into()));
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDialer {
    pub signaling: Arc<FakeSignaling>,
    inbound: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
    dials: AtomicUsize,
    unreachable: bool,
}

impl FakeDialer {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Simulate the relay dropping the connection.
    pub fn hang_up(&self) {
        self.inbound.lock().unwrap().take();
    }

    pub fn deliver(&self, event: ServerEvent) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl SignalingDialer for FakeDialer {
    async fn dial(&self, url: &str) -> Result<(Arc<dyn Signaling>, mpsc::UnboundedReceiver<ServerEvent>)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(Error::SignalingDelivery(format!("connecting to {}: refused", url)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap() = Some(tx);
        let signaling: Arc<dyn Signaling> = self.signaling.clone();
        Ok((signaling, rx))
    }
}

/// Camera access refused by the user.
pub struct DeniedDevices;

#[async_trait]
impl CaptureDevices for DeniedDevices {
    async fn open(&self, _: &MediaConstraints) -> std::result::Result<LocalStream, MediaAccessError> {
        Err(MediaAccessError::PermissionDenied(MediaKind::Video))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<RemoteVideoView> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::RemoteStream(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<ParticipantId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::RemoteStreamRemoved(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl RemoteStreamSink for RecordingSink {
    fn on_remote_stream(&self, view: &RemoteVideoView) {
        self.events.lock().unwrap().push(SinkEvent::RemoteStream(view.clone()));
    }

    fn on_remote_stream_removed(&self, id: &ParticipantId) {
        self.events.lock().unwrap().push(SinkEvent::RemoteStreamRemoved(id.clone()));
    }

    fn on_local_media_error(&self, error: &MediaAccessError) {
        self.events.lock().unwrap().push(SinkEvent::LocalMediaError(error.clone()));
    }
}

/// One client wired to fakes.
pub struct Client {
    pub manager: PeerConnectionManager,
    pub connector: Arc<FakeConnector>,
    pub dialer: FakeDialer,
    pub sink: Arc<RecordingSink>,
}

impl Client {
    pub fn new(config: SessionConfig) -> Self {
        Self::with(config, FakeConnector::default(), Arc::new(FeedDevices))
    }

    pub fn with(config: SessionConfig, connector: FakeConnector, devices: Arc<dyn CaptureDevices>) -> Self {
        let connector = Arc::new(connector);
        let sink = Arc::new(RecordingSink::default());
        let manager = PeerConnectionManager::new(config, connector.clone(), devices, sink.clone());
        Self {
            manager,
            connector,
            dialer: FakeDialer::default(),
            sink,
        }
    }

    /// A client that has joined `abc123` and cleared its join message.
    pub async fn joined(name: &str) -> Self {
        let mut client = Self::new(SessionConfig::new("abc123", name));
        client.manager.start_session(&client.dialer).await.unwrap();
        client.signaling().take();
        client
    }

    pub fn signaling(&self) -> &FakeSignaling {
        &self.dialer.signaling
    }

    pub async fn deliver(&mut self, event: ServerEvent) -> Vec<meshcall::ProtocolRace> {
        let races = self.manager.handle_event(event).await;
        self.settle().await;
        races
    }

    /// Let negotiation tasks run and apply whatever they reported.
    pub async fn settle(&mut self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
            self.manager.process_pending_peer_events().unwrap();
        }
    }
}
