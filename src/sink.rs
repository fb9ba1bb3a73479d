//! Presentation-facing surface: what the UI (or any other consumer) learns
//! about remote streams and local media failures.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::media::{MediaAccessError, RemoteStream};
use crate::peer::ParticipantId;

/// What a remote participant's video tile shows. Exists only while the
/// participant's connection entry exists.
#[derive(Debug, Clone)]
pub struct RemoteVideoView {
    pub id: ParticipantId,
    pub stream: RemoteStream,
    pub display_name: Option<String>,
}

pub trait RemoteStreamSink: Send + Sync {
    /// A peer's aggregate stream appeared or gained a track.
    fn on_remote_stream(&self, view: &RemoteVideoView);

    fn on_remote_stream_removed(&self, id: &ParticipantId);

    fn on_local_media_error(&self, error: &MediaAccessError);
}

#[derive(Debug, Clone)]
pub enum SinkEvent {
    RemoteStream(RemoteVideoView),
    RemoteStreamRemoved(ParticipantId),
    LocalMediaError(MediaAccessError),
}

/// Forwards every callback onto a channel so a UI task can consume them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RemoteStreamSink for ChannelSink {
    fn on_remote_stream(&self, view: &RemoteVideoView) {
        let _ = self.tx.send(SinkEvent::RemoteStream(view.clone()));
    }

    fn on_remote_stream_removed(&self, id: &ParticipantId) {
        let _ = self.tx.send(SinkEvent::RemoteStreamRemoved(id.clone()));
    }

    fn on_local_media_error(&self, error: &MediaAccessError) {
        let _ = self.tx.send(SinkEvent::LocalMediaError(error.clone()));
    }
}

/// The set of remote tiles, keyed by participant.
#[derive(Debug, Default)]
pub struct RemoteVideos {
    views: HashMap<ParticipantId, RemoteVideoView>,
}

impl RemoteVideos {
    pub fn apply(&mut self, event: &SinkEvent) {
        match event {
            SinkEvent::RemoteStream(view) => {
                self.views.insert(view.id.clone(), view.clone());
            }
            SinkEvent::RemoteStreamRemoved(id) => {
                self.views.remove(id);
            }
            SinkEvent::LocalMediaError(_) => {}
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&RemoteVideoView> {
        self.views.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.views.keys()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
