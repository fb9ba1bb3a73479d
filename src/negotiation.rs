//! Per-peer negotiation task.
//!
//! Each entry gets one task that owns the ordered sequence of native calls for
//! that peer: open (offer or answer), then the remote answer and remote
//! candidates as the manager forwards them. Results flow back as
//! [`PeerEvent`](crate::peer::PeerEvent)s. Aborting the task is how a closed
//! peer cancels whatever step it was suspended in.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::peer::{IceCandidate, PeerEventSender, PeerLink, SessionDescription};

#[derive(Debug)]
pub(crate) enum PeerCommand {
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
}

#[derive(Debug)]
pub(crate) enum Opening {
    Offer,
    Answer(SessionDescription),
}

pub(crate) fn spawn(
    link: Arc<dyn PeerLink>,
    opening: Opening,
    events: PeerEventSender,
) -> (mpsc::UnboundedSender<PeerCommand>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let negotiation = Negotiation {
        link,
        events,
        remote_applied: false,
        pending: Vec::new(),
    };
    let handle = tokio::spawn(negotiation.run(opening, rx));
    (tx, handle)
}

struct Negotiation {
    link: Arc<dyn PeerLink>,
    events: PeerEventSender,
    remote_applied: bool,
    /// Remote candidates that arrived before the remote description.
    pending: Vec<IceCandidate>,
}

impl Negotiation {
    async fn run(mut self, opening: Opening, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
        let opened = match opening {
            Opening::Offer => self.open_offer().await,
            Opening::Answer(offer) => self.open_answer(offer).await,
        };
        if let Err(e) = opened {
            self.fail(e.to_string());
            return;
        }

        while let Some(command) = commands.recv().await {
            if self.link.is_closed() {
                break;
            }
            match command {
                PeerCommand::RemoteAnswer(answer) => {
                    if self.remote_applied {
                        debug!(peer = %self.events.peer(), "remote description already applied, ignoring answer");
                        continue;
                    }
                    if let Err(e) = self.apply_remote(answer).await {
                        self.fail(e.to_string());
                        return;
                    }
                    self.events.negotiated();
                }
                PeerCommand::RemoteCandidate(candidate) => self.add_candidate(candidate).await,
            }
        }
    }

    async fn open_offer(&mut self) -> Result<()> {
        let offer = self.link.create_offer().await?;
        self.link.set_local_description(offer.clone()).await?;
        self.events.local_description(offer);
        Ok(())
    }

    async fn open_answer(&mut self, offer: SessionDescription) -> Result<()> {
        self.apply_remote(offer).await?;
        let answer = self.link.create_answer().await?;
        self.link.set_local_description(answer.clone()).await?;
        self.events.local_description(answer);
        self.events.negotiated();
        Ok(())
    }

    async fn apply_remote(&mut self, description: SessionDescription) -> Result<()> {
        self.link.set_remote_description(description).await?;
        self.remote_applied = true;
        for candidate in std::mem::take(&mut self.pending) {
            self.add_candidate(candidate).await;
        }
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_applied {
            self.pending.push(candidate);
            return;
        }
        if let Err(e) = self.link.add_ice_candidate(candidate).await {
            warn!(peer = %self.events.peer(), "failed to add remote candidate: {}", e);
        }
    }

    fn fail(&self, reason: String) {
        if !self.link.is_closed() {
            self.events.negotiation_failed(reason);
        }
    }
}
