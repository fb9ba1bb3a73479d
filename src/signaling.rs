use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::peer::{IceCandidate, ParticipantId, SessionDescription};

/// Messages this client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        name: String,
    },
    Offer {
        target: ParticipantId,
        sdp: SessionDescription,
    },
    Answer {
        target: ParticipantId,
        sdp: SessionDescription,
    },
    IceCandidate {
        target: ParticipantId,
        candidate: IceCandidate,
    },
}

/// Messages the relay delivers to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Participants already in the room when we joined.
    AllUsers(Vec<ParticipantId>),
    UserJoined {
        #[serde(rename = "socketId")]
        socket_id: ParticipantId,
        #[serde(default)]
        name: Option<String>,
    },
    Offer {
        caller: ParticipantId,
        sdp: SessionDescription,
    },
    Answer {
        responder: ParticipantId,
        sdp: SessionDescription,
    },
    IceCandidate {
        from: ParticipantId,
        candidate: IceCandidate,
    },
    UserLeft {
        #[serde(rename = "socketId")]
        socket_id: ParticipantId,
    },
}

/// Outbound half of a relay connection. Inbound events arrive on the
/// receiver handed out alongside it, once each and in arrival order.
pub trait Signaling: Send + Sync {
    fn send(&self, event: ClientEvent) -> Result<()>;

    /// Close the relay connection. Idempotent.
    fn close(&self);
}

#[async_trait]
pub trait SignalingDialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<(Arc<dyn Signaling>, mpsc::UnboundedReceiver<ServerEvent>)>;
}

enum Outgoing {
    Event(ClientEvent),
    Close,
}

/// JSON-over-WebSocket relay connection.
pub struct SignalingClient {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: AtomicBool,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let (ws_stream, _) = connect_async(url).await?;
        info!(url, "connected to relay");
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        // Handle outgoing messages
        tokio::spawn(async move {
            while let Some(outgoing) = outgoing_rx.recv().await {
                let event = match outgoing {
                    Outgoing::Event(event) => event,
                    Outgoing::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                match encode(&event) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            warn!("relay write failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => warn!("could not encode {:?}: {}", event, e),
                }
            }
            debug!("relay writer finished");
        });

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("relay read failed: {}", e);
                        break;
                    }
                };
                match decode(&text) {
                    Ok(event) => {
                        if incoming_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("ignoring unrecognised relay frame: {}", e),
                }
            }
            debug!("relay reader finished");
        });

        Ok((
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            incoming_rx,
        ))
    }
}

fn encode(event: &ClientEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

fn decode(text: &str) -> Result<ServerEvent> {
    Ok(serde_json::from_str(text)?)
}

impl Signaling for SignalingClient {
    fn send(&self, event: ClientEvent) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SignalingDelivery("relay connection closed".into()));
        }
        self.tx
            .send(Outgoing::Event(event))
            .map_err(|_| Error::SignalingDelivery("relay writer has stopped".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outgoing::Close);
        }
    }
}

/// Dials the relay with [`SignalingClient`].
#[derive(Debug, Default)]
pub struct WsDialer;

#[async_trait]
impl SignalingDialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<(Arc<dyn Signaling>, mpsc::UnboundedReceiver<ServerEvent>)> {
        let (client, events) = SignalingClient::connect(url).await?;
        Ok((Arc::new(client), events))
    }
}
