//! `meshcall` joins a room on a relay and keeps a full-mesh call going until
//! Ctrl+C.
//!
//! ```bash
//! meshcall --relay-url ws://localhost:8080 --room abc123 --name Alice
//! MESHCALL_ROOM=abc123 meshcall --config meshcall.toml --no-video
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use meshcall::config::random_room_id;
use meshcall::{
    ChannelSink, FeedDevices, IceServer, PeerConnectionManager, RemoteVideos, SessionConfig, SinkEvent,
    WebRtcConnector, WsDialer,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML session config; command line options override it
    #[arg(short, long, env = "MESHCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long, env = "MESHCALL_RELAY_URL")]
    relay_url: Option<String>,

    /// Room to join; a random one is created when omitted
    #[arg(short, long, env = "MESHCALL_ROOM")]
    room: Option<String>,

    /// Name shown to other participants
    #[arg(short, long, env = "MESHCALL_NAME")]
    name: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Vec<String>,

    #[arg(long, requires_all = ["turn_username", "turn_credential"])]
    turn_url: Option<String>,

    #[arg(long, env = "MESHCALL_TURN_USERNAME")]
    turn_username: Option<String>,

    #[arg(long, env = "MESHCALL_TURN_CREDENTIAL")]
    turn_credential: Option<String>,

    #[arg(long)]
    no_audio: bool,

    #[arg(long)]
    no_video: bool,

    /// Drop peers that have not finished negotiating after this many seconds
    #[arg(long)]
    negotiation_timeout: Option<u64>,
}

impl Args {
    fn session_config(self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_toml_file(path)?,
            None => SessionConfig::default(),
        };

        if let Some(url) = self.relay_url {
            config.relay_url = url;
        }
        if let Some(room) = self.room {
            config.room_id = room;
        }
        if config.room_id.trim().is_empty() {
            config.room_id = random_room_id();
        }
        if let Some(name) = self.name {
            config.display_name = name;
        }
        if !self.stun_servers.is_empty() {
            config.ice_servers.retain(|s| s.username.is_some());
            config.ice_servers.extend(self.stun_servers.into_iter().map(IceServer::stun));
        }
        if let (Some(url), Some(username), Some(credential)) = (self.turn_url, self.turn_username, self.turn_credential) {
            config.ice_servers.push(IceServer::turn(url, username, credential));
        }
        if self.no_audio {
            config.media.audio = false;
        }
        if self.no_video {
            config.media.video = false;
        }
        if self.negotiation_timeout.is_some() {
            config.negotiation_timeout_secs = self.negotiation_timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshcall=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().session_config()?;
    info!(room = %config.room_id, relay = %config.relay_url, "share this room id to invite others");

    let connector = WebRtcConnector::new(&config.ice_servers).context("setting up WebRTC")?;
    let (sink, mut sink_events) = ChannelSink::new();
    let mut manager = PeerConnectionManager::new(config, Arc::new(connector), Arc::new(FeedDevices), Arc::new(sink));

    tokio::spawn(async move {
        let mut videos = RemoteVideos::default();
        while let Some(event) = sink_events.recv().await {
            match &event {
                SinkEvent::RemoteStream(view) => info!(
                    peer = %view.id,
                    name = view.display_name.as_deref().unwrap_or("-"),
                    tracks = view.stream.len(),
                    "remote stream"
                ),
                SinkEvent::RemoteStreamRemoved(id) => info!(peer = %id, "remote stream removed"),
                SinkEvent::LocalMediaError(e) => warn!("local media error: {}", e),
            }
            videos.apply(&event);
            info!(participants = videos.len(), "remote videos");
        }
    });

    let inbound = manager.start_session(&WsDialer).await.context("starting session")?;

    let outcome = tokio::select! {
        result = manager.run(inbound) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(result) => result.context("session ended")?,
        None => {
            info!("interrupted, leaving room");
            manager.end_session();
        }
    }
    Ok(())
}
