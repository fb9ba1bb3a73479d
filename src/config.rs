use std::path::Path;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

const ROOM_ID_LEN: usize = 6;

/// A STUN or TURN server handed to every native connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

/// Everything a session needs, supplied by the caller at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub relay_url: String,
    pub room_id: String,
    pub display_name: String,
    pub ice_servers: Vec<IceServer>,
    pub media: MediaConstraints,
    /// Peers still negotiating after this many seconds are torn down.
    /// `None` lets a stalled peer sit until it departs.
    pub negotiation_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_owned(),
            room_id: String::new(),
            display_name: DEFAULT_DISPLAY_NAME.to_owned(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
            media: MediaConstraints::default(),
            negotiation_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    /// Check the config and fill in a display name when it was left blank.
    pub fn validate(&mut self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(Error::Config("room id must not be empty".into()));
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "relay url must use ws:// or wss://, got {}",
                self.relay_url
            )));
        }
        if let Some(server) = self.ice_servers.iter().find(|s| s.urls.is_empty()) {
            return Err(Error::Config(format!("ICE server without urls: {:?}", server)));
        }
        if self.negotiation_timeout_secs == Some(0) {
            return Err(Error::Config("negotiation timeout must be positive".into()));
        }
        if self.display_name.trim().is_empty() {
            self.display_name = DEFAULT_DISPLAY_NAME.to_owned();
        }
        Ok(())
    }
}

/// A short lowercase room id to share with other participants.
pub fn random_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}
