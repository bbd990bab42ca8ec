use crate::game::DEFAULT_FRAME_DURATION;
use shared::CACHE_CAPACITY;
use std::time::Duration;

/// Runtime settings for the relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    /// Slots in each per-connection game data cache, capped at 256
    pub cache_capacity: usize,
    /// Silence after which a client is disconnected
    pub client_timeout: Duration,
    /// How long game data from outside the game is reflected back
    pub drop_timeout: Duration,
    /// Silence from a game member after which recent messages are resent
    pub game_timeout: Duration,
    /// Frame length lag spikes are measured against
    pub frame_duration: Duration,
    pub stats_interval: Duration,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27888,
            max_clients: 32,
            cache_capacity: CACHE_CAPACITY,
            client_timeout: Duration::from_secs(5),
            drop_timeout: Duration::from_secs(30),
            game_timeout: Duration::from_secs(1),
            frame_duration: DEFAULT_FRAME_DURATION,
            stats_interval: Duration::from_secs(60),
        }
    }
}
