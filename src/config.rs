//! Match configuration.
//!
//! A match is described either by command line flags or by a TOML match
//! file:
//!
//! ```toml
//! time = 500            # per-move budget in milliseconds
//!
//! [white]
//! engine = "stockfish"
//! options = { Threads = "2" }
//!
//! [black]
//! engine = "/usr/local/bin/badger"
//! args = ["--uci"]
//! ```

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_ENGINE: &str = "stockfish";
pub const DEFAULT_PORT: u16 = 6061;
pub const DEFAULT_MOVE_TIME: Duration = Duration::from_millis(500);
/// Slack granted on top of the move time before a driver counts as stuck.
pub const DEFAULT_MOVE_OVERHEAD: Duration = Duration::from_secs(1);

/// How to launch one engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    pub engine: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl PlayerConfig {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            args: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    fn validate(&self, side: &str) -> Result<(), ConfigError> {
        if self.engine.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{side} engine command is empty")));
        }
        Ok(())
    }
}

/// Timing of the turn loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    pub move_time: Duration,
    pub move_overhead: Duration,
}

impl MatchSettings {
    pub fn new(move_time: Duration) -> Self {
        Self {
            move_time,
            move_overhead: DEFAULT_MOVE_OVERHEAD,
        }
    }

    /// Hard deadline for a single move request.
    pub fn move_deadline(&self) -> Duration {
        self.move_time + self.move_overhead
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::new(DEFAULT_MOVE_TIME)
    }
}

/// Everything needed to start a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub white: PlayerConfig,
    pub black: PlayerConfig,
    pub settings: MatchSettings,
    /// Starting position; the standard one when absent.
    pub start_fen: Option<String>,
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.white.validate("white")?;
        self.black.validate("black")?;
        if self.settings.move_time.is_zero() {
            return Err(ConfigError::Invalid("move time must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: MatchFile = toml::from_str(contents)?;
        let config = Self {
            white: file.white,
            black: file.black,
            settings: MatchSettings::new(Duration::from_millis(file.time)),
            start_fen: file.fen,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatchFile {
    white: PlayerConfig,
    black: PlayerConfig,
    /// Milliseconds per move.
    time: u64,
    #[serde(default)]
    fen: Option<String>,
}

/// Listener and queue settings of the live broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    pub addr: SocketAddr,
    /// Messages buffered per viewer before it is disconnected.
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl BroadcastSettings {
    pub fn on_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            queue_capacity: 16,
            write_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
