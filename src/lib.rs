pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod uci;

// Re-export for convenience
pub use crate::broadcast::{BroadcastServer, ServerState};
pub use crate::core::driver::MoveDriver;
pub use crate::core::rules::{ChessRules, Outcome, RulesEngine, Side, Turn};
pub use crate::core::runner::{Match, MatchReport, MatchRunner, Stop};
pub use crate::error::{BroadcastError, ConfigError, DriverError, MatchError};
