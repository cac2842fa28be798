/// Move driver capability interface
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::{Chess, Move};

use crate::error::DriverError;

/// Anything able to pick a move for a position within a time budget.
///
/// The match runner only relies on these operations; the transport behind
/// them (today a UCI child process, see [`crate::uci::UciEngine`]) stays out
/// of the orchestration code.
#[async_trait]
pub trait MoveDriver: Send {
    /// Display name used in logs and PGN tags
    fn name(&self) -> &str;

    /// Completes the startup handshake and applies the named options.
    async fn initialize(&mut self, options: &BTreeMap<String, String>) -> Result<(), DriverError>;

    /// Computes the best move for `position`, spending about `budget`.
    async fn compute_move(&mut self, position: &Chess, budget: Duration) -> Result<Move, DriverError>;

    /// Shuts the driver down. Never fails; problems are only logged.
    async fn terminate(&mut self);
}
