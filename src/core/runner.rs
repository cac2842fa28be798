/// Match runner: drives the turn loop between two move drivers
use shakmaty::Move;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastServer, ServeErrors};
use crate::config::{BroadcastSettings, MatchSettings};
use crate::core::driver::MoveDriver;
use crate::core::rules::{uci, Outcome, RulesEngine, Side};
use crate::error::{DriverError, MatchError};

/// One contest: the rules engine's state plus every accepted move
#[derive(Debug)]
pub struct Match<R> {
    rules: R,
    moves: Vec<Move>,
}

impl<R: RulesEngine> Match<R> {
    pub fn new(rules: R) -> Self {
        Self {
            rules,
            moves: Vec::new(),
        }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn into_rules(self) -> R {
        self.rules
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    pub fn outcome(&self) -> Outcome {
        self.rules.outcome()
    }
}

/// Why the turn loop returned
#[derive(Debug)]
pub enum Stop {
    /// The rules engine reported a terminal outcome.
    Decided(Outcome),
    /// The caller cancelled; not an error.
    Cancelled,
    /// A driver failed, a move was rejected or the rules engine misbehaved.
    Failed(MatchError),
}

/// Final state of a match, partial when it did not reach an outcome
#[derive(Debug)]
pub struct MatchReport<R> {
    pub game: Match<R>,
    pub stop: Stop,
}

impl<R> MatchReport<R> {
    pub fn error(&self) -> Option<&MatchError> {
        match &self.stop {
            Stop::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.stop, Stop::Cancelled)
    }

    pub fn into_result(self) -> (Match<R>, Result<(), MatchError>) {
        match self.stop {
            Stop::Failed(e) => (self.game, Err(e)),
            Stop::Decided(_) | Stop::Cancelled => (self.game, Ok(())),
        }
    }
}

/// Broadcast attached to a running match. Its failures never reach the match.
struct LiveView {
    server: BroadcastServer,
    errors: ServeErrors,
    detached: bool,
}

impl LiveView {
    fn report(&mut self, mv: &Move, position: &shakmaty::Chess) {
        if self.detached {
            return;
        }
        if let Some(e) = self.errors.try_take() {
            warn!(error = %e, "live broadcast lost, continuing without viewers");
            self.detached = true;
            return;
        }
        if let Err(e) = self.server.publish(mv, position) {
            warn!(error = %e, "failed to publish move");
        }
    }
}

/// Asks the mover on turn for a move, applies it, repeats.
///
/// Drivers must already be initialized; terminating them is left to the
/// caller, which owns them.
pub struct MatchRunner<'a> {
    white: &'a mut dyn MoveDriver,
    black: &'a mut dyn MoveDriver,
    settings: MatchSettings,
}

impl<'a> MatchRunner<'a> {
    pub fn new(
        white: &'a mut dyn MoveDriver,
        black: &'a mut dyn MoveDriver,
        settings: MatchSettings,
    ) -> Self {
        Self {
            white,
            black,
            settings,
        }
    }

    /// Plays from the position held by `rules` until it is decided, the match
    /// fails, or `cancel` fires.
    pub async fn run<R: RulesEngine>(&mut self, cancel: &CancellationToken, rules: R) -> MatchReport<R> {
        let mut game = Match::new(rules);
        let stop = self.play(cancel, &mut game, None).await;
        MatchReport { game, stop }
    }

    /// Like [`MatchRunner::run`], streaming every move to a broadcast server
    /// started with `settings`. The first move waits for a viewer to press
    /// start.
    pub async fn run_with_broadcast<R: RulesEngine>(
        &mut self,
        cancel: &CancellationToken,
        rules: R,
        settings: &BroadcastSettings,
    ) -> MatchReport<R> {
        match BroadcastServer::start(settings).await {
            Ok((server, errors)) => self.run_with_server(cancel, rules, server, errors).await,
            Err(e) => MatchReport {
                game: Match::new(rules),
                stop: Stop::Failed(e.into()),
            },
        }
    }

    /// Like [`MatchRunner::run_with_broadcast`] for a server the caller
    /// already started. The server is shut down before returning.
    pub async fn run_with_server<R: RulesEngine>(
        &mut self,
        cancel: &CancellationToken,
        rules: R,
        server: BroadcastServer,
        mut errors: ServeErrors,
    ) -> MatchReport<R> {
        let mut game = Match::new(rules);
        if let Err(e) = server.reset(game.rules.position()) {
            warn!(error = %e, "failed to send starting position");
        }
        let detached = match server.await_start(cancel, &mut errors).await {
            Ok(()) => false,
            Err(e) => {
                warn!(error = %e, "live broadcast lost before start, continuing without viewers");
                true
            }
        };

        let mut view = LiveView {
            server,
            errors,
            detached,
        };
        let stop = self.play(cancel, &mut game, Some(&mut view)).await;

        if let Err(e) = view.server.shutdown().await {
            warn!(error = %e, "broadcast shutdown failed");
        }
        MatchReport { game, stop }
    }

    async fn play<R: RulesEngine>(
        &mut self,
        cancel: &CancellationToken,
        game: &mut Match<R>,
        mut view: Option<&mut LiveView>,
    ) -> Stop {
        info!(white = self.white.name(), black = self.black.name(), "match started");

        while !game.outcome().is_decided() {
            if cancel.is_cancelled() {
                info!(moves = game.move_count(), "match cancelled");
                return Stop::Cancelled;
            }

            let mv = match self.play_move(game).await {
                Ok(mv) => mv,
                Err(e) => {
                    warn!(error = %e, moves = game.move_count(), "match aborted");
                    return Stop::Failed(e);
                }
            };

            if let Some(view) = view.as_deref_mut() {
                view.report(&mv, game.rules.position());
            }
        }

        let outcome = game.outcome();
        info!(%outcome, moves = game.move_count(), "match finished");
        Stop::Decided(outcome)
    }

    /// One turn. On error the match is left exactly as it was.
    async fn play_move<R: RulesEngine>(&mut self, game: &mut Match<R>) -> Result<Move, MatchError> {
        let side = game.rules.current_turn().side().ok_or_else(|| {
            MatchError::InternalInconsistency("rules engine reported no side to move".to_string())
        })?;

        let driver: &mut dyn MoveDriver = match side {
            Side::White => &mut *self.white,
            Side::Black => &mut *self.black,
        };

        let deadline = self.settings.move_deadline();
        let request = driver.compute_move(game.rules.position(), self.settings.move_time);
        let mv = match tokio::time::timeout(deadline, request).await {
            Ok(Ok(mv)) => mv,
            // the driver could not even express the move against the position
            Ok(Err(DriverError::IllegalMove { mv })) => {
                return Err(MatchError::IllegalMove {
                    side,
                    mv,
                    reason: "not legal in the current position".to_string(),
                })
            }
            Ok(Err(source)) => return Err(MatchError::Driver { side, source }),
            Err(_) => {
                return Err(MatchError::Driver {
                    side,
                    source: DriverError::Timeout(deadline),
                })
            }
        };

        game.rules
            .apply_move(&mv)
            .map_err(|rejected| MatchError::IllegalMove {
                side,
                mv: rejected.mv,
                reason: rejected.reason,
            })?;

        debug!(%side, mv = %uci(&mv), ply = game.moves.len() + 1, "move played");
        game.moves.push(mv.clone());
        Ok(mv)
    }
}
