//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use cete::core::driver::MoveDriver;
use cete::core::rules::{ChessRules, IllegalMove, Outcome, RulesEngine, Turn};
use cete::error::DriverError;
use shakmaty::uci::UciMove;
use shakmaty::{Chess, Move};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

pub const FOOLS_MATE_WHITE: &[&str] = &["f2f3", "g2g4"];
pub const FOOLS_MATE_BLACK: &[&str] = &["e7e5", "d8h4"];

/// Plays a fixed list of UCI moves, one per request
pub struct ScriptedDriver {
    name: String,
    moves: Vec<String>,
    calls: usize,
    fail_at: Option<usize>,
    delay: Option<Duration>,
    cancel_at: Option<(usize, CancellationToken)>,
    pub terminated: bool,
}

impl ScriptedDriver {
    pub fn new(name: &str, moves: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            moves: moves.iter().map(|m| m.to_string()).collect(),
            calls: 0,
            fail_at: None,
            delay: None,
            cancel_at: None,
            terminated: false,
        }
    }

    /// The `call`-th request (1-based) fails with `DriverError::Exited`.
    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancels `token` while answering the `call`-th request.
    pub fn cancelling_at(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((call, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[async_trait]
impl MoveDriver for ScriptedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, _options: &BTreeMap<String, String>) -> Result<(), DriverError> {
        Ok(())
    }

    async fn compute_move(&mut self, position: &Chess, _budget: Duration) -> Result<Move, DriverError> {
        self.calls += 1;
        if self.fail_at == Some(self.calls) {
            return Err(DriverError::Exited);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((call, token)) = &self.cancel_at {
            if *call == self.calls {
                token.cancel();
            }
        }

        let reply = self
            .moves
            .get(self.calls - 1)
            .ok_or(DriverError::NoMove)?;
        let uci: UciMove = reply
            .parse()
            .map_err(|_| DriverError::Protocol(format!("bad scripted move {reply}")))?;
        uci.to_move(position)
            .map_err(|_| DriverError::IllegalMove { mv: reply.clone() })
    }

    async fn terminate(&mut self) {
        self.terminated = true;
    }
}

/// Always answers with the same move, legal or not
pub struct FixedDriver(pub Move);

#[async_trait]
impl MoveDriver for FixedDriver {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn initialize(&mut self, _options: &BTreeMap<String, String>) -> Result<(), DriverError> {
        Ok(())
    }

    async fn compute_move(&mut self, _position: &Chess, _budget: Duration) -> Result<Move, DriverError> {
        Ok(self.0.clone())
    }

    async fn terminate(&mut self) {}
}

/// Rules engine that cannot tell whose turn it is
pub struct CorruptRules(pub ChessRules);

impl RulesEngine for CorruptRules {
    fn current_turn(&self) -> Turn {
        Turn::Invalid
    }

    fn apply_move(&mut self, mv: &Move) -> Result<(), IllegalMove> {
        self.0.apply_move(mv)
    }

    fn outcome(&self) -> Outcome {
        self.0.outcome()
    }

    fn position(&self) -> &Chess {
        self.0.position()
    }
}

/// Sends `POST /start` and returns the raw HTTP response.
pub async fn post_start(addr: SocketAddr) -> String {
    http_request(addr, "POST", "/start").await
}

/// Sends a bodiless request and returns the raw HTTP response.
pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}
