//! UCI engine driver.
//!
//! Talks to a chess engine over its stdin/stdout using the subset of the
//! Universal Chess Interface a match needs:
//!
//! - `uci` / `uciok`
//! - `setoption name <k> value <v>`
//! - `isready` / `readyok`
//! - `ucinewgame`
//! - `position fen <fen>`
//! - `go movetime <ms>` / `bestmove <move>`
//! - `quit`

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::uci::UciMove;
use shakmaty::{Chess, Move};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::PlayerConfig;
use crate::core::driver::MoveDriver;
use crate::core::rules::{fen, Side};
use crate::error::DriverError;

const QUIT_GRACE: Duration = Duration::from_secs(2);

/// A running engine process
pub struct UciEngine {
    name: String,
    side: Side,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    /// Launches the engine that plays `side`. Nothing is sent until
    /// [`MoveDriver::initialize`].
    pub fn spawn(config: &PlayerConfig, side: Side) -> Result<Self, DriverError> {
        let mut child = Command::new(&config.engine)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DriverError::Spawn {
                program: config.engine.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Protocol("engine stdout unavailable".to_string()))?;

        Ok(Self {
            name: display_name(&config.engine),
            side,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    async fn send(&mut self, command: &str) -> Result<(), DriverError> {
        debug!(engine = %self.name, side = %self.side, "--> {command}");
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, DriverError> {
        match self.lines.next_line().await? {
            Some(line) => {
                debug!(engine = %self.name, side = %self.side, "<-- {line}");
                Ok(line)
            }
            None => Err(DriverError::Exited),
        }
    }

    /// Reads until a line equal to `token`, discarding everything before it.
    async fn expect(&mut self, token: &str) -> Result<(), DriverError> {
        loop {
            if self.read_line().await?.trim() == token {
                return Ok(());
            }
        }
    }

    async fn sync(&mut self) -> Result<(), DriverError> {
        self.send("isready").await?;
        self.expect("readyok").await
    }
}

#[async_trait]
impl MoveDriver for UciEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, options: &BTreeMap<String, String>) -> Result<(), DriverError> {
        self.send("uci").await?;
        self.expect("uciok").await?;
        for (name, value) in options {
            self.send(&setoption_command(name, value)).await?;
        }
        self.sync().await?;
        self.send("ucinewgame").await?;
        self.sync().await
    }

    async fn compute_move(&mut self, position: &Chess, budget: Duration) -> Result<Move, DriverError> {
        self.send(&position_command(position)).await?;
        self.send(&go_command(budget)).await?;
        loop {
            let line = self.read_line().await?;
            if let Some(reply) = parse_bestmove(&line) {
                return parse_move(reply, position);
            }
        }
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.send("quit").await {
            debug!(engine = %self.name, side = %self.side, error = %e, "quit not delivered");
        }
        match tokio::time::timeout(QUIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(engine = %self.name, side = %self.side, %status, "engine exited"),
            Ok(Err(e)) => warn!(engine = %self.name, side = %self.side, error = %e, "failed to reap engine"),
            Err(_) => {
                warn!(engine = %self.name, side = %self.side, "engine ignored quit, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!(engine = %self.name, side = %self.side, error = %e, "failed to kill engine");
                }
            }
        }
    }
}

/// Base name of the engine executable, used in logs and PGN tags.
pub fn display_name(engine: &str) -> String {
    Path::new(engine)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| engine.to_string())
}

pub fn setoption_command(name: &str, value: &str) -> String {
    format!("setoption name {name} value {value}")
}

pub fn position_command(position: &Chess) -> String {
    format!("position fen {}", fen(position))
}

pub fn go_command(budget: Duration) -> String {
    format!("go movetime {}", budget.as_millis().max(1))
}

/// The move token of a `bestmove` line, or `None` for any other line.
/// A `bestmove` line without a move yields an empty token.
pub fn parse_bestmove(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    Some(tokens.next().unwrap_or(""))
}

/// Converts a `bestmove` token into a move of `position`.
pub fn parse_move(reply: &str, position: &Chess) -> Result<Move, DriverError> {
    if reply.is_empty() || reply == "(none)" || reply == "0000" {
        return Err(DriverError::NoMove);
    }
    let uci: UciMove = reply
        .parse()
        .map_err(|_| DriverError::Protocol(format!("unparseable bestmove `{reply}`")))?;
    uci.to_move(position).map_err(|_| DriverError::IllegalMove {
        mv: reply.to_string(),
    })
}
