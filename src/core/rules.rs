//! Rules engine seam.
//!
//! The match runner never inspects chess rules itself. It asks a
//! [`RulesEngine`] whose turn it is, hands it every proposed move, and stops
//! once the engine reports an outcome. [`ChessRules`] is the shakmaty-backed
//! implementation used by the binary.

use std::collections::HashMap;
use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position};

use crate::error::ConfigError;

/// Half-moves without capture or pawn move after which the game is drawn.
const SEVENTY_FIVE_MOVE_LIMIT: u32 = 150;
/// Number of occurrences of a position after which the game is drawn.
const FIVEFOLD_REPETITION: u32 = 5;

/// One of the two players of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("white"),
            Side::Black => f.write_str("black"),
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// Whose turn the rules engine says it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    White,
    Black,
    /// The engine could not name a side; always a contract violation.
    Invalid,
}

impl Turn {
    pub fn side(self) -> Option<Side> {
        match self {
            Turn::White => Some(Side::White),
            Turn::Black => Some(Side::Black),
            Turn::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Undetermined,
    WhiteWins,
    BlackWins,
    Draw,
}

impl Outcome {
    pub fn is_decided(self) -> bool {
        self != Outcome::Undetermined
    }

    /// PGN result token
    pub fn result_token(self) -> &'static str {
        match self {
            Outcome::Undetermined => "*",
            Outcome::WhiteWins => "1-0",
            Outcome::BlackWins => "0-1",
            Outcome::Draw => "1/2-1/2",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Undetermined => f.write_str("undetermined"),
            Outcome::WhiteWins => f.write_str("white wins"),
            Outcome::BlackWins => f.write_str("black wins"),
            Outcome::Draw => f.write_str("draw"),
        }
    }
}

/// A move the rules engine refused to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalMove {
    pub mv: String,
    pub reason: String,
}

/// Capability contract of the rules engine collaborator
pub trait RulesEngine: Send {
    fn current_turn(&self) -> Turn;

    /// Applies `mv` to the position, or rejects it leaving the position untouched.
    fn apply_move(&mut self, mv: &Move) -> Result<(), IllegalMove>;

    fn outcome(&self) -> Outcome;

    fn position(&self) -> &Chess;

    /// Full textual rendering of the current position, used for snapshots.
    fn fen(&self) -> String {
        fen(self.position())
    }
}

/// Renders `position` as FEN.
pub fn fen(position: &Chess) -> String {
    Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
}

/// Renders `mv` in standard UCI notation (castling as king move).
pub fn uci(mv: &Move) -> String {
    UciMove::from_move(mv, CastlingMode::Standard).to_string()
}

/// Standard chess rules on top of shakmaty, with automatic draws
#[derive(Debug, Clone)]
pub struct ChessRules {
    initial: Chess,
    position: Chess,
    san: Vec<String>,
    repetitions: HashMap<String, u32>,
}

impl ChessRules {
    pub fn new() -> Self {
        Self::from_position(Chess::default())
    }

    pub fn from_fen(fen: &str) -> Result<Self, ConfigError> {
        let parsed: Fen = fen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("invalid FEN `{fen}`: {e}")))?;
        let position: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| ConfigError::Invalid(format!("invalid FEN `{fen}`: {e}")))?;
        Ok(Self::from_position(position))
    }

    fn from_position(position: Chess) -> Self {
        let mut repetitions = HashMap::new();
        repetitions.insert(repetition_key(&position), 1);
        Self {
            initial: position.clone(),
            position,
            san: Vec::new(),
            repetitions,
        }
    }

    /// Moves played so far, in SAN with check markers.
    pub fn san_moves(&self) -> &[String] {
        &self.san
    }

    /// Renders the game as PGN.
    pub fn pgn(&self, white: &str, black: &str) -> String {
        let result = self.outcome().result_token();
        let mut pgn = String::new();
        pgn.push_str("[Event \"cete match\"]\n");
        pgn.push_str(&format!("[White \"{white}\"]\n"));
        pgn.push_str(&format!("[Black \"{black}\"]\n"));
        pgn.push_str(&format!("[Result \"{result}\"]\n"));
        let initial_fen = fen(&self.initial);
        if initial_fen != fen(&Chess::default()) {
            pgn.push_str("[SetUp \"1\"]\n");
            pgn.push_str(&format!("[FEN \"{initial_fen}\"]\n"));
        }
        pgn.push('\n');

        let mut number = self.initial.fullmoves().get();
        let mut turn = self.initial.turn();
        let mut tokens = Vec::with_capacity(self.san.len() * 2 + 1);
        for (i, san) in self.san.iter().enumerate() {
            match turn {
                Color::White => tokens.push(format!("{number}.")),
                Color::Black if i == 0 => tokens.push(format!("{number}...")),
                Color::Black => {}
            }
            tokens.push(san.clone());
            if turn == Color::Black {
                number += 1;
            }
            turn = turn.other();
        }
        tokens.push(result.to_string());
        pgn.push_str(&tokens.join(" "));
        pgn
    }
}

impl Default for ChessRules {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine for ChessRules {
    fn current_turn(&self) -> Turn {
        match self.position.turn() {
            Color::White => Turn::White,
            Color::Black => Turn::Black,
        }
    }

    fn apply_move(&mut self, mv: &Move) -> Result<(), IllegalMove> {
        if self.outcome().is_decided() {
            return Err(IllegalMove {
                mv: uci(mv),
                reason: "the game is already over".to_string(),
            });
        }
        if !self.position.is_legal(mv) {
            return Err(IllegalMove {
                mv: uci(mv),
                reason: "not legal in the current position".to_string(),
            });
        }

        let mut san = San::from_move(&self.position, mv).to_string();
        self.position.play_unchecked(mv);
        if self.position.is_checkmate() {
            san.push('#');
        } else if self.position.is_check() {
            san.push('+');
        }
        self.san.push(san);
        *self
            .repetitions
            .entry(repetition_key(&self.position))
            .or_insert(0) += 1;
        Ok(())
    }

    fn outcome(&self) -> Outcome {
        let position = &self.position;
        if position.is_checkmate() {
            // the side to move is mated
            return match position.turn() {
                Color::White => Outcome::BlackWins,
                Color::Black => Outcome::WhiteWins,
            };
        }
        if position.is_stalemate() || position.is_insufficient_material() {
            return Outcome::Draw;
        }
        if position.halfmoves() >= SEVENTY_FIVE_MOVE_LIMIT {
            return Outcome::Draw;
        }
        let occurrences = self
            .repetitions
            .get(&repetition_key(position))
            .copied()
            .unwrap_or(0);
        if occurrences >= FIVEFOLD_REPETITION {
            return Outcome::Draw;
        }
        Outcome::Undetermined
    }

    fn position(&self) -> &Chess {
        &self.position
    }
}

/// Placement, side to move, castling rights and en passant square.
fn repetition_key(position: &Chess) -> String {
    let full = fen(position);
    full.split(' ').take(4).collect::<Vec<_>>().join(" ")
}
