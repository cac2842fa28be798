//! Wire messages pushed to viewers.
//!
//! A viewer holding the previous position can replay a move message on its
//! own board. Only when that is not enough does a message carry extra data:
//! the rook's squares for castling, the whole position for a promotion.

use serde::{Deserialize, Serialize};
use shakmaty::{Chess, File, Move, Square};

use crate::core::rules::fen;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub mv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub castling_move: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl BroadcastMessage {
    /// Full resynchronisation message, sent first to every new subscriber.
    pub fn snapshot(position: &Chess) -> Self {
        Self {
            position: Some(fen(position)),
            ..Self::default()
        }
    }

    /// Incremental message for `mv`, which led to `position`.
    pub fn for_move(mv: &Move, position: &Chess) -> Self {
        let (main, castling_move) = match *mv {
            Move::Castle { king, rook } => {
                let (king_to, rook_to) = castling_targets(king, rook);
                (square_pair(king, king_to), Some(square_pair(rook, rook_to)))
            }
            Move::Normal { from, to, .. } | Move::EnPassant { from, to } => {
                (square_pair(from, to), None)
            }
            Move::Put { to, .. } => (to.to_string(), None),
        };

        Self {
            mv: Some(main),
            castling_move,
            position: mv.promotion().map(|_| fen(position)),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.mv.is_none() && self.position.is_some()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn square_pair(from: Square, to: Square) -> String {
    format!("{from}-{to}")
}

/// Destination squares of king and rook for a standard castle.
fn castling_targets(king: Square, rook: Square) -> (Square, Square) {
    let rank = king.rank();
    // same rank, so square order is file order
    if rook > king {
        (Square::from_coords(File::G, rank), Square::from_coords(File::F, rank))
    } else {
        (Square::from_coords(File::C, rank), Square::from_coords(File::D, rank))
    }
}
