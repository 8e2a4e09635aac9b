//! Move validation seam
//!
//! The orchestrator never interprets moves itself. It hands the recorded move
//! list and the candidate to a `RulesOracle` and acts on the verdict.

use shared::{Color, Outcome};

use crate::error::{ServerError, ServerResult};

/// What the oracle reports about an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveVerdict {
    pub next_to_move: Color,
    /// Outcome and method tag (e.g. `checkmate`) when the move ends the game.
    pub outcome: Option<(Outcome, String)>,
    /// The move made a draw claimable for both sides.
    pub draw_eligible: bool,
    /// Rendered history after the move.
    pub history: String,
}

pub trait RulesOracle: Send + Sync {
    /// Side whose turn it is after replaying `moves`.
    fn side_to_move(&self, moves: &[&str]) -> ServerResult<Color>;

    /// Validates `candidate` against the position reached by `moves`.
    /// Returns `IllegalMove` when it cannot be played.
    fn play(&self, moves: &[&str], candidate: &str) -> ServerResult<MoveVerdict>;
}

/// Rules-free oracle: sides alternate, any single token is a move and no game
/// ever ends on the board.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlternatingTurns;

impl AlternatingTurns {
    pub fn render_history(moves: &[&str]) -> String {
        moves
            .chunks(2)
            .enumerate()
            .map(|(i, pair)| format!("{}. {}", i + 1, pair.join(" ")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RulesOracle for AlternatingTurns {
    fn side_to_move(&self, moves: &[&str]) -> ServerResult<Color> {
        Ok(if moves.len() % 2 == 0 {
            Color::White
        } else {
            Color::Black
        })
    }

    fn play(&self, moves: &[&str], candidate: &str) -> ServerResult<MoveVerdict> {
        if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
            return Err(ServerError::IllegalMove(format!("{:?}", candidate)));
        }

        let mover = self.side_to_move(moves)?;
        let mut played = moves.to_vec();
        played.push(candidate);

        Ok(MoveVerdict {
            next_to_move: mover.other(),
            outcome: None,
            draw_eligible: false,
            history: Self::render_history(&played),
        })
    }
}
