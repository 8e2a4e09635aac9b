//! Session orchestration
//!
//! `GameService` is the only writer of game records. Every transition follows
//! the same shape: read the record and its version, reject if the game is
//! over, build a `ChangeSet`, hand it to `GameRepo::update` with the version
//! that was read, and only when the store reports it applied, reschedule the
//! clock and broadcast the change set to the game's room.
//!
//! A player's move and an expiring clock race through that same versioned
//! update. Whichever reaches the store first with the still-current version
//! wins; the loser performs no side effects. The clock callback is reified as
//! a `PendingTimeout` so the race can be driven directly in tests.

use log::{debug, error, info};
use serde::Serialize;
use shared::{
    events, game_topic, validate_time_control, ChangeSet, Color, Game, GameField, GameId, Outcome,
    OutboundMessage, TIME_OUT_METHOD,
};
use std::sync::Arc;

use crate::clock::ClockMultiplexer;
use crate::error::{ServerError, ServerResult};
use crate::room::RoomMap;
use crate::rules::RulesOracle;
use crate::store::{GameRepo, INITIAL_VERSION};
use crate::utils::{millis_to_duration, TimeSource};

/// How a move that arrives after the mover's time has run out is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagPolicy {
    /// Only the clock multiplexer ends a game on time. Late moves are applied
    /// and leave the mover with negative time until their next move.
    #[default]
    TimerOnly,
    /// A late move is not applied. The same versioned update records the
    /// mover's loss on time instead.
    OnMove,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GameConfig {
    pub flag_policy: FlagPolicy,
}

/// An applied transition: the broadcast event and the change set that was merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub event: &'static str,
    pub changes: ChangeSet,
}

/// A clock expiry waiting to be committed.
///
/// It only takes effect if the game is still at `expected_version`, i.e. no
/// move landed between arming and firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimeout {
    pub game_id: GameId,
    pub expected_version: u64,
    pub expiring: Color,
}

/// Changes recording `expiring` losing on time.
pub fn timeout_changes(expiring: Color) -> ChangeSet {
    let mut changes = ChangeSet::new();
    changes
        .set(GameField::time_of(expiring), 0)
        .set(
            GameField::Result,
            Outcome::win_for(expiring.other()).as_str(),
        )
        .set(GameField::Method, TIME_OUT_METHOD)
        .set(GameField::WhiteDrawStatus, false)
        .set(GameField::BlackDrawStatus, false);
    changes
}

fn append_move(moves: &str, mv: &str) -> String {
    if moves.is_empty() {
        mv.to_string()
    } else {
        format!("{} {}", moves, mv)
    }
}

#[derive(Clone)]
pub struct GameService {
    repo: Arc<dyn GameRepo>,
    oracle: Arc<dyn RulesOracle>,
    clocks: ClockMultiplexer,
    time: Arc<dyn TimeSource>,
    rooms: Arc<RoomMap>,
    config: GameConfig,
}

impl GameService {
    pub fn new(
        repo: Arc<dyn GameRepo>,
        oracle: Arc<dyn RulesOracle>,
        clocks: ClockMultiplexer,
        time: Arc<dyn TimeSource>,
        rooms: Arc<RoomMap>,
        config: GameConfig,
    ) -> Self {
        Self {
            repo,
            oracle,
            clocks,
            time,
            rooms,
            config,
        }
    }

    pub fn clocks(&self) -> &ClockMultiplexer {
        &self.clocks
    }

    pub async fn get(&self, id: GameId) -> ServerResult<Game> {
        self.repo.get(id).await
    }

    /// Stores a freshly paired game and starts the first mover's clock.
    pub async fn on_accept(&self, mut game: Game) -> ServerResult<GameId> {
        validate_time_control(game.time, game.increment).map_err(ServerError::InvalidPayload)?;
        let base_time = i64::try_from(game.time)
            .map_err(|_| ServerError::InvalidPayload(format!("time {} out of range", game.time)))?;

        game.time_stamp_at_turn_start = self.time.now_millis();
        game.white_time = base_time;
        game.black_time = base_time;
        game.version = INITIAL_VERSION;

        let engine = game.has_engine();
        let id = self.repo.insert(game).await?;
        info!("Created game {}", id);

        if !engine {
            let first = self.oracle.side_to_move(&[])?;
            self.arm_clock(
                PendingTimeout {
                    game_id: id,
                    expected_version: INITIAL_VERSION,
                    expiring: first,
                },
                base_time,
            )
            .await;
        }
        Ok(id)
    }

    pub async fn update_on_move(
        &self,
        id: GameId,
        player_id: &str,
        mv: &str,
    ) -> ServerResult<Transition> {
        let game = self.repo.get(id).await?;
        if game.is_over() {
            return Err(ServerError::GameOver(id));
        }

        let moves = game.move_list();
        let mover = self.oracle.side_to_move(&moves)?;
        if game.player_id(mover) != player_id {
            return Err(ServerError::WrongTurn);
        }

        let now = self.time.now_millis();
        let elapsed = now.saturating_sub(game.time_stamp_at_turn_start);
        let remaining = game.remaining(mover).saturating_sub(elapsed);
        let increment = i64::try_from(game.increment).unwrap_or(i64::MAX);

        if self.config.flag_policy == FlagPolicy::OnMove && remaining <= 0 {
            debug!("Move in game {} arrived after {}'s flag fell", id, mover);
            let changes = timeout_changes(mover);
            if !self.repo.update(id, game.version, &changes).await? {
                return Err(ServerError::Conflict(id));
            }
            self.disarm(id).await;
            self.broadcast(id, events::TIME_OUT, &changes).await?;
            return Ok(Transition {
                event: events::TIME_OUT,
                changes,
            });
        }

        let verdict = self.oracle.play(&moves, mv)?;

        let mut changes = ChangeSet::new();
        changes
            .set(
                GameField::time_of(mover),
                remaining.saturating_add(increment),
            )
            .set(GameField::TimeStampAtTurnStart, now)
            .set(GameField::Moves, append_move(&game.moves, mv))
            .set(GameField::History, verdict.history.as_str())
            .set(GameField::WhiteDrawStatus, verdict.draw_eligible)
            .set(GameField::BlackDrawStatus, verdict.draw_eligible);
        if let Some((outcome, method)) = &verdict.outcome {
            changes
                .set(GameField::Result, outcome.as_str())
                .set(GameField::Method, method.as_str());
        }

        if !self.repo.update(id, game.version, &changes).await? {
            debug!("Move {} in game {} lost the race for version {}", mv, id, game.version);
            return Err(ServerError::Conflict(id));
        }

        let event = if changes.ends_game() {
            info!("Game {} over after {}: {:?}", id, mv, verdict.outcome);
            self.disarm(id).await;
            events::GAME_OVER
        } else {
            if !game.has_engine() {
                let next = verdict.next_to_move;
                self.arm_clock(
                    PendingTimeout {
                        game_id: id,
                        expected_version: game.version + 1,
                        expiring: next,
                    },
                    game.remaining(next),
                )
                .await;
            }
            events::MAKE_MOVE
        };

        self.broadcast(id, event, &changes).await?;
        Ok(Transition { event, changes })
    }

    /// Sets both draw flags. The running clock is re-armed for the new
    /// version with whatever the side to move has left.
    pub async fn update_draw(&self, id: GameId, white: bool, black: bool) -> ServerResult<Transition> {
        let game = self.repo.get(id).await?;
        if game.is_over() {
            return Err(ServerError::GameOver(id));
        }
        let to_move = self.oracle.side_to_move(&game.move_list())?;

        let mut changes = ChangeSet::new();
        changes
            .set(GameField::WhiteDrawStatus, white)
            .set(GameField::BlackDrawStatus, black);

        if !self.repo.update(id, game.version, &changes).await? {
            return Err(ServerError::Conflict(id));
        }

        if !game.has_engine() {
            let elapsed = self
                .time
                .now_millis()
                .saturating_sub(game.time_stamp_at_turn_start);
            self.arm_clock(
                PendingTimeout {
                    game_id: id,
                    expected_version: game.version + 1,
                    expiring: to_move,
                },
                game.remaining(to_move).saturating_sub(elapsed),
            )
            .await;
        }

        self.broadcast(id, events::UPDATE_DRAW, &changes).await?;
        Ok(Transition {
            event: events::UPDATE_DRAW,
            changes,
        })
    }

    /// Ends the game with an externally decided result (resignation, agreed draw...).
    pub async fn update_result(
        &self,
        id: GameId,
        method: &str,
        result: &str,
    ) -> ServerResult<Transition> {
        let outcome = Outcome::parse(result)
            .ok_or_else(|| ServerError::InvalidPayload(format!("unknown result {:?}", result)))?;

        let game = self.repo.get(id).await?;
        if game.is_over() {
            return Err(ServerError::GameOver(id));
        }

        let mut changes = ChangeSet::new();
        changes
            .set(GameField::Result, outcome.as_str())
            .set(GameField::Method, method);

        if !self.repo.update(id, game.version, &changes).await? {
            return Err(ServerError::Conflict(id));
        }

        info!("Game {} ended by {}: {}", id, method, outcome);
        self.disarm(id).await;
        self.broadcast(id, events::UPDATE_RESULT, &changes).await?;
        Ok(Transition {
            event: events::UPDATE_RESULT,
            changes,
        })
    }

    /// Commits a clock expiry. Returns `false` when a move advanced the game
    /// first, in which case nothing is written or broadcast.
    pub async fn handle_timeout(&self, pending: PendingTimeout) -> ServerResult<bool> {
        let id = pending.game_id;
        let changes = timeout_changes(pending.expiring);

        if !self.repo.update(id, pending.expected_version, &changes).await? {
            debug!(
                "Discarding stale timeout for game {} at version {}",
                id, pending.expected_version
            );
            return Ok(false);
        }

        info!("Game {}: {} ran out of time", id, pending.expiring);
        self.disarm(id).await;
        self.broadcast(id, events::TIME_OUT, &changes).await?;
        Ok(true)
    }

    async fn arm_clock(&self, pending: PendingTimeout, remaining_millis: i64) {
        let service = self.clone();
        let duration = millis_to_duration(remaining_millis);
        let armed = self
            .clocks
            .start_or_replace(pending.game_id, pending.expected_version, duration, async move {
                if let Err(e) = service.handle_timeout(pending).await {
                    error!("Timeout for game {} failed: {}", pending.game_id, e);
                }
            })
            .await;
        if !armed {
            debug!(
                "Game {} moved past version {} before its clock was armed",
                pending.game_id, pending.expected_version
            );
        }
    }

    async fn disarm(&self, id: GameId) {
        if let Err(e) = self.clocks.cancel(id).await {
            debug!("Nothing to disarm: {}", e);
        }
    }

    async fn broadcast<T: Serialize>(&self, id: GameId, event: &str, payload: &T) -> ServerResult<usize> {
        let room = match self.rooms.get(&id.to_string()).await {
            Some(room) => room,
            None => {
                debug!("No subscribers for game {}, skipping {}", id, event);
                return Ok(0);
            }
        };

        let json = OutboundMessage::new(game_topic(id), event, payload).to_json()?;
        Ok(room.broadcast_message(&json).await)
    }
}
