//! Versioned persistence contract and its in-memory implementation
//!
//! `GameRepo::update` is the single arbiter of every race on a game: it
//! merges a change set only when the caller's expected version is still the
//! stored one, and bumps the version by exactly one when it does. A version
//! mismatch is reported as `Ok(false)`, never as an error.

use async_trait::async_trait;
use log::debug;
use shared::{ChangeSet, Game, GameId, Gameseek, GameseekId};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::{ServerError, ServerResult};

/// Version given to freshly inserted games.
pub const INITIAL_VERSION: u64 = 1;

#[async_trait]
pub trait GameRepo: Send + Sync {
    async fn get(&self, id: GameId) -> ServerResult<Game>;

    /// Stores a new game and returns its id. The stored version is `INITIAL_VERSION`.
    async fn insert(&self, game: Game) -> ServerResult<GameId>;

    /// Applies `changes` iff the stored version equals `expected_version`.
    async fn update(
        &self,
        id: GameId,
        expected_version: u64,
        changes: &ChangeSet,
    ) -> ServerResult<bool>;
}

#[async_trait]
pub trait GameseekRepo: Send + Sync {
    async fn list(&self) -> ServerResult<Vec<Gameseek>>;

    async fn insert_seek(&self, seek: Gameseek) -> ServerResult<Gameseek>;

    /// Removes and returns one seek. Concurrent callers cannot both get it.
    async fn take_seek(&self, id: GameseekId) -> ServerResult<Option<Gameseek>>;

    /// Deletes every seek owned by one of `seekers`, returning the removed ids.
    async fn delete_by_seekers(&self, seekers: &[&str]) -> ServerResult<Vec<GameseekId>>;
}

#[derive(Default)]
struct GameTable {
    games: HashMap<GameId, Game>,
    next_id: GameId,
}

#[derive(Default)]
struct SeekTable {
    seeks: BTreeMap<GameseekId, Gameseek>,
    next_id: GameseekId,
}

/// Process-local store backing both repositories.
#[derive(Default)]
pub struct MemoryStore {
    games: RwLock<GameTable>,
    seeks: RwLock<SeekTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn game_count(&self) -> usize {
        self.games.read().await.games.len()
    }
}

#[async_trait]
impl GameRepo for MemoryStore {
    async fn get(&self, id: GameId) -> ServerResult<Game> {
        self.games
            .read()
            .await
            .games
            .get(&id)
            .cloned()
            .ok_or_else(|| ServerError::not_found(format!("game {}", id)))
    }

    async fn insert(&self, mut game: Game) -> ServerResult<GameId> {
        let mut table = self.games.write().await;
        table.next_id += 1;
        let id = table.next_id;

        game.id = id;
        game.version = INITIAL_VERSION;
        table.games.insert(id, game);
        debug!("Inserted game {}", id);
        Ok(id)
    }

    async fn update(
        &self,
        id: GameId,
        expected_version: u64,
        changes: &ChangeSet,
    ) -> ServerResult<bool> {
        let mut table = self.games.write().await;
        let game = table
            .games
            .get_mut(&id)
            .ok_or_else(|| ServerError::not_found(format!("game {}", id)))?;

        if game.version != expected_version {
            debug!(
                "Stale update for game {}: expected version {}, stored {}",
                id, expected_version, game.version
            );
            return Ok(false);
        }

        // Merge into a copy so a bad change set leaves the record untouched.
        let mut updated = game.clone();
        updated
            .apply_changes(changes)
            .map_err(|e| ServerError::store(e.to_string()))?;
        updated.version = expected_version + 1;
        *game = updated;
        Ok(true)
    }
}

#[async_trait]
impl GameseekRepo for MemoryStore {
    async fn list(&self) -> ServerResult<Vec<Gameseek>> {
        Ok(self.seeks.read().await.seeks.values().cloned().collect())
    }

    async fn insert_seek(&self, mut seek: Gameseek) -> ServerResult<Gameseek> {
        let mut table = self.seeks.write().await;
        table.next_id += 1;
        seek.id = table.next_id;
        table.seeks.insert(seek.id, seek.clone());
        Ok(seek)
    }

    async fn take_seek(&self, id: GameseekId) -> ServerResult<Option<Gameseek>> {
        Ok(self.seeks.write().await.seeks.remove(&id))
    }

    async fn delete_by_seekers(&self, seekers: &[&str]) -> ServerResult<Vec<GameseekId>> {
        let mut table = self.seeks.write().await;
        let doomed: Vec<GameseekId> = table
            .seeks
            .values()
            .filter(|seek| seekers.contains(&seek.seeker.as_str()))
            .map(|seek| seek.id)
            .collect();

        for id in &doomed {
            table.seeks.remove(id);
        }
        Ok(doomed)
    }
}
