//! Per-game countdown timers
//!
//! The `ClockMultiplexer` keeps at most one pending expiry per game. Arming a
//! game that already has a timer supersedes the old one: its task is aborted
//! and, should it already have woken up, it finds a newer generation in the
//! table and returns without running its callback.
//!
//! Every timer is armed for a version of the game. A request carrying an
//! older version than the armed timer is refused, so a caller that finishes
//! late cannot put back a timer its successor already replaced.
//!
//! An expiry that has already claimed its entry runs to completion even if
//! the game is re-armed meanwhile. Callers must therefore make the callback's
//! side effects conditional on the game's version, which is what the timeout
//! handler in `game` does.

use crate::error::{ServerError, ServerResult};
use log::debug;
use shared::GameId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

struct ClockEntry {
    generation: u64,
    version: u64,
    duration: Duration,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ClockTable {
    entries: HashMap<GameId, ClockEntry>,
    next_generation: u64,
}

/// Owns one cancellable deferred callback per game id.
///
/// Cloning shares the same table.
#[derive(Clone, Default)]
pub struct ClockMultiplexer {
    table: Arc<Mutex<ClockTable>>,
}

impl ClockMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `on_expire` to run after `duration`, superseding any timer the
    /// game already has for the same or an older `version`.
    ///
    /// Returns `false`, dropping `on_expire`, when the armed timer belongs to
    /// a newer version.
    pub async fn start_or_replace<F>(
        &self,
        game_id: GameId,
        version: u64,
        duration: Duration,
        on_expire: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.table.lock().await;
        if let Some(armed) = table.entries.get(&game_id) {
            if armed.version > version {
                debug!(
                    "Ignoring clock for game {} at version {}, version {} is armed",
                    game_id, version, armed.version
                );
                return false;
            }
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let deadline = Instant::now() + duration;

        let shared_table = Arc::clone(&self.table);
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;

            let claimed = {
                let mut table = shared_table.lock().await;
                let current = table
                    .entries
                    .get(&game_id)
                    .map_or(false, |entry| entry.generation == generation);
                if current {
                    table.entries.remove(&game_id);
                }
                current
            };

            if claimed {
                debug!("Clock for game {} expired", game_id);
                on_expire.await;
            } else {
                debug!("Superseded clock for game {} woke up, ignoring", game_id);
            }
        });

        let entry = ClockEntry {
            generation,
            version,
            duration,
            deadline,
            handle,
        };
        if let Some(previous) = table.entries.insert(game_id, entry) {
            previous.handle.abort();
            debug!(
                "Replaced clock for game {} ({:?} armed earlier)",
                game_id, previous.duration
            );
        } else {
            debug!("Armed clock for game {} with {:?}", game_id, duration);
        }
        true
    }

    /// Cancels and removes the game's timer. Returns `NotFound` when none is armed.
    pub async fn cancel(&self, game_id: GameId) -> ServerResult<()> {
        let mut table = self.table.lock().await;
        match table.entries.remove(&game_id) {
            Some(entry) => {
                entry.handle.abort();
                debug!("Cancelled clock for game {}", game_id);
                Ok(())
            }
            None => Err(ServerError::not_found(format!("clock for game {}", game_id))),
        }
    }

    pub async fn is_armed(&self, game_id: GameId) -> bool {
        self.table.lock().await.entries.contains_key(&game_id)
    }

    /// Deadline and original duration of the game's pending timer.
    pub async fn deadline(&self, game_id: GameId) -> Option<(Instant, Duration)> {
        self.table
            .lock()
            .await
            .entries
            .get(&game_id)
            .map(|entry| (entry.deadline, entry.duration))
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Aborts every pending timer. Used on shutdown.
    pub async fn cancel_all(&self) {
        let mut table = self.table.lock().await;
        for (_, entry) in table.entries.drain() {
            entry.handle.abort();
        }
    }
}
