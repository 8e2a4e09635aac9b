//! # Realtime Game Server Library
//!
//! This library is the authoritative backend for turn-based two-player games
//! with per-player countdown clocks. It owns the game records, runs the clocks
//! and pushes every state change to the connections watching a game.
//!
//! ## Core Responsibilities
//!
//! ### Session Orchestration
//! Moves, draw offers, results and clock expiries all become `ChangeSet`s that
//! are committed through a version-checked update. A game record only ever
//! moves forward one version at a time, and a finished game accepts no more
//! changes.
//!
//! ### Clocks
//! The side to move always has exactly one pending expiry. Each move replaces
//! it with a timer for the opponent; a decisive result cancels it.
//!
//! ### Publish/Subscribe
//! Clients address topics such as `gameseeks` (the lobby) or `game/42`.
//! Subscribing joins the topic's room; every broadcast for that room reaches
//! all of its members.
//!
//! ## Concurrency Model
//!
//! ### No Per-Game Lock
//! Receive loops and clock callbacks may touch the same game at the same time.
//! The store accepts at most one update per version, so when a move and a
//! timeout race, exactly one of them is applied and broadcast. The loser is
//! rejected (`Conflict` for a move) or silently dropped (a stale timeout).
//!
//! ### Locks That Do Exist
//! Only the clock table and each room's member set sit behind locks, and
//! neither is held while sending to a connection.
//!
//! ## Module Organization
//!
//! - `clock`: per-game cancellable timers
//! - `room`, `topic`, `router`: subscriptions and inbound dispatch
//! - `game`: the session orchestrator
//! - `game_handler`, `seek_handler`: topic event handlers
//! - `store`: the versioned persistence contract and an in-memory store
//! - `rules`: the move validation seam
//! - `client`, `client_manager`, `network`: WebSocket connections
//! - `app`: wiring
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::app::App;
//! use server::game::GameConfig;
//! use server::network::{Server, ServerConfig};
//! use server::rules::AlternatingTurns;
//! use server::store::MemoryStore;
//! use server::utils::SystemTimeSource;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(AlternatingTurns),
//!         Arc::new(SystemTimeSource),
//!         GameConfig::default(),
//!     )?;
//!
//!     let server = Server::new(&ServerConfig::default(), app.router.clone()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod client;
pub mod client_manager;
pub mod clock;
pub mod error;
pub mod game;
pub mod game_handler;
pub mod network;
pub mod room;
pub mod router;
pub mod rules;
pub mod seek_handler;
pub mod store;
pub mod topic;
pub mod utils;
