//! Wires topics, handlers and the session service into one router.

use shared::{GAMESEEKS_TOPIC, GAME_TOPIC};
use std::sync::Arc;

use crate::clock::ClockMultiplexer;
use crate::error::{ServerError, ServerResult};
use crate::game::{GameConfig, GameService};
use crate::game_handler;
use crate::router::Router;
use crate::rules::RulesOracle;
use crate::seek_handler::SeekHandlers;
use crate::store::{GameRepo, GameseekRepo};
use crate::topic::Topic;
use crate::utils::TimeSource;

pub struct App {
    pub router: Arc<Router>,
    pub games: GameService,
}

impl App {
    pub fn new<S>(
        store: Arc<S>,
        oracle: Arc<dyn RulesOracle>,
        time: Arc<dyn TimeSource>,
        config: GameConfig,
    ) -> ServerResult<Self>
    where
        S: GameRepo + GameseekRepo + 'static,
    {
        let mut game_topic = Topic::new(&format!("{}/{{id}}", GAME_TOPIC))?;
        let rooms = game_topic
            .rooms()
            .ok_or_else(|| ServerError::InvalidPattern(GAME_TOPIC.to_string()))?;

        let games = GameService::new(
            store.clone(),
            oracle,
            ClockMultiplexer::new(),
            time,
            rooms,
            config,
        );
        game_handler::register(&mut game_topic, games.clone());

        let mut lobby = Topic::new(GAMESEEKS_TOPIC)?;
        SeekHandlers::new(store, games.clone()).register(&mut lobby);

        let mut router = Router::new();
        router.push_topic(lobby);
        router.push_topic(game_topic);

        Ok(Self {
            router: Arc::new(router),
            games,
        })
    }

    /// Stops every running clock.
    pub async fn shutdown(&self) {
        self.games.clocks().cancel_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AlternatingTurns;
    use crate::store::MemoryStore;
    use crate::utils::SystemTimeSource;

    #[test]
    fn test_topics_are_registered() {
        let app = App::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AlternatingTurns),
            Arc::new(SystemTimeSource),
            GameConfig::default(),
        )
        .unwrap();

        let names: Vec<&str> = app.router.topics().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["gameseeks", "game"]);

        let game = app.router.topic("game").unwrap();
        assert!(game.is_parameterized());
        for event in ["subscribe", "unsubscribe", "make-move", "update-draw", "update-result"] {
            assert!(game.has_event(event), "missing {}", event);
        }

        let lobby = app.router.topic("gameseeks").unwrap();
        for event in ["subscribe", "unsubscribe", "insert", "accept"] {
            assert!(lobby.has_event(event), "missing {}", event);
        }
    }
}
