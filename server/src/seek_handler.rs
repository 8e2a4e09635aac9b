//! Event handlers for the `gameseeks` lobby
//!
//! A seek belongs to the connection that inserted it and lives until it is
//! accepted or its owner leaves the lobby.

use log::{debug, info};
use rand::Rng;
use shared::{
    events, validate_time_control, AcceptRequest, AcceptedGame, Color, Game, Gameseek,
    GameseekId, SeekColor, SeekRequest, GAMESEEKS_TOPIC,
};
use std::sync::Arc;

use crate::error::{ServerError, ServerResult};
use crate::game::GameService;
use crate::room::Room;
use crate::store::GameseekRepo;
use crate::topic::{EventContext, Topic};

#[derive(Clone)]
pub struct SeekHandlers {
    seeks: Arc<dyn GameseekRepo>,
    games: GameService,
}

/// Seeker's color for a seek, resolving `random` with a coin flip.
fn seeker_color(preference: SeekColor) -> Color {
    match preference {
        SeekColor::White => Color::White,
        SeekColor::Black => Color::Black,
        SeekColor::Random => {
            if rand::thread_rng().gen_bool(0.5) {
                Color::White
            } else {
                Color::Black
            }
        }
    }
}

async fn broadcast_deletion(room: &Room, ids: &[GameseekId]) -> ServerResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let json = shared::OutboundMessage::new(GAMESEEKS_TOPIC, events::DELETION, ids).to_json()?;
    room.broadcast_message(&json).await;
    Ok(())
}

impl SeekHandlers {
    pub fn new(seeks: Arc<dyn GameseekRepo>, games: GameService) -> Self {
        Self { seeks, games }
    }

    async fn subscribe(&self, ctx: EventContext) -> ServerResult<()> {
        let seeks = self.seeks.list().await?;
        ctx.client.send_message(&ctx.topic, events::INIT, &seeks)
    }

    async fn insert(&self, ctx: EventContext) -> ServerResult<()> {
        let request: SeekRequest = ctx.parse_payload()?;
        validate_time_control(request.time, request.increment).map_err(ServerError::InvalidPayload)?;
        let seek = self
            .seeks
            .insert_seek(Gameseek {
                id: 0,
                color: request.color,
                time: request.time,
                increment: request.increment,
                seeker: ctx.client.identity(),
            })
            .await?;
        debug!("Client {} posted gameseek {}", ctx.client.id, seek.id);

        let json = shared::OutboundMessage::new(GAMESEEKS_TOPIC, events::INSERT, &seek).to_json()?;
        ctx.room.broadcast_message(&json).await;
        Ok(())
    }

    async fn accept(&self, ctx: EventContext) -> ServerResult<()> {
        let request: AcceptRequest = ctx.parse_payload()?;
        let accepter = ctx.client.identity();
        let not_found = || ServerError::not_found(format!("gameseek {}", request.gameseek_id));

        let seek = self
            .seeks
            .list()
            .await?
            .into_iter()
            .find(|seek| seek.id == request.gameseek_id)
            .ok_or_else(not_found)?;
        if seek.seeker == accepter {
            return Err(ServerError::InvalidPayload(
                "cannot accept your own gameseek".to_string(),
            ));
        }

        let seeker_client = match seek.seeker.parse().ok() {
            Some(seeker_id) => ctx.room.get_client(seeker_id).await,
            None => None,
        }
        .ok_or_else(|| ServerError::not_found(format!("seeker of gameseek {}", seek.id)))?;

        // Claim the seek before creating the game so a concurrent accept loses.
        let seek = self.seeks.take_seek(seek.id).await?.ok_or_else(not_found)?;

        let seeker_side = seeker_color(seek.color);
        let game = match seeker_side {
            Color::White => Game::new(&seek.seeker, &accepter, seek.time, seek.increment),
            Color::Black => Game::new(&accepter, &seek.seeker, seek.time, seek.increment),
        };
        let game_id = self.games.on_accept(game).await?;
        info!(
            "Gameseek {} accepted by client {}, game {} created",
            seek.id, accepter, game_id
        );

        let mut removed = vec![seek.id];
        removed.extend(
            self.seeks
                .delete_by_seekers(&[seek.seeker.as_str(), accepter.as_str()])
                .await?,
        );
        broadcast_deletion(&ctx.room, &removed).await?;

        seeker_client.send_message(
            GAMESEEKS_TOPIC,
            events::ACCEPT,
            AcceptedGame {
                game_id,
                color: seeker_side,
            },
        )?;
        ctx.client.send_message(
            GAMESEEKS_TOPIC,
            events::ACCEPT,
            AcceptedGame {
                game_id,
                color: seeker_side.other(),
            },
        )
    }

    /// Withdraws every seek of a connection leaving the lobby.
    async fn unsubscribe(&self, ctx: EventContext) -> ServerResult<()> {
        let identity = ctx.client.identity();
        let removed = self.seeks.delete_by_seekers(&[identity.as_str()]).await?;
        if !removed.is_empty() {
            debug!("Client {} left the lobby, withdrew {:?}", ctx.client.id, removed);
        }
        broadcast_deletion(&ctx.room, &removed).await
    }

    pub fn register(self, topic: &mut Topic) {
        let handlers = Arc::new(self);

        let h = Arc::clone(&handlers);
        topic.register_event(events::SUBSCRIBE, move |ctx| {
            let h = Arc::clone(&h);
            async move { h.subscribe(ctx).await }
        });

        let h = Arc::clone(&handlers);
        topic.register_event(events::UNSUBSCRIBE, move |ctx| {
            let h = Arc::clone(&h);
            async move { h.unsubscribe(ctx).await }
        });

        let h = Arc::clone(&handlers);
        topic.register_event(events::INSERT, move |ctx| {
            let h = Arc::clone(&h);
            async move { h.insert(ctx).await }
        });

        topic.register_event(events::ACCEPT, move |ctx| {
            let h = Arc::clone(&handlers);
            async move { h.accept(ctx).await }
        });
    }
}
