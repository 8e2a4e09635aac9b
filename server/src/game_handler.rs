//! Event handlers for the `game/{id}` topic

use log::debug;
use shared::{events, DrawRequest, Game, GameId, MoveRequest, ResultRequest};

use crate::client::Client;
use crate::error::{ServerError, ServerResult};
use crate::game::GameService;
use crate::topic::{EventContext, Topic};

fn game_id(ctx: &EventContext) -> ServerResult<GameId> {
    let param = ctx.param.as_deref().unwrap_or_default();
    param
        .parse()
        .map_err(|_| ServerError::not_found(format!("game {}", param)))
}

fn ensure_player(game: &Game, client: &Client, topic: &str) -> ServerResult<()> {
    let identity = client.identity();
    if game.white_id == identity || game.black_id == identity {
        Ok(())
    } else {
        Err(ServerError::NotAuthorized(topic.to_string()))
    }
}

async fn on_subscribe(service: GameService, ctx: EventContext) -> ServerResult<()> {
    let game = service.get(game_id(&ctx)?).await?;
    ctx.client.send_message(&ctx.topic, events::INIT, &game)
}

async fn on_unsubscribe(ctx: EventContext) -> ServerResult<()> {
    debug!("Client {} stopped watching {}", ctx.client.id, ctx.topic);
    Ok(())
}

async fn on_make_move(service: GameService, ctx: EventContext) -> ServerResult<()> {
    let id = game_id(&ctx)?;
    let request: MoveRequest = ctx.parse_payload()?;

    let mut missing = Vec::new();
    if request.player_id.is_empty() {
        missing.push("player_id");
    }
    if request.mv.is_empty() {
        missing.push("move");
    }
    if !missing.is_empty() {
        return Err(ServerError::InvalidPayload(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    // Moves are only taken on behalf of the connection that sends them.
    if request.player_id != ctx.client.identity() {
        return Err(ServerError::NotAuthorized(ctx.topic.clone()));
    }

    service
        .update_on_move(id, &request.player_id, &request.mv)
        .await?;
    Ok(())
}

async fn on_update_draw(service: GameService, ctx: EventContext) -> ServerResult<()> {
    let id = game_id(&ctx)?;
    let request: DrawRequest = ctx.parse_payload()?;
    ensure_player(&service.get(id).await?, &ctx.client, &ctx.topic)?;

    service.update_draw(id, request.white, request.black).await?;
    Ok(())
}

async fn on_update_result(service: GameService, ctx: EventContext) -> ServerResult<()> {
    let id = game_id(&ctx)?;
    let request: ResultRequest = ctx.parse_payload()?;
    ensure_player(&service.get(id).await?, &ctx.client, &ctx.topic)?;

    service
        .update_result(id, &request.method, &request.result)
        .await?;
    Ok(())
}

/// Registers the game topic's events. Broadcasts are issued by the service
/// once an update has been applied.
pub fn register(topic: &mut Topic, service: GameService) {
    let svc = service.clone();
    topic.register_event(events::SUBSCRIBE, move |ctx| on_subscribe(svc.clone(), ctx));

    topic.register_event(events::UNSUBSCRIBE, on_unsubscribe);

    let svc = service.clone();
    topic.register_event(events::MAKE_MOVE, move |ctx| on_make_move(svc.clone(), ctx));

    let svc = service.clone();
    topic.register_event(events::UPDATE_DRAW, move |ctx| on_update_draw(svc.clone(), ctx));

    topic.register_event(events::UPDATE_RESULT, move |ctx| {
        on_update_result(service.clone(), ctx)
    });
}
