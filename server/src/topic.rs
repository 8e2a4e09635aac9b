//! Pattern-matched publish topics
//!
//! A topic is declared with a pattern, either a fixed `name` (one room, for
//! example the `gameseeks` lobby) or `name/{param}` (one room per captured
//! parameter, for example `game/{id}`). The variant is chosen once when the
//! pattern is parsed.
//!
//! Membership is enforced here rather than in handlers: `subscribe` joins
//! (creating the parameter's room on first use), `unsubscribe` leaves, and
//! every other event is refused with `NotAuthorized` unless the connection is
//! a member of the addressed room.

use futures_util::future::BoxFuture;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use shared::events;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::client::Client;
use crate::error::{ServerError, ServerResult};
use crate::room::{Room, RoomMap};

/// Everything a handler gets for one inbound event.
pub struct EventContext {
    pub room: Arc<Room>,
    pub client: Client,
    /// Concrete topic the client addressed, e.g. `game/42`.
    pub topic: String,
    pub param: Option<String>,
    /// Raw JSON payload text.
    pub payload: String,
}

impl EventContext {
    pub fn parse_payload<T: DeserializeOwned>(&self) -> ServerResult<T> {
        serde_json::from_str(&self.payload)
            .map_err(|e| ServerError::InvalidPayload(e.to_string()))
    }
}

pub type EventHandler =
    Arc<dyn Fn(EventContext) -> BoxFuture<'static, ServerResult<()>> + Send + Sync>;

pub enum TopicKind {
    Fixed { room: Arc<Room> },
    Parameterized { rooms: Arc<RoomMap> },
}

pub struct Topic {
    name: String,
    kind: TopicKind,
    events: HashMap<String, EventHandler>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_param_char(c: char) -> bool {
    is_name_char(c) || c == '-'
}

/// Parses `name` or `name/{param}` (the braces are optional). Returns the
/// topic name and whether it takes a parameter.
pub fn parse_pattern(pattern: &str) -> ServerResult<(String, bool)> {
    let invalid = || ServerError::InvalidPattern(pattern.to_string());

    let mut parts = pattern.split('/');
    let name = parts.next().unwrap_or_default();
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(invalid());
    }

    let has_param = match parts.next() {
        None => false,
        Some(param) => {
            let inner = param
                .strip_prefix('{')
                .and_then(|p| p.strip_suffix('}'))
                .unwrap_or(param);
            if inner.is_empty() || !inner.chars().all(is_name_char) {
                return Err(invalid());
            }
            true
        }
    };

    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok((name.to_string(), has_param))
}

impl Topic {
    pub fn new(pattern: &str) -> ServerResult<Self> {
        let (name, has_param) = parse_pattern(pattern)?;
        let kind = if has_param {
            TopicKind::Parameterized {
                rooms: Arc::new(RoomMap::new()),
            }
        } else {
            TopicKind::Fixed {
                room: Arc::new(Room::new(None)),
            }
        };

        Ok(Self {
            name,
            kind,
            events: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_parameterized(&self) -> bool {
        matches!(self.kind, TopicKind::Parameterized { .. })
    }

    /// The single room of a fixed topic.
    pub fn room(&self) -> Option<Arc<Room>> {
        match &self.kind {
            TopicKind::Fixed { room } => Some(Arc::clone(room)),
            TopicKind::Parameterized { .. } => None,
        }
    }

    /// The room registry of a parameterized topic.
    pub fn rooms(&self) -> Option<Arc<RoomMap>> {
        match &self.kind {
            TopicKind::Fixed { .. } => None,
            TopicKind::Parameterized { rooms } => Some(Arc::clone(rooms)),
        }
    }

    pub fn register_event<F, Fut>(&mut self, event: &str, handler: F)
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<()>> + Send + 'static,
    {
        let boxed: EventHandler =
            Arc::new(move |ctx: EventContext| -> BoxFuture<'static, ServerResult<()>> {
                Box::pin(handler(ctx))
            });
        self.events.insert(event.to_string(), boxed);
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    fn capture_param<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let param = topic.strip_prefix(self.name.as_str())?.strip_prefix('/')?;
        if !param.is_empty() && param.chars().all(is_param_char) {
            Some(param)
        } else {
            None
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self.kind {
            TopicKind::Fixed { .. } => topic == self.name,
            TopicKind::Parameterized { .. } => self.capture_param(topic).is_some(),
        }
    }

    /// Resolves the addressed room, applies the membership rules and runs the
    /// event's handler.
    pub async fn handle_message(
        &self,
        client: &Client,
        topic: &str,
        event: &str,
        payload: &str,
    ) -> ServerResult<()> {
        let handler = self
            .events
            .get(event)
            .cloned()
            .ok_or_else(|| ServerError::UnknownEvent(event.to_string()))?;

        let (room, param) = match &self.kind {
            TopicKind::Fixed { room } => (Arc::clone(room), None),
            TopicKind::Parameterized { rooms } => {
                let param = self
                    .capture_param(topic)
                    .ok_or_else(|| ServerError::UnknownTopic(topic.to_string()))?;
                let room = if event == events::SUBSCRIBE {
                    rooms.get_or_create(param).await
                } else {
                    rooms
                        .get(param)
                        .await
                        .ok_or_else(|| ServerError::NotAuthorized(topic.to_string()))?
                };
                (room, Some(param.to_string()))
            }
        };

        match event {
            events::SUBSCRIBE => room.register_client(client.clone()).await?,
            events::UNSUBSCRIBE => {
                if !room.unregister_client(client.id).await {
                    return Err(ServerError::NotAuthorized(topic.to_string()));
                }
            }
            _ => {
                if !room.contains(client.id).await {
                    return Err(ServerError::NotAuthorized(topic.to_string()));
                }
            }
        }

        let ctx = EventContext {
            room: Arc::clone(&room),
            client: client.clone(),
            topic: topic.to_string(),
            param,
            payload: payload.to_string(),
        };
        let result = handler(ctx).await;

        if result.is_err() && event == events::SUBSCRIBE {
            room.unregister_client(client.id).await;
        }
        result
    }

    /// Drops a closing connection from every room of this topic, running the
    /// `unsubscribe` handler for each room it was in. Returns how many rooms it left.
    pub async fn remove_client(&self, client: &Client) -> usize {
        let rooms = match &self.kind {
            TopicKind::Fixed { room } => vec![Arc::clone(room)],
            TopicKind::Parameterized { rooms } => rooms.all().await,
        };

        let mut left = 0;
        for room in rooms {
            if !room.unregister_client(client.id).await {
                continue;
            }
            left += 1;

            let topic = match room.param() {
                Some(param) => format!("{}/{}", self.name, param),
                None => self.name.clone(),
            };
            debug!("Client {} dropped from {}", client.id, topic);

            if let Some(handler) = self.events.get(events::UNSUBSCRIBE).cloned() {
                let ctx = EventContext {
                    room: Arc::clone(&room),
                    client: client.clone(),
                    topic: topic.clone(),
                    param: room.param().map(str::to_string),
                    payload: "null".to_string(),
                };
                if let Err(e) = handler(ctx).await {
                    warn!("Unsubscribe handler for {} failed on disconnect: {}", topic, e);
                }
            }
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_topic(pattern: &str, counter: &Arc<AtomicUsize>) -> Topic {
        let mut topic = Topic::new(pattern).unwrap();
        for event in [events::SUBSCRIBE, events::UNSUBSCRIBE, events::MAKE_MOVE] {
            let counter = Arc::clone(counter);
            topic.register_event(event, move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        topic
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(parse_pattern("topic").unwrap(), ("topic".to_string(), false));
        assert_eq!(parse_pattern("game/{id}").unwrap(), ("game".to_string(), true));
        assert_eq!(parse_pattern("game/id").unwrap(), ("game".to_string(), true));

        for bad in ["topic  ", "topic*", "", "/id", "game/", "game/{}", "a/b/c", "game/{id"] {
            assert!(
                matches!(parse_pattern(bad), Err(ServerError::InvalidPattern(_))),
                "pattern should be rejected: {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_fixed_topic_matching() {
        let topic = Topic::new("gameseeks").unwrap();
        assert!(!topic.is_parameterized());
        assert!(topic.room().is_some());
        assert!(topic.matches("gameseeks"));
        assert!(!topic.matches("gameseeks/1"));
        assert!(!topic.matches("gameseeksa"));
        assert!(!topic.matches("game"));
    }

    #[test]
    fn test_parameterized_topic_matching() {
        let topic = Topic::new("game/{id}").unwrap();
        assert!(topic.is_parameterized());
        assert!(topic.rooms().is_some());
        assert!(topic.matches("game/42"));
        assert!(topic.matches("game/abc_1"));
        assert!(!topic.matches("game"));
        assert!(!topic.matches("game/"));
        assert!(!topic.matches("games/42"));
        assert!(!topic.matches("game/4 2"));
        assert!(!topic.matches("game/42/extra"));
    }

    #[tokio::test]
    async fn test_subscribe_creates_room() {
        let counter = Arc::new(AtomicUsize::new(0));
        let topic = counting_topic("game/{id}", &counter);
        let (client, _rx) = Client::channel(1, 8);

        topic
            .handle_message(&client, "game/42", events::SUBSCRIBE, "null")
            .await
            .unwrap();

        let room = topic.rooms().unwrap().get("42").await.unwrap();
        assert!(room.contains(1).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_without_subscription_is_not_authorized() {
        let counter = Arc::new(AtomicUsize::new(0));
        let topic = counting_topic("game/{id}", &counter);
        let (member, _rx1) = Client::channel(1, 8);
        let (stranger, _rx2) = Client::channel(2, 8);

        let err = topic
            .handle_message(&stranger, "game/7", events::MAKE_MOVE, "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotAuthorized(_)));

        topic
            .handle_message(&member, "game/7", events::SUBSCRIBE, "null")
            .await
            .unwrap();
        let err = topic
            .handle_message(&stranger, "game/7", events::MAKE_MOVE, "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotAuthorized(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_event() {
        let counter = Arc::new(AtomicUsize::new(0));
        let topic = counting_topic("gameseeks", &counter);
        let (client, _rx) = Client::channel(1, 8);

        let err = topic
            .handle_message(&client, "gameseeks", "dance", "null")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownEvent(e) if e == "dance"));
    }

    #[tokio::test]
    async fn test_double_subscribe_and_unsubscribe() {
        let counter = Arc::new(AtomicUsize::new(0));
        let topic = counting_topic("gameseeks", &counter);
        let (client, _rx) = Client::channel(1, 8);

        topic
            .handle_message(&client, "gameseeks", events::SUBSCRIBE, "null")
            .await
            .unwrap();
        let err = topic
            .handle_message(&client, "gameseeks", events::SUBSCRIBE, "null")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadySubscribed(_)));

        topic
            .handle_message(&client, "gameseeks", events::UNSUBSCRIBE, "null")
            .await
            .unwrap();
        assert!(topic.room().unwrap().is_empty().await);

        let err = topic
            .handle_message(&client, "gameseeks", events::UNSUBSCRIBE, "null")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_failed_subscribe_handler_leaves_room() {
        let mut topic = Topic::new("game/{id}").unwrap();
        topic.register_event(events::SUBSCRIBE, |_ctx| async {
            Err(ServerError::not_found("game 5"))
        });
        let (client, _rx) = Client::channel(1, 8);

        assert!(topic
            .handle_message(&client, "game/5", events::SUBSCRIBE, "null")
            .await
            .is_err());
        let room = topic.rooms().unwrap().get("5").await.unwrap();
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_client_runs_unsubscribe_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let topic = counting_topic("game/{id}", &counter);
        let (client, _rx) = Client::channel(1, 8);

        for name in ["game/1", "game/2"] {
            topic
                .handle_message(&client, name, events::SUBSCRIBE, "null")
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert_eq!(topic.remove_client(&client).await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(topic.remove_client(&client).await, 0);
    }
}
