//! Rooms: the set of connections subscribed to one topic or one topic parameter
//!
//! Membership changes are serialized by a per-room lock. Broadcasting takes a
//! snapshot of the members under the lock and releases it before queueing the
//! frame on each connection, so a slow client never blocks subscribe or
//! unsubscribe on the same room.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::client::{Client, ClientId};
use crate::error::{ServerError, ServerResult};

#[derive(Debug)]
pub struct Room {
    param: Option<String>,
    clients: Mutex<HashMap<ClientId, Client>>,
}

impl Room {
    pub fn new(param: Option<String>) -> Self {
        Self {
            param,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Captured topic parameter (for example the game id of `game/42`).
    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub async fn register_client(&self, client: Client) -> ServerResult<()> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(&client.id) {
            return Err(ServerError::AlreadySubscribed(self.describe()));
        }
        debug!("Client {} joined {}", client.id, self.describe());
        clients.insert(client.id, client);
        Ok(())
    }

    /// Removes the client. Unregistering an absent client is a no-op.
    pub async fn unregister_client(&self, client_id: ClientId) -> bool {
        let removed = self.clients.lock().await.remove(&client_id).is_some();
        if removed {
            debug!("Client {} left {}", client_id, self.describe());
        }
        removed
    }

    pub async fn get_client(&self, client_id: ClientId) -> Option<Client> {
        self.clients.lock().await.get(&client_id).cloned()
    }

    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&client_id)
    }

    /// Queues `message` on every member. Returns how many queues accepted it.
    pub async fn broadcast_message(&self, message: &str) -> usize {
        let members: Vec<Client> = self.clients.lock().await.values().cloned().collect();

        members
            .iter()
            .filter(|client| client.send_text(message.to_string()))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn describe(&self) -> String {
        match &self.param {
            Some(param) => format!("room {}", param),
            None => "room".to_string(),
        }
    }
}

/// Rooms of a parameterized topic, keyed by captured parameter and created lazily.
///
/// Rooms are kept after their last member leaves.
#[derive(Debug, Default)]
pub struct RoomMap {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, param: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(param).cloned()
    }

    pub async fn get_or_create(&self, param: &str) -> Arc<Room> {
        if let Some(room) = self.get(param).await {
            return room;
        }

        let mut rooms = self.rooms.write().await;
        Arc::clone(
            rooms
                .entry(param.to_string())
                .or_insert_with(|| Arc::new(Room::new(Some(param.to_string())))),
        )
    }

    pub async fn all(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_get_client() {
        let room = Room::new(Some("42".to_string()));
        let (client, _rx) = Client::channel(1, 4);

        room.register_client(client).await.unwrap();
        assert_eq!(room.len().await, 1);
        assert_eq!(room.param(), Some("42"));
        assert!(room.get_client(1).await.is_some());
        assert!(room.get_client(2).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let room = Room::new(None);
        let (client, _rx) = Client::channel(1, 4);

        room.register_client(client.clone()).await.unwrap();
        let err = room.register_client(client).await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadySubscribed(_)));
        assert_eq!(room.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_absent_client_is_noop() {
        let room = Room::new(None);
        assert!(!room.unregister_client(9).await);

        let (client, _rx) = Client::channel(9, 4);
        room.register_client(client).await.unwrap();
        assert!(room.unregister_client(9).await);
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let room = Room::new(None);
        let mut receivers = Vec::new();
        for id in 0..3 {
            let (client, rx) = Client::channel(id, 4);
            room.register_client(client).await.unwrap();
            receivers.push(rx);
        }
        let (outsider, mut outsider_rx) = Client::channel(99, 4);
        drop(outsider);

        assert_eq!(room.broadcast_message("hello").await, 3);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), "hello");
        }
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_full_queue() {
        let room = Room::new(None);
        let (slow, mut slow_rx) = Client::channel(1, 1);
        let (fast, mut fast_rx) = Client::channel(2, 8);
        room.register_client(slow).await.unwrap();
        room.register_client(fast).await.unwrap();

        assert_eq!(room.broadcast_message("one").await, 2);
        assert_eq!(room.broadcast_message("two").await, 1);

        assert_eq!(slow_rx.try_recv().unwrap(), "one");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap(), "one");
        assert_eq!(fast_rx.try_recv().unwrap(), "two");
    }

    #[tokio::test]
    async fn test_room_map_creates_lazily_and_keeps_rooms() {
        let rooms = RoomMap::new();
        assert!(rooms.get("1").await.is_none());

        let room = rooms.get_or_create("1").await;
        let again = rooms.get_or_create("1").await;
        assert!(Arc::ptr_eq(&room, &again));
        assert_eq!(room.param(), Some("1"));

        let (client, _rx) = Client::channel(1, 4);
        room.register_client(client).await.unwrap();
        room.unregister_client(1).await;
        assert_eq!(rooms.len().await, 1);
    }
}
