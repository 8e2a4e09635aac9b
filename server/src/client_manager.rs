//! Connection roster for the realtime server
//!
//! This module tracks every live WebSocket connection:
//! - Server-assigned connection ids, which double as player identities
//! - The bounded outbound queue each connection's send loop drains
//! - Capacity enforcement so the server refuses connections past its limit
//!
//! Topic membership lives in rooms, not here. A connection only appears in a
//! room after subscribing, but it appears in the roster from the moment its
//! handshake completes until its loops exit.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::client::{Client, ClientId};

/// Manages all connected clients
///
/// Ids start at 1 and are never reused while the process lives, so a stale
/// seek or game seat can never be claimed by a later connection.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ClientId, Client>,
    /// Next available client ID for new connections
    next_client_id: ClientId,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Depth of each connection's outbound queue
    queue_capacity: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize, queue_capacity: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns the client handle and the receiving end of its outbound queue,
    /// or None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<(Client, mpsc::Receiver<String>)> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let client = Client::new(client_id, Some(addr), sender);
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client.clone());

        Some((client, receiver))
    }

    /// Removes a client. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {:?}",
                client.id,
                client.connected_at.elapsed()
            );
            true
        } else {
            false
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5, 16);
        assert_eq!(manager.max_clients(), 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3, 16);

        let (client1, _rx1) = manager.add_client(test_addr()).unwrap();
        let (client2, _rx2) = manager.add_client(test_addr2()).unwrap();

        assert_eq!(client1.id, 1);
        assert_eq!(client2.id, 2);
        assert_eq!(client2.addr, Some(test_addr2()));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1, 16);

        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client_frees_slot_without_reusing_id() {
        let mut manager = ClientManager::new(1, 16);

        let (client, _rx) = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(&client.id));
        assert!(!manager.remove_client(&client.id));
        assert!(manager.is_empty());

        let (next, _rx) = manager.add_client(test_addr()).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_queue_feeds_receiver() {
        let mut manager = ClientManager::new(1, 2);
        let (client, mut rx) = manager.add_client(test_addr()).unwrap();

        assert!(client.send_text("hi".into()));
        assert_eq!(rx.try_recv().unwrap(), "hi");
    }
}
