use log::{debug, warn};
use serde::Serialize;
use shared::{events, OutboundMessage};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::error::ServerResult;

pub type ClientId = u64;

/// Handle on one connected client: its id and the queue feeding its send loop.
///
/// Cloning is cheap and every clone writes into the same queue.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub addr: Option<SocketAddr>,
    pub connected_at: Instant,
    sender: mpsc::Sender<String>,
}

impl Client {
    pub fn new(id: ClientId, addr: Option<SocketAddr>, sender: mpsc::Sender<String>) -> Self {
        Client {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Creates a client backed by an in-process queue. Used by tests and by
    /// anything that wants to observe what a connection would receive.
    pub fn channel(id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Client::new(id, None, sender), receiver)
    }

    /// Identity string used for seeks and player ids.
    pub fn identity(&self) -> String {
        self.id.to_string()
    }

    // Queue an already encoded frame without waiting on the connection
    pub fn send_text(&self, text: String) -> bool {
        match self.sender.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Send queue of client {} is full, dropping frame", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Client {} is gone, dropping frame", self.id);
                false
            }
        }
    }

    pub fn send_message<T: Serialize>(&self, topic: &str, event: &str, payload: T) -> ServerResult<()> {
        let json = OutboundMessage::new(topic, event, payload).to_json()?;
        self.send_text(json);
        Ok(())
    }

    pub fn send_error(&self, topic: &str, message: &str) -> ServerResult<()> {
        self.send_message(topic, events::ERROR, message)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
