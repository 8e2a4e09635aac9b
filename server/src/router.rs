//! Inbound envelope routing
//!
//! The router parses `{topic, event, payload}` envelopes, hands them to the
//! first registered topic whose pattern matches and turns client-facing
//! failures into `error` replies for the sender.

use log::{debug, error};
use shared::{events, InboundMessage};

use crate::client::Client;
use crate::error::{ServerError, ServerResult};
use crate::topic::Topic;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

#[derive(Default)]
pub struct Router {
    topics: Vec<Topic>,
}

fn parse_envelope(raw: &str) -> ServerResult<InboundMessage> {
    let message = InboundMessage::from_json(raw)
        .map_err(|e| ServerError::MalformedEnvelope(e.to_string()))?;

    let missing = message.missing_fields();
    if !missing.is_empty() {
        return Err(ServerError::MalformedEnvelope(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }
    Ok(message)
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics are tried in insertion order.
    pub fn push_topic(&mut self, topic: Topic) {
        self.topics.push(topic);
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.iter().find(|topic| topic.name() == name)
    }

    async fn dispatch(&self, client: &Client, message: &InboundMessage) -> ServerResult<()> {
        let topic = self
            .topics
            .iter()
            .find(|topic| topic.matches(&message.topic))
            .ok_or_else(|| ServerError::UnknownTopic(message.topic.clone()))?;

        topic
            .handle_message(client, &message.topic, &message.event, message.payload_str())
            .await
    }

    /// Parses and dispatches one frame, returning the handler's outcome untouched.
    pub async fn route(&self, client: &Client, raw: &str) -> ServerResult<()> {
        let message = parse_envelope(raw)?;
        self.dispatch(client, &message).await
    }

    /// Entry point for a connection's receive loop.
    ///
    /// Client errors are answered with an `error` envelope and swallowed.
    /// Internal errors are answered with a generic message and returned so
    /// the caller can close the connection.
    pub async fn handle_ws_message(&self, client: &Client, raw: &str) -> ServerResult<()> {
        let (reply_topic, result) = match parse_envelope(raw) {
            Ok(message) => {
                let result = self.dispatch(client, &message).await;
                (message.topic, result)
            }
            Err(e) => (events::ERROR.to_string(), Err(e)),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_client_error() => {
                debug!("Rejected message from client {}: {}", client.id, e);
                client.send_error(&reply_topic, &e.to_string())
            }
            Err(e) => {
                error!("Failed to handle message from client {}: {}", client.id, e);
                let _ = client.send_error(&reply_topic, GENERIC_ERROR_MESSAGE);
                Err(e)
            }
        }
    }

    /// Removes a closing connection from every topic.
    pub async fn disconnect(&self, client: &Client) {
        let mut left = 0;
        for topic in &self.topics {
            left += topic.remove_client(client).await;
        }
        debug!("Client {} disconnected, left {} rooms", client.id, left);
    }
}
