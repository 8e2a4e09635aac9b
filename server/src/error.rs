//! Error taxonomy for the realtime server
//!
//! Errors split into two families. Client errors are answered with an
//! `error` envelope sent only to the requesting connection, which stays
//! open. Internal errors (store, serialization, transport) are logged and
//! close the connection that triggered them.

use shared::GameId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("message is malformed: {0}")]
    MalformedEnvelope(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("\"{0}\" is not a valid topic")]
    UnknownTopic(String),

    #[error("{0} is not a registered event")]
    UnknownEvent(String),

    #[error("not subscribed to {0}")]
    NotAuthorized(String),

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("it is not your turn")]
    WrongTurn,

    #[error("game {0} is already over")]
    GameOver(GameId),

    #[error("game {0} was updated before your request could be completed, please resubmit")]
    Conflict(GameId),

    #[error("{0} not found")]
    NotFound(String),

    #[error("pattern is not valid: {0}")]
    InvalidPattern(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// True for rejections that are answered to the sender and leave the
    /// connection open.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ServerError::Store(_)
                | ServerError::Json(_)
                | ServerError::WebSocket(_)
                | ServerError::Io(_)
                | ServerError::InvalidPattern(_)
        )
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
