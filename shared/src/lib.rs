use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const GAME_TOPIC: &str = "game";
pub const GAMESEEKS_TOPIC: &str = "gameseeks";

/// Player identity used for games against the engine. Such games never run a clock.
pub const ENGINE_PLAYER: &str = "engine";

pub const TIME_OUT_METHOD: &str = "time out";

/// Longest accepted base time in milliseconds (one day).
pub const MAX_BASE_TIME: u64 = 24 * 60 * 60 * 1000;
/// Longest accepted increment in milliseconds (one hour).
pub const MAX_INCREMENT: u64 = 60 * 60 * 1000;

/// Checks a time control, describing the first problem found.
pub fn validate_time_control(time: u64, increment: u64) -> Result<(), String> {
    if time == 0 || time > MAX_BASE_TIME {
        return Err(format!("time must be between 1 and {} ms", MAX_BASE_TIME));
    }
    if increment > MAX_INCREMENT {
        return Err(format!("increment must be at most {} ms", MAX_INCREMENT));
    }
    Ok(())
}

pub mod events {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const INSERT: &str = "insert";
    pub const ACCEPT: &str = "accept";
    pub const INIT: &str = "init";
    pub const MAKE_MOVE: &str = "make-move";
    pub const UPDATE_DRAW: &str = "update-draw";
    pub const UPDATE_RESULT: &str = "update-result";
    pub const TIME_OUT: &str = "time-out";
    pub const GAME_OVER: &str = "game-over";
    pub const DELETION: &str = "deletion";
    pub const ERROR: &str = "error";
}

pub type GameId = u64;
pub type GameseekId = u64;

pub fn game_topic(id: GameId) -> String {
    format!("{}/{}", GAME_TOPIC, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn other(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final score of a finished game, in the `1-0` / `0-1` / `1/2-1/2` notation
/// stored in `Game::result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    WhiteWon,
    BlackWon,
    Draw,
}

impl Outcome {
    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => Outcome::WhiteWon,
            Color::Black => Outcome::BlackWon,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::WhiteWon => "1-0",
            Outcome::BlackWon => "0-1",
            Outcome::Draw => "1/2-1/2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1-0" => Some(Outcome::WhiteWon),
            "0-1" => Some(Outcome::BlackWon),
            "1/2-1/2" => Some(Outcome::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative record of one game.
///
/// Times are in milliseconds. `time_stamp_at_turn_start` is wall-clock
/// milliseconds since the Unix epoch. `result` and `method` stay empty while
/// the game is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub white_id: String,
    pub black_id: String,
    pub time: u64,
    pub increment: u64,
    pub time_stamp_at_turn_start: i64,
    pub white_time: i64,
    pub black_time: i64,
    pub history: String,
    pub moves: String,
    pub result: String,
    pub method: String,
    pub version: u64,
    pub white_draw_status: bool,
    pub black_draw_status: bool,
}

impl Game {
    pub fn new(
        white_id: impl Into<String>,
        black_id: impl Into<String>,
        time: u64,
        increment: u64,
    ) -> Self {
        Self {
            id: 0,
            white_id: white_id.into(),
            black_id: black_id.into(),
            time,
            increment,
            time_stamp_at_turn_start: 0,
            white_time: time as i64,
            black_time: time as i64,
            history: String::new(),
            moves: String::new(),
            result: String::new(),
            method: String::new(),
            version: 0,
            white_draw_status: false,
            black_draw_status: false,
        }
    }

    pub fn is_over(&self) -> bool {
        !self.result.is_empty()
    }

    pub fn player_id(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white_id,
            Color::Black => &self.black_id,
        }
    }

    pub fn remaining(&self, color: Color) -> i64 {
        match color {
            Color::White => self.white_time,
            Color::Black => self.black_time,
        }
    }

    pub fn move_list(&self) -> Vec<&str> {
        self.moves.split_whitespace().collect()
    }

    pub fn has_engine(&self) -> bool {
        self.white_id == ENGINE_PLAYER || self.black_id == ENGINE_PLAYER
    }

    /// Merges a change set into this record. Does not touch `version`.
    pub fn apply_changes(&mut self, changes: &ChangeSet) -> Result<(), ChangeSetError> {
        for (field, value) in changes.iter() {
            let mismatch = |expected| ChangeSetError { field, expected };
            match field {
                GameField::WhiteTime => {
                    self.white_time = value.as_i64().ok_or_else(|| mismatch("integer"))?
                }
                GameField::BlackTime => {
                    self.black_time = value.as_i64().ok_or_else(|| mismatch("integer"))?
                }
                GameField::TimeStampAtTurnStart => {
                    self.time_stamp_at_turn_start =
                        value.as_i64().ok_or_else(|| mismatch("integer"))?
                }
                GameField::Moves => {
                    self.moves = value.as_str().ok_or_else(|| mismatch("string"))?.to_string()
                }
                GameField::History => {
                    self.history = value.as_str().ok_or_else(|| mismatch("string"))?.to_string()
                }
                GameField::Result => {
                    self.result = value.as_str().ok_or_else(|| mismatch("string"))?.to_string()
                }
                GameField::Method => {
                    self.method = value.as_str().ok_or_else(|| mismatch("string"))?.to_string()
                }
                GameField::WhiteDrawStatus => {
                    self.white_draw_status = value.as_bool().ok_or_else(|| mismatch("bool"))?
                }
                GameField::BlackDrawStatus => {
                    self.black_draw_status = value.as_bool().ok_or_else(|| mismatch("bool"))?
                }
            }
        }
        Ok(())
    }
}

/// Field tags a `ChangeSet` may carry. Serialized as the snake_case column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameField {
    WhiteTime,
    BlackTime,
    TimeStampAtTurnStart,
    Moves,
    History,
    Result,
    Method,
    WhiteDrawStatus,
    BlackDrawStatus,
}

impl GameField {
    pub fn time_of(color: Color) -> Self {
        match color {
            Color::White => GameField::WhiteTime,
            Color::Black => GameField::BlackTime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetError {
    pub field: GameField,
    pub expected: &'static str,
}

impl fmt::Display for ChangeSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {:?} expects a {} value", self.field, self.expected)
    }
}

impl std::error::Error for ChangeSetError {}

/// Ordered field-tag → value mapping describing one transition of a `Game`.
///
/// The same value is merged by the store and sent verbatim as the broadcast
/// payload, so it serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    fields: BTreeMap<GameField, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: GameField, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn get(&self, field: GameField) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: GameField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GameField, &Value)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when applying this change set ends the game.
    pub fn ends_game(&self) -> bool {
        self.get(GameField::Result)
            .and_then(Value::as_str)
            .map_or(false, |result| !result.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekColor {
    White,
    Black,
    Random,
}

/// A pending request to be paired into a new game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gameseek {
    #[serde(default)]
    pub id: GameseekId,
    pub color: SeekColor,
    pub time: u64,
    pub increment: u64,
    #[serde(default)]
    pub seeker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekRequest {
    pub color: SeekColor,
    pub time: u64,
    pub increment: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub gameseek_id: GameseekId,
}

/// Sent privately to each paired player once a seek has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedGame {
    pub game_id: GameId,
    pub color: Color,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub player_id: String,
    #[serde(default, rename = "move")]
    pub mv: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRequest {
    pub white: bool,
    pub black: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRequest {
    pub method: String,
    pub result: String,
}

/// Envelope received from a client. The payload is kept as raw JSON text
/// so that the topic handler decides how to read it.
#[derive(Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl InboundMessage {
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.into(),
            event: event.into(),
            payload: Some(serde_json::value::to_raw_value(payload)?),
        })
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Raw payload text; `null` when the client sent none.
    pub fn payload_str(&self) -> &str {
        self.payload.as_deref().map_or("null", RawValue::get)
    }

    pub fn parse_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.payload_str())
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.topic.is_empty() {
            missing.push("topic");
        }
        if self.event.is_empty() {
            missing.push("event");
        }
        missing
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage<T> {
    pub topic: String,
    pub event: String,
    pub payload: T,
}

impl<T: Serialize> OutboundMessage<T> {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: T) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_creation() {
        let game = Game::new("alice", "bob", 900_000, 60_000);
        assert_eq!(game.white_time, 900_000);
        assert_eq!(game.black_time, 900_000);
        assert_eq!(game.player_id(Color::White), "alice");
        assert_eq!(game.player_id(Color::Black), "bob");
        assert!(!game.is_over());
        assert!(!game.has_engine());
        assert!(game.move_list().is_empty());
    }

    #[test]
    fn test_engine_detection() {
        let game = Game::new("alice", ENGINE_PLAYER, 60_000, 0);
        assert!(game.has_engine());
    }

    #[test]
    fn test_color_and_outcome() {
        assert_eq!(Color::White.other(), Color::Black);
        assert_eq!(Outcome::win_for(Color::Black).as_str(), "0-1");
        assert_eq!(Outcome::parse("1/2-1/2"), Some(Outcome::Draw));
        assert_eq!(Outcome::parse("2-0"), None);
    }

    #[test]
    fn test_change_set_serializes_as_object() {
        let mut changes = ChangeSet::new();
        changes
            .set(GameField::WhiteTime, 955_000)
            .set(GameField::Moves, "e2e4")
            .set(GameField::WhiteDrawStatus, false);

        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(json["white_time"], 955_000);
        assert_eq!(json["moves"], "e2e4");
        assert_eq!(json["white_draw_status"], false);

        let back: ChangeSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
    }

    #[test]
    fn test_change_set_keeps_field_order() {
        let mut changes = ChangeSet::new();
        changes
            .set(GameField::Result, "1-0")
            .set(GameField::WhiteTime, 1);
        let fields: Vec<GameField> = changes.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec![GameField::WhiteTime, GameField::Result]);
        assert!(changes.ends_game());
    }

    #[test]
    fn test_apply_changes() {
        let mut game = Game::new("alice", "bob", 60_000, 0);
        let mut changes = ChangeSet::new();
        changes
            .set(GameField::BlackTime, 42)
            .set(GameField::Moves, "e2e4 e7e5")
            .set(GameField::BlackDrawStatus, true);

        game.apply_changes(&changes).unwrap();
        assert_eq!(game.black_time, 42);
        assert_eq!(game.move_list(), vec!["e2e4", "e7e5"]);
        assert!(game.black_draw_status);
        assert_eq!(game.version, 0);
    }

    #[test]
    fn test_apply_changes_rejects_wrong_type() {
        let mut game = Game::new("alice", "bob", 60_000, 0);
        let mut changes = ChangeSet::new();
        changes.set(GameField::WhiteTime, "soon");

        let err = game.apply_changes(&changes).unwrap_err();
        assert_eq!(err.field, GameField::WhiteTime);
        assert_eq!(game.white_time, 60_000);
    }

    #[test]
    fn test_inbound_message_keeps_payload_bytes() {
        let raw = r#"{"topic":"game/42","event":"make-move","payload":{"move": "e2e4",  "player_id":"7"}}"#;
        let message = InboundMessage::from_json(raw).unwrap();
        assert_eq!(message.topic, "game/42");
        assert_eq!(message.event, "make-move");
        assert_eq!(message.payload_str(), r#"{"move": "e2e4",  "player_id":"7"}"#);

        let encoded = message.to_json().unwrap();
        let decoded = InboundMessage::from_json(&encoded).unwrap();
        assert_eq!(decoded.topic, message.topic);
        assert_eq!(decoded.event, message.event);
        assert_eq!(decoded.payload_str(), message.payload_str());

        let request: MoveRequest = decoded.parse_payload().unwrap();
        assert_eq!(request.mv, "e2e4");
        assert_eq!(request.player_id, "7");
    }

    #[test]
    fn test_inbound_message_missing_fields() {
        let message = InboundMessage::from_json(r#"{"payload":1}"#).unwrap();
        assert_eq!(message.missing_fields(), vec!["topic", "event"]);

        let message = InboundMessage::from_json(r#"{"topic":"gameseeks","event":"subscribe"}"#)
            .unwrap();
        assert!(message.missing_fields().is_empty());
        assert_eq!(message.payload_str(), "null");
    }

    #[test]
    fn test_outbound_message_json() {
        let message = OutboundMessage::new(
            game_topic(3),
            events::INIT,
            AcceptedGame {
                game_id: 3,
                color: Color::Black,
            },
        );
        let json: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["topic"], "game/3");
        assert_eq!(json["event"], "init");
        assert_eq!(json["payload"]["color"], "black");
    }

    #[test]
    fn test_gameseek_defaults() {
        let seek: Gameseek =
            serde_json::from_str(r#"{"color":"random","time":300000,"increment":0}"#).unwrap();
        assert_eq!(seek.id, 0);
        assert_eq!(seek.color, SeekColor::Random);
        assert!(seek.seeker.is_empty());
    }

    #[test]
    fn test_time_control_limits() {
        assert!(validate_time_control(180_000, 2_000).is_ok());
        assert!(validate_time_control(MAX_BASE_TIME, MAX_INCREMENT).is_ok());
        assert!(validate_time_control(0, 0).is_err());
        assert!(validate_time_control(MAX_BASE_TIME + 1, 0).is_err());
        assert!(validate_time_control(60_000, MAX_INCREMENT + 1).is_err());
        assert!(validate_time_control(60_000, i64::MAX as u64).is_err());
    }
}
