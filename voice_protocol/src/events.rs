//! JSON control events carried inside full request/response frames.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};

/// Known event names. Servers may send others; those stay as plain strings
/// on [`JsonEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum EventType {
    /// Server is ready to accept input
    BotReady,
    /// Partial user transcript
    SentenceRecognized,
    /// Final user transcript for the utterance
    SentenceRecognizedDone,
    /// Partial bot reply text
    LLMResponse,
    LLMResponseDone,
    /// Server finished the whole turn
    ResponseDone,
    /// Client → server: change bot configuration
    BotUpdateConfig,
    UserAudio,
}

/// `{ "event": ..., "payload": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl JsonEvent {
    pub fn new(event: EventType, payload: Option<Value>) -> Self {
        Self {
            event: event.to_string(),
            payload,
        }
    }

    /// Interpret a decoded JSON payload as an event envelope.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_str(&self.event).ok()
    }

    pub fn is(&self, event: EventType) -> bool {
        self.event == event.as_ref()
    }

    /// The `sentence` field carried by transcript and reply events.
    pub fn sentence(&self) -> Option<&str> {
        self.payload.as_ref()?.get("sentence")?.as_str()
    }

    pub fn to_value(&self) -> Value {
        match &self.payload {
            Some(payload) => json!({ "event": self.event, "payload": payload }),
            None => json!({ "event": self.event }),
        }
    }

    /// `BotUpdateConfig` carrying the selected speaker voice.
    pub fn update_config(speaker: &str) -> Self {
        Self::new(
            EventType::BotUpdateConfig,
            Some(json!({ "speaker": speaker })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::BotReady.to_string(), "BotReady");
        assert_eq!(EventType::LLMResponse.as_ref(), "LLMResponse");
        assert_eq!(
            EventType::from_str("SentenceRecognizedDone").ok(),
            Some(EventType::SentenceRecognizedDone)
        );
        assert!(EventType::from_str("SomethingElse").is_err());
    }

    #[test]
    fn test_parse_envelope() {
        let value = json!({"event": "SentenceRecognized", "payload": {"sentence": "hello"}});
        let event = JsonEvent::from_value(&value).unwrap();

        assert_eq!(event.event_type(), Some(EventType::SentenceRecognized));
        assert_eq!(event.sentence(), Some("hello"));
    }

    #[test]
    fn test_unknown_event_kept() {
        let event = JsonEvent::from_value(&json!({"event": "Custom"})).unwrap();
        assert_eq!(event.event_type(), None);
        assert_eq!(event.event, "Custom");
        assert!(event.payload.is_none());
    }

    #[test]
    fn test_non_envelope_rejected() {
        assert!(JsonEvent::from_value(&json!([1, 2, 3])).is_none());
        assert!(JsonEvent::from_value(&json!({"payload": {}})).is_none());
    }

    #[test]
    fn test_update_config_shape() {
        let value = JsonEvent::update_config("zh_female").to_value();
        assert_eq!(
            value,
            json!({"event": "BotUpdateConfig", "payload": {"speaker": "zh_female"}})
        );
    }
}
