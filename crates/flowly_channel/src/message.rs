use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Who sent an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct Participant {
    pub id: String,                   // platform identity, e.g. the WhatsApp wa_id
    pub display_name: Option<String>, // profile name, if the channel shares it
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
        }
    }
}

/// One inbound chat event, already parsed out of the vendor webhook.
///
/// `routing_key` identifies the business number the message arrived on and is
/// what the engine maps onto a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub routing_key: String,
    pub from: Participant,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub content: EventContent,
}

impl InboundEvent {
    pub fn new(routing_key: impl Into<String>, from: Participant, content: EventContent) -> Self {
        Self {
            id: String::new(),
            routing_key: routing_key.into(),
            from,
            timestamp: Utc::now(),
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventContent {
    Text {
        body: String,
    },
    ListReply {
        id: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        description: String,
    },
    ButtonReply {
        id: String,
        #[serde(default)]
        title: String,
    },
    /// Images, locations, reactions and anything else the engine has no rule for.
    #[serde(other)]
    Unsupported,
}

impl EventContent {
    pub fn kind(&self) -> &'static str {
        match self {
            EventContent::Text { .. } => "text",
            EventContent::ListReply { .. } => "interactive-list-reply",
            EventContent::ButtonReply { .. } => "interactive-button-reply",
            EventContent::Unsupported => "unsupported",
        }
    }

    /// The option id picked by an interactive reply.
    pub fn selected_option(&self) -> Option<&str> {
        match self {
            EventContent::ListReply { id, .. } | EventContent::ButtonReply { id, .. } => {
                Some(id.as_str())
            }
            _ => None,
        }
    }
}

/// Channel-agnostic description of what the bot sends next.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: OutgoingKind,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OutgoingOptions>,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: OutgoingKind::Text,
            body: body.into(),
            header: None,
            footer: None,
            options: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutgoingKind {
    Text,
    List,
    Buttons,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageHeader {
    Text { text: String },
    Image { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingOptions {
    List {
        button_text: String,
        sections: Vec<OptionSection>,
    },
    Buttons {
        buttons: Vec<ButtonOption>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OptionSection {
    pub title: String,
    pub rows: Vec<OptionRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OptionRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ButtonOption {
    pub id: String,
    pub title: String,
}

/// What log levels are supported?
/// Higher‐value variants are more severe.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
    EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level. `Critical` has no tracing
    /// equivalent and filters like `error`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_list_reply_event() {
        let ev: InboundEvent = serde_json::from_value(json!({
            "routing_key": "1041740029016016",
            "from": { "id": "5491100000000", "display_name": "Ana" },
            "content": { "type": "list_reply", "id": "A", "title": "Pricing" }
        }))
        .unwrap();

        assert_eq!(ev.content.selected_option(), Some("A"));
        assert_eq!(ev.content.kind(), "interactive-list-reply");
        assert_eq!(ev.from.display_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn unknown_event_type_is_unsupported() {
        let content: EventContent =
            serde_json::from_value(json!({ "type": "location" })).unwrap();
        assert_eq!(content, EventContent::Unsupported);
        assert_eq!(content.selected_option(), None);
    }

    #[test]
    fn text_message_omits_empty_parts() {
        let v = serde_json::to_value(OutgoingMessage::text("hi")).unwrap();
        assert_eq!(v, json!({ "kind": "text", "body": "hi" }));
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Critical.as_filter(), "error");
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
