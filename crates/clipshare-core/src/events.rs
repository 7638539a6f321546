//! Socket wire protocol.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! decode into [`ClientIntent`]; outbound frames are built from
//! [`ServerEvent`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codes::SessionCode;
use crate::errors::SessionError;
use crate::items::ClipboardItem;

/// Message sent to a session's members when the session expires.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired due to inactivity";

/// Message sent to every member when the server shuts down.
pub const SERVER_SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Notice sent to existing members when someone joins.
pub const USER_JOINED_MESSAGE: &str = "A user joined the session";

/// Client → server intents. The set is closed; unknown `type`s fail to decode.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientIntent {
    /// The code is kept raw so format errors are reported as such rather
    /// than as undecodable frames. A JSON number is read as its digits; a
    /// missing or null code becomes empty.
    JoinSession {
        #[serde(default, deserialize_with = "raw_code")]
        code: String,
    },
    AddText { content: String },
    ClearClipboard,
}

fn raw_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(code)) => code,
        Some(other) => other.to_string(),
    })
}

impl ClientIntent {
    /// Decode one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, SessionError> {
        serde_json::from_str(frame).map_err(|e| SessionError::MalformedFrame(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinSession { .. } => "join_session",
            Self::AddText { .. } => "add_text",
            Self::ClearClipboard => "clear_clipboard",
        }
    }
}

/// Server → client events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionJoined {
        code: SessionCode,
        items: Vec<ClipboardItem>,
    },
    ItemAdded {
        item: ClipboardItem,
    },
    ClipboardCleared,
    SessionEnded {
        message: String,
    },
    UserJoined {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn user_joined() -> Self {
        Self::UserJoined {
            message: USER_JOINED_MESSAGE.to_owned(),
        }
    }

    pub fn session_ended(reason: impl Into<String>) -> Self {
        Self::SessionEnded {
            message: reason.into(),
        }
    }

    /// Error event carrying the user-facing text of `err`.
    pub fn error(err: &SessionError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionJoined { .. } => "session_joined",
            Self::ItemAdded { .. } => "item_added",
            Self::ClipboardCleared => "clipboard_cleared",
            Self::SessionEnded { .. } => "session_ended",
            Self::UserJoined { .. } => "user_joined",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
