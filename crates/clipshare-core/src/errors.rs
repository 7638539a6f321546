use crate::codes::SessionCode;
use crate::ids::ItemId;

/// Errors raised by session operations.
///
/// The `Display` text is human readable and is what clients see inside an
/// `error` event or an HTTP error body.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid code. Please enter a 4-digit number.")]
    CodeFormat(String),

    #[error("Session not found")]
    SessionNotFound(SessionCode),

    #[error("Join a session before sending content")]
    NotJoined,

    #[error("Text content cannot be empty")]
    EmptyContent,

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("File not found")]
    ItemNotFound(ItemId),

    #[error("Invalid message format")]
    MalformedFrame(String),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl SessionError {
    /// Short classification string for logging and HTTP bodies.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::CodeFormat(_) => "code_format",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NotJoined => "not_joined",
            Self::EmptyContent => "empty_content",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::ItemNotFound(_) => "item_not_found",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::ShuttingDown => "shutting_down",
            Self::ConnectionClosed => "connection_closed",
        }
    }

    /// Whether the error means the addressed thing does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::ItemNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_format_message_is_user_facing() {
        let err = SessionError::CodeFormat("12a4".into());
        assert!(err.to_string().starts_with("Invalid code"));
    }

    #[test]
    fn payload_too_large_reports_sizes() {
        let err = SessionError::PayloadTooLarge { size: 200, limit: 100 };
        let msg = err.to_string();
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn malformed_frame_hides_parser_detail() {
        let err = SessionError::MalformedFrame("expected value at line 1".into());
        assert_eq!(err.to_string(), "Invalid message format");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SessionError::NotJoined.error_kind(), "not_joined");
        assert_eq!(SessionError::EmptyContent.error_kind(), "empty_content");
        assert_eq!(SessionError::ShuttingDown.error_kind(), "shutting_down");
        assert_eq!(
            SessionError::ItemNotFound(ItemId::from("x")).error_kind(),
            "item_not_found"
        );
    }

    #[test]
    fn not_found_classification() {
        let code = SessionCode::parse("1234").unwrap();
        assert!(SessionError::SessionNotFound(code).is_not_found());
        assert!(SessionError::ItemNotFound(ItemId::from("x")).is_not_found());
        assert!(!SessionError::NotJoined.is_not_found());
    }
}
