//! Clipboard items.
//!
//! An item is text, a file, or an image. Images are files whose MIME type
//! starts with `image/`; the split is decided once, at ingestion.
//!
//! File payloads are never serialized. Socket events and item listings carry
//! metadata only and clients fetch bytes through the download endpoints.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::ItemId;

/// Author label stamped on items created by clients.
pub const DEFAULT_AUTHOR: &str = "user";

/// One unit of shared content.
#[derive(Clone, Debug, Serialize)]
pub struct ClipboardItem {
    pub id: ItemId,
    #[serde(flatten)]
    pub content: ItemContent,
    pub timestamp: DateTime<Utc>,
    pub author: String,
}

/// Variant-specific item data. Serialized with a `type` discriminator.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemContent {
    Text { content: String },
    File(FileAttachment),
    Image(FileAttachment),
}

/// Metadata and bytes of an uploaded file.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub mime_type: String,
    #[serde(skip)]
    pub payload: Bytes,
}

/// Item variant without its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    File,
    Image,
}

impl ItemKind {
    /// Classify an upload by MIME type.
    pub fn for_mime_type(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
        }
    }
}

impl FileAttachment {
    /// Build an attachment; `size_bytes` is taken from the payload.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, payload: Bytes) -> Self {
        Self {
            name: name.into(),
            size_bytes: payload.len() as u64,
            mime_type: mime_type.into(),
            payload,
        }
    }
}

impl ClipboardItem {
    /// A text item with a fresh ID and the current time.
    pub fn text(content: impl Into<String>) -> Self {
        Self::with_content(ItemContent::Text {
            content: content.into(),
        })
    }

    /// A file or image item, classified by the attachment's MIME type.
    pub fn file(attachment: FileAttachment) -> Self {
        let content = match ItemKind::for_mime_type(&attachment.mime_type) {
            ItemKind::Image => ItemContent::Image(attachment),
            _ => ItemContent::File(attachment),
        };
        Self::with_content(content)
    }

    fn with_content(content: ItemContent) -> Self {
        Self {
            id: ItemId::new(),
            content,
            timestamp: Utc::now(),
            author: DEFAULT_AUTHOR.to_owned(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self.content {
            ItemContent::Text { .. } => ItemKind::Text,
            ItemContent::File(_) => ItemKind::File,
            ItemContent::Image(_) => ItemKind::Image,
        }
    }

    /// The attachment for file and image items.
    pub fn attachment(&self) -> Option<&FileAttachment> {
        match &self.content {
            ItemContent::File(a) | ItemContent::Image(a) => Some(a),
            ItemContent::Text { .. } => None,
        }
    }
}
