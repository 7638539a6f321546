//! # clipshare-core
//!
//! Shared vocabulary for the clipshare server:
//!
//! - **Session codes**: [`SessionCode`], a validated four-digit room code
//! - **IDs**: [`ItemId`] and [`ConnectionId`] newtypes
//! - **Items**: [`ClipboardItem`] with text, file, and image variants
//! - **Wire events**: [`ClientIntent`] (inbound) and [`ServerEvent`] (outbound)
//! - **Errors**: [`SessionError`], the taxonomy surfaced to clients

#![deny(unsafe_code)]

pub mod codes;
pub mod errors;
pub mod events;
pub mod ids;
pub mod items;

pub use codes::SessionCode;
pub use errors::SessionError;
pub use events::{ClientIntent, ServerEvent};
pub use ids::{ConnectionId, ItemId};
pub use items::{ClipboardItem, FileAttachment, ItemContent, ItemKind};
