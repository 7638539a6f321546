//! Turns client intents into store mutations and hub events.
//!
//! Every error is recovered here. Socket errors go back to the originating
//! connection as an `error` event; HTTP callers get the [`SessionError`].

use std::sync::Arc;

use bytes::Bytes;
use clipshare_core::{
    ClientIntent, ClipboardItem, ConnectionId, FileAttachment, ItemId, ServerEvent, SessionCode,
    SessionError,
};
use tracing::{debug, info, instrument, warn};

use crate::connection::{ClientConnection, TransportError};
use crate::registry::SessionRegistry;

/// Attempts at finding an unused code before settling for a used one.
const FRESH_CODE_ATTEMPTS: usize = 64;

/// An uploaded file, before it becomes an item.
#[derive(Clone, Debug)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub payload: Bytes,
}

#[derive(Clone)]
pub struct SessionController {
    registry: Arc<SessionRegistry>,
    max_upload_bytes: u64,
}

impl SessionController {
    pub fn new(registry: Arc<SessionRegistry>, max_upload_bytes: u64) -> Self {
        Self {
            registry,
            max_upload_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn connect(&self, connection: Arc<ClientConnection>) {
        info!(connection_id = %connection.id, "client connected");
        self.registry.hub().register(connection);
    }

    /// Forget a connection. Its session is left alone.
    pub fn disconnect(&self, id: &ConnectionId) {
        let code = self.registry.hub().unregister(id);
        info!(connection_id = %id, code = ?code.as_ref().map(SessionCode::as_str), "client disconnected");
    }

    /// Handle one inbound text frame.
    #[instrument(skip(self, id, frame), fields(connection_id = %id))]
    pub fn handle_frame(&self, id: &ConnectionId, frame: &str) {
        let result = ClientIntent::decode(frame).and_then(|intent| self.dispatch(id, intent));
        if let Err(err) = result {
            debug!(error_kind = err.error_kind(), error = %err, "intent rejected");
            if let Err(e) = self.registry.hub().send_to(id, &ServerEvent::error(&err)) {
                debug!(error_kind = e.error_kind(), "could not report error to client");
            }
        }
    }

    pub fn dispatch(&self, id: &ConnectionId, intent: ClientIntent) -> Result<(), SessionError> {
        debug!(intent = intent.name(), "dispatch");
        match intent {
            ClientIntent::JoinSession { code } => self.join(id, &code).map(|_| ()),
            ClientIntent::AddText { content } => self.add_text(id, content).map(|_| ()),
            ClientIntent::ClearClipboard => self.clear(id),
        }
    }

    /// Attach `id` to `raw_code`, creating the session if needed. The joiner
    /// gets `session_joined` with the current items; other members get
    /// `user_joined`.
    ///
    /// A connection that is gone or closing creates nothing.
    pub fn join(&self, id: &ConnectionId, raw_code: &str) -> Result<SessionCode, SessionError> {
        let code = SessionCode::parse(raw_code)?;
        let hub = self.registry.hub();
        if !hub.connection(id).is_some_and(|c| !c.is_closed()) {
            return Err(SessionError::ConnectionClosed);
        }
        self.registry
            .store()
            .get_or_create_with(&code, |session| {
                if let Some(previous) = hub.attach(id, &code)? {
                    debug!(connection_id = %id, from = %previous, to = %code, "switched session");
                }
                let joined = ServerEvent::SessionJoined {
                    code: code.clone(),
                    items: session.items.clone(),
                };
                if let Err(e) = hub.send_to(id, &joined) {
                    warn!(connection_id = %id, code = %code, error_kind = e.error_kind(), "join reply not delivered");
                }
                hub.broadcast_except(&code, &ServerEvent::user_joined(), id);
                Ok::<(), TransportError>(())
            })?
            .map_err(|e| {
                debug!(connection_id = %id, code = %code, error_kind = e.error_kind(), "attach failed");
                SessionError::ConnectionClosed
            })?;
        info!(connection_id = %id, code = %code, "joined session");
        Ok(code)
    }

    /// Append a text item to the caller's session and broadcast it to every
    /// member, sender included.
    pub fn add_text(&self, id: &ConnectionId, content: String) -> Result<ItemId, SessionError> {
        let code = self.joined_code(id)?;
        if content.trim().is_empty() {
            return Err(SessionError::EmptyContent);
        }
        let item = ClipboardItem::text(content);
        let item_id = item.id.clone();
        self.append_and_broadcast(&code, item)?;
        Ok(item_id)
    }

    /// Empty the caller's session.
    pub fn clear(&self, id: &ConnectionId) -> Result<(), SessionError> {
        let code = self.joined_code(id)?;
        let hub = self.registry.hub();
        let removed = self.registry.store().mutate(&code, |session| {
            let removed = session.items.len();
            session.items.clear();
            hub.broadcast(&code, &ServerEvent::ClipboardCleared);
            removed
        })?;
        debug!(code = %code, removed, "clipboard cleared");
        Ok(())
    }

    /// Upload entry point. Creates the session if needed.
    pub fn add_file(&self, raw_code: &str, upload: FileUpload) -> Result<ClipboardItem, SessionError> {
        let code = SessionCode::parse(raw_code)?;
        let size = upload.payload.len() as u64;
        if size > self.max_upload_bytes {
            return Err(SessionError::PayloadTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let item = ClipboardItem::file(FileAttachment::new(upload.name, upload.mime_type, upload.payload));
        let hub = self.registry.hub();
        self.registry.store().get_or_create_with(&code, |session| {
            session.items.push(item.clone());
            hub.broadcast(&code, &ServerEvent::ItemAdded { item: item.clone() });
        })?;
        info!(code = %code, item_id = %item.id, kind = item.kind().as_str(), size, "file uploaded");
        Ok(item)
    }

    /// Look up a file or image item. Does not count as activity.
    pub fn read_item(&self, raw_code: &str, item_id: &ItemId) -> Result<ClipboardItem, SessionError> {
        let code = SessionCode::parse(raw_code)?;
        let item = self.registry.store().find_item(&code, item_id)?;
        if item.attachment().is_none() {
            return Err(SessionError::ItemNotFound(item_id.clone()));
        }
        Ok(item)
    }

    /// HTTP join: get or create the session and return its items. Counts as
    /// activity but attaches no connection.
    pub fn touch(&self, raw_code: &str) -> Result<(SessionCode, Vec<ClipboardItem>), SessionError> {
        let code = SessionCode::parse(raw_code)?;
        let items = self
            .registry
            .store()
            .get_or_create_with(&code, |session| session.items.clone())?;
        Ok((code, items))
    }

    /// A random code, preferring one with no live session.
    pub fn fresh_code(&self) -> SessionCode {
        let store = self.registry.store();
        let mut code = SessionCode::generate();
        for _ in 1..FRESH_CODE_ATTEMPTS {
            if !store.contains(&code) {
                break;
            }
            code = SessionCode::generate();
        }
        code
    }

    fn joined_code(&self, id: &ConnectionId) -> Result<SessionCode, SessionError> {
        self.registry.hub().code_of(id).ok_or(SessionError::NotJoined)
    }

    fn append_and_broadcast(&self, code: &SessionCode, item: ClipboardItem) -> Result<(), SessionError> {
        let hub = self.registry.hub();
        self.registry.store().mutate(code, |session| {
            session.items.push(item.clone());
            hub.broadcast(code, &ServerEvent::ItemAdded { item });
        })
    }
}
