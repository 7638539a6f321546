//! Connection membership and fan-out.
//!
//! The hub knows every live connection and which session code (if any) each
//! one is attached to. It holds no session data.

use std::collections::HashMap;
use std::sync::Arc;

use clipshare_core::{ConnectionId, ServerEvent, SessionCode};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::connection::{ClientConnection, Frame, TransportError};

#[derive(Default)]
struct Membership {
    by_code: HashMap<SessionCode, HashMap<ConnectionId, Arc<ClientConnection>>>,
    by_connection: HashMap<ConnectionId, SessionCode>,
}

impl Membership {
    fn remove(&mut self, id: &ConnectionId) -> Option<SessionCode> {
        let code = self.by_connection.remove(id)?;
        if let Some(members) = self.by_code.get_mut(&code) {
            members.remove(id);
            if members.is_empty() {
                self.by_code.remove(&code);
            }
        }
        Some(code)
    }

    fn members(&self, code: &SessionCode) -> Vec<Arc<ClientConnection>> {
        self.by_code
            .get(code)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Tracks live connections and fans events out to session members.
#[derive(Default)]
pub struct BroadcastHub {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    membership: RwLock<Membership>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<ClientConnection>) {
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Forget a connection. Returns the code it was attached to.
    pub fn unregister(&self, id: &ConnectionId) -> Option<SessionCode> {
        let code = self.detach(id);
        self.connections.remove(id);
        code
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|c| c.value().clone())
    }

    /// Attach a registered connection to `code`, leaving any previous code.
    /// Returns the previous code. Unknown connections are refused.
    pub fn attach(
        &self,
        id: &ConnectionId,
        code: &SessionCode,
    ) -> Result<Option<SessionCode>, TransportError> {
        let connection = self.connection(id).ok_or(TransportError::Closed)?;
        let mut membership = self.membership.write();
        let previous = membership.remove(id);
        membership
            .by_code
            .entry(code.clone())
            .or_default()
            .insert(id.clone(), connection);
        membership.by_connection.insert(id.clone(), code.clone());
        Ok(previous.filter(|prev| prev != code))
    }

    /// Remove a connection's membership. No-op when unattached.
    pub fn detach(&self, id: &ConnectionId) -> Option<SessionCode> {
        self.membership.write().remove(id)
    }

    pub fn code_of(&self, id: &ConnectionId) -> Option<SessionCode> {
        self.membership.read().by_connection.get(id).cloned()
    }

    pub fn members(&self, code: &SessionCode) -> Vec<ConnectionId> {
        self.membership
            .read()
            .by_code
            .get(code)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, code: &SessionCode) -> usize {
        self.membership
            .read()
            .by_code
            .get(code)
            .map_or(0, HashMap::len)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Codes that currently have at least one member.
    pub fn attached_session_count(&self) -> usize {
        self.membership.read().by_code.len()
    }

    /// Deliver `event` to every member of `code`. Returns how many accepted it.
    pub fn broadcast(&self, code: &SessionCode, event: &ServerEvent) -> usize {
        self.fan_out(code, event, None)
    }

    /// Like [`Self::broadcast`] but skips `except`.
    pub fn broadcast_except(
        &self,
        code: &SessionCode,
        event: &ServerEvent,
        except: &ConnectionId,
    ) -> usize {
        self.fan_out(code, event, Some(except))
    }

    fn fan_out(&self, code: &SessionCode, event: &ServerEvent, except: Option<&ConnectionId>) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => Frame::from(frame),
            Err(e) => {
                warn!(code = %code, event = event.event_type(), error = %e, "failed to encode event");
                return 0;
            }
        };

        let members = self.membership.read().members(code);
        let mut delivered = 0;
        for member in members {
            if except == Some(&member.id) {
                continue;
            }
            match member.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => self.drop_member(&member, &e),
            }
        }
        debug!(code = %code, event = event.event_type(), delivered, "broadcast");
        delivered
    }

    /// Send `event` to one connection only.
    pub fn send_to(&self, id: &ConnectionId, event: &ServerEvent) -> Result<(), TransportError> {
        let connection = self.connection(id).ok_or(TransportError::Closed)?;
        connection.send_event(event).inspect_err(|e| {
            if !matches!(e, TransportError::Encode(_)) {
                self.drop_member(&connection, e);
            }
        })
    }

    /// A member whose queue refused a frame is detached and closed.
    fn drop_member(&self, connection: &ClientConnection, error: &TransportError) {
        warn!(
            connection_id = %connection.id,
            error_kind = error.error_kind(),
            dropped = connection.drop_count(),
            "send failed, dropping connection"
        );
        self.detach(&connection.id);
        connection.close();
    }

    /// Send `session_ended` to every member of `code`, then detach them all.
    /// Sockets stay open. Returns how many members were detached.
    pub fn close_session(&self, code: &SessionCode, reason: &str) -> usize {
        self.broadcast(code, &ServerEvent::session_ended(reason));

        let mut membership = self.membership.write();
        let Some(members) = membership.by_code.remove(code) else {
            return 0;
        };
        for id in members.keys() {
            membership.by_connection.remove(id);
        }
        info!(code = %code, members = members.len(), reason, "session closed");
        members.len()
    }

    /// End every session and close every connection.
    pub fn close_all(&self, reason: &str) -> usize {
        let codes: Vec<SessionCode> = self.membership.read().by_code.keys().cloned().collect();
        for code in &codes {
            self.close_session(code, reason);
        }
        let mut closed = 0;
        for entry in self.connections.iter() {
            entry.value().close();
            closed += 1;
        }
        info!(sessions = codes.len(), connections = closed, "hub closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn code(raw: &str) -> SessionCode {
        SessionCode::parse(raw).unwrap()
    }

    fn connect(hub: &BroadcastHub, capacity: usize) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (conn, rx) = ClientConnection::channel(capacity);
        let id = conn.id.clone();
        hub.register(conn);
        (id, rx)
    }

    fn recv_types(rx: &mut mpsc::Receiver<Frame>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
            types.push(json["type"].as_str().unwrap().to_owned());
        }
        types
    }

    #[test]
    fn attach_and_detach() {
        let hub = BroadcastHub::new();
        let (a, _ra) = connect(&hub, 8);
        assert_eq!(hub.attach(&a, &code("1111")).unwrap(), None);
        assert_eq!(hub.code_of(&a), Some(code("1111")));
        assert_eq!(hub.member_count(&code("1111")), 1);

        assert_eq!(hub.detach(&a), Some(code("1111")));
        assert_eq!(hub.detach(&a), None);
        assert_eq!(hub.member_count(&code("1111")), 0);
        assert_eq!(hub.attached_session_count(), 0);
    }

    #[test]
    fn attach_switches_sessions() {
        let hub = BroadcastHub::new();
        let (a, _ra) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();
        assert_eq!(hub.attach(&a, &code("2222")).unwrap(), Some(code("1111")));
        assert_eq!(hub.member_count(&code("1111")), 0);
        assert_eq!(hub.members(&code("2222")), vec![a.clone()]);

        // Rejoining the same code is not a switch.
        assert_eq!(hub.attach(&a, &code("2222")).unwrap(), None);
        assert_eq!(hub.member_count(&code("2222")), 1);
    }

    #[test]
    fn attach_unknown_connection_is_refused() {
        let hub = BroadcastHub::new();
        let err = hub.attach(&ConnectionId::new(), &code("1111")).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(hub.attached_session_count(), 0);
    }

    #[test]
    fn broadcast_reaches_only_members() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (b, mut rb) = connect(&hub, 8);
        let (c, mut rc) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();
        hub.attach(&b, &code("1111")).unwrap();
        hub.attach(&c, &code("2222")).unwrap();

        assert_eq!(hub.broadcast(&code("1111"), &ServerEvent::ClipboardCleared), 2);
        assert_eq!(recv_types(&mut ra), vec!["clipboard_cleared"]);
        assert_eq!(recv_types(&mut rb), vec!["clipboard_cleared"]);
        assert!(recv_types(&mut rc).is_empty());
    }

    #[test]
    fn broadcast_except_skips_sender() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (b, mut rb) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();
        hub.attach(&b, &code("1111")).unwrap();

        assert_eq!(
            hub.broadcast_except(&code("1111"), &ServerEvent::user_joined(), &b),
            1
        );
        assert_eq!(recv_types(&mut ra), vec!["user_joined"]);
        assert!(recv_types(&mut rb).is_empty());
    }

    #[test]
    fn broadcast_preserves_order_per_member() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 16);
        hub.attach(&a, &code("1111")).unwrap();
        hub.broadcast(&code("1111"), &ServerEvent::user_joined());
        hub.broadcast(&code("1111"), &ServerEvent::ClipboardCleared);
        hub.broadcast(&code("1111"), &ServerEvent::session_ended("bye"));
        assert_eq!(
            recv_types(&mut ra),
            vec!["user_joined", "clipboard_cleared", "session_ended"]
        );
    }

    #[test]
    fn closed_member_is_detached_and_others_still_receive() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (b, rb) = connect(&hub, 8);
        let (c, mut rc) = connect(&hub, 8);
        for id in [&a, &b, &c] {
            hub.attach(id, &code("1111")).unwrap();
        }
        drop(rb);

        assert_eq!(hub.broadcast(&code("1111"), &ServerEvent::ClipboardCleared), 2);
        assert_eq!(recv_types(&mut ra).len(), 1);
        assert_eq!(recv_types(&mut rc).len(), 1);
        assert_eq!(hub.code_of(&b), None);
        assert!(hub.connection(&b).unwrap().is_closed());
        assert_eq!(hub.member_count(&code("1111")), 2);
    }

    #[test]
    fn slow_member_is_dropped() {
        let hub = BroadcastHub::new();
        let (slow, _rs) = connect(&hub, 1);
        let (fast, mut rf) = connect(&hub, 8);
        hub.attach(&slow, &code("1111")).unwrap();
        hub.attach(&fast, &code("1111")).unwrap();

        hub.broadcast(&code("1111"), &ServerEvent::ClipboardCleared);
        hub.broadcast(&code("1111"), &ServerEvent::ClipboardCleared);
        assert_eq!(recv_types(&mut rf).len(), 2);
        assert_eq!(hub.code_of(&slow), None);
        assert_eq!(hub.connection(&slow).unwrap().drop_count(), 1);
    }

    #[test]
    fn send_to_targets_one_connection() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (_b, mut rb) = connect(&hub, 8);
        hub.send_to(&a, &ServerEvent::error(&clipshare_core::SessionError::NotJoined))
            .unwrap();
        assert_eq!(recv_types(&mut ra), vec!["error"]);
        assert!(recv_types(&mut rb).is_empty());
        assert!(hub
            .send_to(&ConnectionId::new(), &ServerEvent::ClipboardCleared)
            .is_err());
    }

    #[test]
    fn close_session_notifies_then_detaches() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (b, mut rb) = connect(&hub, 8);
        let (c, mut rc) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();
        hub.attach(&b, &code("1111")).unwrap();
        hub.attach(&c, &code("2222")).unwrap();

        assert_eq!(hub.close_session(&code("1111"), "gone"), 2);
        assert_eq!(recv_types(&mut ra), vec!["session_ended"]);
        assert_eq!(recv_types(&mut rb), vec!["session_ended"]);
        assert!(recv_types(&mut rc).is_empty());
        assert_eq!(hub.code_of(&a), None);
        assert_eq!(hub.code_of(&c), Some(code("2222")));
        // Sockets stay registered and open.
        assert!(!hub.connection(&a).unwrap().is_closed());
        assert_eq!(hub.connection_count(), 3);

        assert_eq!(hub.close_session(&code("1111"), "again"), 0);
    }

    #[test]
    fn close_all_ends_everything() {
        let hub = BroadcastHub::new();
        let (a, mut ra) = connect(&hub, 8);
        let (b, _rb) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();

        assert_eq!(hub.close_all("shutting down"), 2);
        assert_eq!(recv_types(&mut ra), vec!["session_ended"]);
        assert_eq!(hub.attached_session_count(), 0);
        assert!(hub.connection(&a).unwrap().is_closed());
        assert!(hub.connection(&b).unwrap().is_closed());
    }

    #[test]
    fn unregister_detaches() {
        let hub = BroadcastHub::new();
        let (a, _ra) = connect(&hub, 8);
        hub.attach(&a, &code("1111")).unwrap();
        assert_eq!(hub.unregister(&a), Some(code("1111")));
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.member_count(&code("1111")), 0);
    }
}
