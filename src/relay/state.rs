//! Pure per-connection state machine for the relay client (spec.md §4.4
//! "state per id"), kept free of any `web_sys`/`WebSocket` dependency so it
//! can be exercised with plain native tests.
//!
//! Four states per connection id: pending-open (reserved, no record yet),
//! open (record exists, data may flow), closed, errored. Inbound data
//! either reaches a registered handler immediately or is appended to an
//! in-memory rope; registering a handler later flushes the rope to it in
//! arrival order (spec.md §4.4 "inbound data").

use std::collections::HashMap;

use crate::task::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// No relay channel is configured (spec.md §4.3 "failure modes").
    NotConfigured,
    /// The `open` request was rejected by the peer or timed out.
    Open(String),
    /// The connection id is unknown to the table (already closed, or never
    /// opened).
    UnknownConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnState {
    PendingOpen,
    Open,
    Closed,
    Errored(String),
}

/// One logical connection's buffered inbound data and registered handlers.
#[derive(Default)]
struct Record {
    state: ConnState,
    rope: Vec<u8>,
    has_handler: bool,
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState::PendingOpen
    }
}

/// The set of live connection ids plus their buffered data, independent of
/// how frames actually arrive (spec.md §3 "connection record").
#[derive(Default)]
pub struct ConnectionTable {
    records: HashMap<u32, Record>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id` as pending-open, before the peer has replied.
    pub fn reserve(&mut self, id: ConnectionId) {
        self.records.insert(id.0, Record { state: ConnState::PendingOpen, rope: Vec::new(), has_handler: false });
    }

    pub fn is_pending(&self, id: ConnectionId) -> bool {
        matches!(self.records.get(&id.0).map(|r| &r.state), Some(ConnState::PendingOpen))
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        matches!(self.records.get(&id.0).map(|r| &r.state), Some(ConnState::Open))
    }

    pub fn is_closed(&self, id: ConnectionId) -> bool {
        match self.records.get(&id.0) {
            None => true,
            Some(r) => matches!(r.state, ConnState::Closed | ConnState::Errored(_)),
        }
    }

    /// `opened` moves a pending id to open (spec.md §4.4 "state per id").
    /// No-op (but reported) if the id wasn't pending.
    pub fn mark_opened(&mut self, id: ConnectionId) -> Result<(), RelayError> {
        match self.records.get_mut(&id.0) {
            Some(r) if r.state == ConnState::PendingOpen => {
                r.state = ConnState::Open;
                Ok(())
            }
            _ => Err(RelayError::UnknownConnection),
        }
    }

    /// `error` against a pending id rejects the open and removes the
    /// reservation entirely; against an open id it marks the record errored
    /// without destroying it, since consumers must still observe the error
    /// (spec.md §4.4).
    pub fn mark_error(&mut self, id: ConnectionId, msg: String) -> Option<RejectedOpen> {
        match self.records.get(&id.0).map(|r| r.state.clone()) {
            Some(ConnState::PendingOpen) => {
                self.records.remove(&id.0);
                Some(RejectedOpen { msg })
            }
            Some(ConnState::Open) => {
                if let Some(r) = self.records.get_mut(&id.0) {
                    r.state = ConnState::Errored(msg);
                }
                None
            }
            _ => None,
        }
    }

    /// `closed` against an open id removes it from the table entirely
    /// (spec.md §8 "closed against an open id removes it").
    pub fn mark_closed(&mut self, id: ConnectionId) {
        self.records.remove(&id.0);
    }

    /// Append inbound bytes, either to the rope (no handler registered yet)
    /// or signal the caller to deliver them immediately.
    pub fn push_inbound(&mut self, id: ConnectionId, data: Vec<u8>) {
        if let Some(r) = self.records.get_mut(&id.0) {
            if !r.has_handler {
                r.rope.extend_from_slice(&data);
            }
        }
    }

    /// Read and clear this connection's buffered data (used by the
    /// synchronous `read` host call, not a registered push handler).
    pub fn take_buffered(&mut self, id: ConnectionId) -> Vec<u8> {
        self.records.get_mut(&id.0).map(|r| std::mem::take(&mut r.rope)).unwrap_or_default()
    }

    /// Mark that a data handler is now registered for `id`; returns the
    /// rope accumulated before registration, to be flushed once, in order
    /// (spec.md §4.4).
    pub fn register_handler(&mut self, id: ConnectionId) -> Vec<u8> {
        if let Some(r) = self.records.get_mut(&id.0) {
            r.has_handler = true;
            return std::mem::take(&mut r.rope);
        }
        Vec::new()
    }

    /// Drop the channel: reject every pending open and close every open
    /// connection, returning their ids so the caller can fire handlers once
    /// each (spec.md §8 scenario 5 "relay disconnect").
    pub fn drain_on_channel_loss(&mut self) -> (Vec<ConnectionId>, Vec<ConnectionId>) {
        let mut rejected = Vec::new();
        let mut closed = Vec::new();
        for (id, record) in self.records.drain() {
            match record.state {
                ConnState::PendingOpen => rejected.push(ConnectionId(id)),
                ConnState::Open | ConnState::Errored(_) => closed.push(ConnectionId(id)),
                ConnState::Closed => {}
            }
        }
        (rejected, closed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct RejectedOpen {
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_moves_pending_to_open() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(1));
        assert!(table.is_pending(ConnectionId(1)));
        table.mark_opened(ConnectionId(1)).unwrap();
        assert!(table.is_open(ConnectionId(1)));
    }

    #[test]
    fn error_against_pending_id_removes_reservation() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(2));
        let rejected = table.mark_error(ConnectionId(2), "refused".into());
        assert!(rejected.is_some());
        assert!(table.is_closed(ConnectionId(2)));
    }

    #[test]
    fn error_against_open_id_keeps_record_but_marks_errored() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(3));
        table.mark_opened(ConnectionId(3)).unwrap();
        let rejected = table.mark_error(ConnectionId(3), "reset".into());
        assert!(rejected.is_none());
        assert!(!table.is_open(ConnectionId(3)));
    }

    #[test]
    fn closed_against_open_id_removes_it() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(4));
        table.mark_opened(ConnectionId(4)).unwrap();
        table.mark_closed(ConnectionId(4));
        assert!(table.is_closed(ConnectionId(4)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn inbound_data_buffers_until_handler_registered_then_flushes_in_order() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(5));
        table.mark_opened(ConnectionId(5)).unwrap();
        table.push_inbound(ConnectionId(5), b"ab".to_vec());
        table.push_inbound(ConnectionId(5), b"cd".to_vec());
        let flushed = table.register_handler(ConnectionId(5));
        assert_eq!(flushed, b"abcd");
    }

    #[test]
    fn channel_loss_rejects_pending_and_closes_open_exactly_once_each() {
        let mut table = ConnectionTable::new();
        table.reserve(ConnectionId(7));
        table.reserve(ConnectionId(8));
        table.mark_opened(ConnectionId(8)).unwrap();

        let (rejected, closed) = table.drain_on_channel_loss();
        assert_eq!(rejected, vec![ConnectionId(7)]);
        assert_eq!(closed, vec![ConnectionId(8)]);
        assert!(table.is_empty());
    }
}
