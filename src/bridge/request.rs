//! The request side of the host-call protocol: what a runner names when it
//! posts to the controller after arming a [`super::Messenger`] (spec.md
//! §4.3, §9 "dynamic dispatch over many message shapes" — a closed set of
//! cases discriminated by a tag, not a name-indexed table).

use serde::{Deserialize, Serialize};

use crate::task::ConnectionId;

/// Which messenger (and therefore which asynchronous backing service) a
/// request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFamily {
    Console,
    Network,
    Persistence,
}

/// Console I/O calls (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleCall {
    /// Blocking read into kernel memory at `buf_offset`, up to `len` bytes.
    Read { buf_offset: u32, len: u32 },
    /// Unbuffered write of `len` bytes from kernel memory at `buf_offset`.
    Write { buf_offset: u32, len: u32 },
}

/// Network relay calls (spec.md §4.3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkCall {
    Open { host: String, port: u16 },
    Write { id: ConnectionId, buf_offset: u32, len: u32 },
    Read { id: ConnectionId, buf_offset: u32, count: u32 },
    Poll { id: ConnectionId },
    Close { id: ConnectionId },
}

/// Persistence calls (spec.md §4.3, §6 "persistence backend contract").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceCall {
    Save { path: String, buf_offset: u32, len: u32, mode: u32 },
    Load { path: String, buf_offset: u32, count: u32 },
    Delete { path: String },
    /// `list` truncates its newline-joined output to `count` bytes written
    /// at `buf_offset` (spec.md §4.3).
    List { prefix: String, buf_offset: u32, count: u32 },
}

/// A fully-formed host-call request as posted to the controller's event
/// queue. The controller already knows which runner delivered it (it is the
/// `origin` parameter of [`super::super::controller::Controller::handle_message`]
/// itself, which is also what routes the eventual
/// [`super::Messenger::complete`] back) so this only ever needs to carry the
/// call itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCallRequest {
    pub call: HostCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostCall {
    Console(ConsoleCall),
    Network(NetworkCall),
    Persistence(PersistenceCall),
}

impl HostCall {
    pub fn family(&self) -> CallFamily {
        match self {
            HostCall::Console(_) => CallFamily::Console,
            HostCall::Network(_) => CallFamily::Network,
            HostCall::Persistence(_) => CallFamily::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_family_matches_variant() {
        let req = HostCall::Network(NetworkCall::Poll { id: ConnectionId(3) });
        assert_eq!(req.family(), CallFamily::Network);
    }
}
