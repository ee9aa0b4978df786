//! The network relay client (spec.md §4.4): multiplexes many logical TCP
//! connections over one `WebSocket` to a remote proxy that actually speaks
//! TCP. Grounded on `kernel::network::WebSocketManager`'s id-keyed
//! connection table and `Closure`-wrapped `onmessage`/`onerror`/`onclose`
//! wiring, generalized from best-effort single sends into the full framed
//! multiplexing protocol spec.md §4.4 describes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::relay::protocol::Frame;
use crate::relay::state::{ConnectionTable, RelayError};
use crate::task::ConnectionId;

/// Per-client configuration (spec.md §4.4 "channel establishment").
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    /// Injected as a query parameter on the channel URL, if set.
    pub token: Option<String>,
    pub pending_open_timeout_ms: f64,
}

enum ConnectState {
    Disconnected,
    /// A connect attempt is in flight; any further callers of `ensure_open`
    /// share this one result instead of opening a second socket (spec.md
    /// §4.4 "reconnection is single-flight").
    Connecting(Vec<Box<dyn FnOnce(Result<(), RelayError>)>>),
    Connected,
}

type DataHandler = Box<dyn FnMut(Vec<u8>)>;
type CloseHandler = Box<dyn FnOnce()>;
type ErrorHandler = Box<dyn FnMut(String)>;
type OpenWaiter = Box<dyn FnOnce(Result<ConnectionId, RelayError>)>;

struct Inner {
    config: RelayConfig,
    table: ConnectionTable,
    connect_state: ConnectState,
    next_id: u32,
    open_waiters: HashMap<u32, OpenWaiter>,
    data_handlers: HashMap<u32, DataHandler>,
    close_handlers: HashMap<u32, CloseHandler>,
    error_handlers: HashMap<u32, ErrorHandler>,
    /// The live socket, once connected. Only ever populated on `wasm32` —
    /// nothing off-wasm opens a real channel — but the field lives here
    /// unconditionally so `Inner` doesn't need two shapes.
    #[cfg(target_arch = "wasm32")]
    socket: Option<web_sys::WebSocket>,
}

impl Inner {
    fn alloc_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        ConnectionId(id)
    }

    fn fail_all_pending_waiters(&mut self, rejected: Vec<ConnectionId>, reason: &str) {
        for id in rejected {
            if let Some(waiter) = self.open_waiters.remove(&id.0) {
                waiter(Err(RelayError::Open(reason.to_string())));
            }
        }
    }

    fn fire_close_handlers(&mut self, closed: Vec<ConnectionId>) {
        for id in closed {
            if let Some(handler) = self.close_handlers.remove(&id.0) {
                handler();
            }
            self.data_handlers.remove(&id.0);
            self.error_handlers.remove(&id.0);
        }
    }

    /// Dispatch one parsed inbound frame (spec.md §4.4 "message types").
    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Opened { id } => {
                let id = ConnectionId(id);
                if self.table.mark_opened(id).is_ok() {
                    if let Some(waiter) = self.open_waiters.remove(&id.0) {
                        waiter(Ok(id));
                    }
                }
            }
            Frame::Error { id, msg } => {
                let id = ConnectionId(id);
                if let Some(rejected) = self.table.mark_error(id, msg.clone()) {
                    if let Some(waiter) = self.open_waiters.remove(&id.0) {
                        waiter(Err(RelayError::Open(rejected.msg)));
                    }
                } else if let Some(handler) = self.error_handlers.get_mut(&id.0) {
                    handler(msg);
                }
            }
            Frame::Data { id, .. } => {
                let id = ConnectionId(id);
                let Some(payload) = frame_payload(&frame) else { return };
                if let Some(handler) = self.data_handlers.get_mut(&id.0) {
                    handler(payload);
                } else {
                    self.table.push_inbound(id, payload);
                }
            }
            Frame::Closed { id } => {
                let id = ConnectionId(id);
                self.table.mark_closed(id);
                self.fire_close_handlers(vec![id]);
            }
            // Client->server frames arriving inbound are a protocol error;
            // logged and dropped, channel stays alive (spec.md §7).
            Frame::Open { .. } | Frame::Write { .. } => {
                crate::console_error!("[relay] unexpected inbound frame from peer");
            }
        }
    }

    fn handle_channel_loss(&mut self) {
        self.connect_state = ConnectState::Disconnected;
        let (rejected, closed) = self.table.drain_on_channel_loss();
        self.fail_all_pending_waiters(rejected, "channel closed");
        self.fire_close_handlers(closed);
    }
}

fn frame_payload(frame: &Frame) -> Option<Vec<u8>> {
    frame.payload()
}

fn channel_url(config: &RelayConfig) -> String {
    match &config.token {
        Some(token) => format!("{}?token={}", config.url, urlencode(token)),
        None => config.url.clone(),
    }
}

fn urlencode(s: &str) -> String {
    // The token is an opaque bearer value; percent-encode anything outside
    // the unreserved set rather than pull in a general query-string codec.
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Handle to the singleton relay client the controller owns (spec.md §4.4,
/// §9 "shared global state" — explicitly constructed, not a module-level
/// static).
#[derive(Clone)]
pub struct RelayClient {
    inner: Rc<RefCell<Inner>>,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                config,
                table: ConnectionTable::new(),
                connect_state: ConnectState::Disconnected,
                next_id: 1,
                open_waiters: HashMap::new(),
                data_handlers: HashMap::new(),
                close_handlers: HashMap::new(),
                error_handlers: HashMap::new(),
                #[cfg(target_arch = "wasm32")]
                socket: None,
            })),
        }
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.inner.borrow().table.is_open(id)
    }

    pub fn is_closed(&self, id: ConnectionId) -> bool {
        self.inner.borrow().table.is_closed(id)
    }

    /// Read and clear buffered inbound data for `id` (the synchronous
    /// `read` host call's path, as distinct from a registered push
    /// handler).
    pub fn take_buffered(&self, id: ConnectionId) -> Vec<u8> {
        self.inner.borrow_mut().table.take_buffered(id)
    }

    pub fn on_data(&self, id: ConnectionId, handler: impl FnMut(Vec<u8>) + 'static) {
        let mut inner = self.inner.borrow_mut();
        let flushed = inner.table.register_handler(id);
        inner.data_handlers.insert(id.0, Box::new(handler));
        if !flushed.is_empty() {
            if let Some(h) = inner.data_handlers.get_mut(&id.0) {
                h(flushed);
            }
        }
    }

    pub fn on_close(&self, id: ConnectionId, handler: impl FnOnce() + 'static) {
        self.inner.borrow_mut().close_handlers.insert(id.0, Box::new(handler));
    }

    pub fn on_error(&self, id: ConnectionId, handler: impl FnMut(String) + 'static) {
        self.inner.borrow_mut().error_handlers.insert(id.0, Box::new(handler));
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::WebSocket;

    impl RelayClient {
        /// Ensure the single channel is open, sharing an in-flight connect
        /// attempt with any concurrent caller (spec.md §4.4).
        fn ensure_open(&self, on_ready: impl FnOnce(Result<(), RelayError>) + 'static) {
            let already_open = {
                let mut inner = self.inner.borrow_mut();
                match &mut inner.connect_state {
                    ConnectState::Connected => true,
                    ConnectState::Connecting(waiters) => {
                        waiters.push(Box::new(on_ready));
                        return;
                    }
                    ConnectState::Disconnected => {
                        inner.connect_state = ConnectState::Connecting(vec![Box::new(on_ready)]);
                        false
                    }
                }
            };
            if already_open {
                on_ready(Ok(()));
                return;
            }
            self.open_socket();
        }

        fn open_socket(&self) {
            let url = channel_url(&self.inner.borrow().config);
            let socket = match WebSocket::new(&url) {
                Ok(s) => s,
                Err(_) => {
                    let mut inner = self.inner.borrow_mut();
                    let waiters = match std::mem::replace(&mut inner.connect_state, ConnectState::Disconnected) {
                        ConnectState::Connecting(w) => w,
                        _ => Vec::new(),
                    };
                    drop(inner);
                    for waiter in waiters {
                        waiter(Err(RelayError::Open("failed to create socket".into())));
                    }
                    return;
                }
            };

            let onopen_inner = self.inner.clone();
            let onopen = Closure::wrap(Box::new(move || {
                let mut inner = onopen_inner.borrow_mut();
                let waiters = match std::mem::replace(&mut inner.connect_state, ConnectState::Connected) {
                    ConnectState::Connecting(w) => w,
                    other => {
                        inner.connect_state = other;
                        Vec::new()
                    }
                };
                drop(inner);
                for waiter in waiters {
                    waiter(Ok(()));
                }
            }) as Box<dyn FnMut()>);
            socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));
            onopen.forget();

            let onmessage_inner = self.inner.clone();
            let onmessage = Closure::wrap(Box::new(move |e: web_sys::MessageEvent| {
                let Some(text) = e.data().as_string() else { return };
                match Frame::from_json(&text) {
                    Ok(frame) => onmessage_inner.borrow_mut().handle_frame(frame),
                    Err(_) => crate::console_error!("[relay] dropped unparseable frame"),
                }
            }) as Box<dyn FnMut(web_sys::MessageEvent)>);
            socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
            onmessage.forget();

            let onclose_inner = self.inner.clone();
            let onclose = Closure::wrap(Box::new(move |_e: web_sys::CloseEvent| {
                onclose_inner.borrow_mut().handle_channel_loss();
            }) as Box<dyn FnMut(web_sys::CloseEvent)>);
            socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));
            onclose.forget();

            let onerror_inner = self.inner.clone();
            let onerror = Closure::wrap(Box::new(move |_e: web_sys::ErrorEvent| {
                onerror_inner.borrow_mut().handle_channel_loss();
            }) as Box<dyn FnMut(web_sys::ErrorEvent)>);
            socket.set_onerror(Some(onerror.as_ref().unchecked_ref()));
            onerror.forget();

            self.inner.borrow_mut().socket = Some(socket);
        }

        /// Open a logical connection (spec.md §4.4 "open").
        pub fn open(&self, host: String, port: u16, on_result: impl FnOnce(Result<ConnectionId, RelayError>) + 'static) {
            let this = self.clone_handle();
            self.ensure_open(move |ready| match ready {
                Err(e) => on_result(Err(e)),
                Ok(()) => this.send_open(host, port, on_result),
            });
        }

        fn send_open(&self, host: String, port: u16, on_result: impl FnOnce(Result<ConnectionId, RelayError>) + 'static) {
            let id = {
                let mut inner = self.inner.borrow_mut();
                let id = inner.alloc_id();
                inner.table.reserve(id);
                inner.open_waiters.insert(id.0, Box::new(on_result));
                id
            };

            let frame = Frame::open(id, host, port);
            if self.send_frame(&frame).is_err() {
                let mut inner = self.inner.borrow_mut();
                inner.table.mark_closed(id);
                if let Some(waiter) = inner.open_waiters.remove(&id.0) {
                    drop(inner);
                    waiter(Err(RelayError::Open("failed to send open frame".into())));
                }
                return;
            }

            self.schedule_open_timeout(id);
        }

        fn schedule_open_timeout(&self, id: ConnectionId) {
            let timeout_ms = self.inner.borrow().config.pending_open_timeout_ms;
            let inner = self.inner.clone();
            let closure = Closure::once(Box::new(move || {
                let mut inner = inner.borrow_mut();
                if inner.table.is_pending(id) {
                    inner.table.mark_closed(id);
                    if let Some(waiter) = inner.open_waiters.remove(&id.0) {
                        drop(inner);
                        waiter(Err(RelayError::Open("open timed out".into())));
                    }
                }
            }) as Box<dyn FnOnce()>);
            if let Some(window) = web_sys::window() {
                let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                    closure.as_ref().unchecked_ref(),
                    timeout_ms as i32,
                );
            }
            closure.forget();
        }

        fn send_frame(&self, frame: &Frame) -> Result<(), RelayError> {
            let Ok(json) = frame.to_json() else { return Err(RelayError::NotConfigured) };
            let inner = self.inner.borrow();
            match &inner.socket {
                Some(socket) => socket.send_with_str(&json).map_err(|_| RelayError::NotConfigured),
                None => Err(RelayError::NotConfigured),
            }
        }

        pub fn write(&self, id: ConnectionId, data: &[u8]) -> Result<(), RelayError> {
            if !self.inner.borrow().table.is_open(id) {
                return Err(RelayError::UnknownConnection);
            }
            self.send_frame(&Frame::write(id, data))
        }

        /// Request close; removes the connection from the local table
        /// immediately rather than waiting for the peer's `closed` echo
        /// (spec.md §8 "open ... then close(id) leaves the connection
        /// table without id").
        pub fn close(&self, id: ConnectionId) {
            let _ = self.send_frame(&Frame::close(id));
            let mut inner = self.inner.borrow_mut();
            inner.table.mark_closed(id);
            inner.data_handlers.remove(&id.0);
            inner.close_handlers.remove(&id.0);
            inner.error_handlers.remove(&id.0);
        }

        fn clone_handle(&self) -> Self {
            Self { inner: self.inner.clone() }
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub(crate) use wasm_impl::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayConfig {
        RelayConfig { url: "wss://relay.example/ws".into(), token: None, pending_open_timeout_ms: 5_000.0 }
    }

    #[test]
    fn fresh_client_has_no_open_connections() {
        let client = RelayClient::new(config());
        assert!(client.is_closed(ConnectionId(1)));
    }

    #[test]
    fn channel_url_appends_token_when_configured() {
        let cfg = RelayConfig { url: "wss://relay.example/ws".into(), token: Some("abc def".into()), pending_open_timeout_ms: 1.0 };
        let url = channel_url(&cfg);
        assert_eq!(url, "wss://relay.example/ws?token=abc%20def");
    }

    #[test]
    fn no_token_leaves_url_unmodified() {
        let url = channel_url(&config());
        assert_eq!(url, "wss://relay.example/ws");
    }

    #[test]
    fn handle_frame_opened_without_reservation_is_ignored() {
        let client = RelayClient::new(config());
        client.inner.borrow_mut().handle_frame(Frame::Opened { id: 42 });
        assert!(client.is_closed(ConnectionId(42)));
    }

    #[test]
    fn data_before_handler_registration_is_buffered_then_flushed() {
        let client = RelayClient::new(config());
        {
            let mut inner = client.inner.borrow_mut();
            inner.table.reserve(ConnectionId(1));
            inner.table.mark_opened(ConnectionId(1)).unwrap();
        }
        client.inner.borrow_mut().handle_frame(Frame::Data { id: 1, b64: base64_of(b"hi") });

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        client.on_data(ConnectionId(1), move |bytes| received_clone.borrow_mut().extend(bytes));
        assert_eq!(*received.borrow(), b"hi");
    }

    #[test]
    fn channel_loss_rejects_pending_opens_and_closes_open_connections() {
        let client = RelayClient::new(config());
        {
            let mut inner = client.inner.borrow_mut();
            inner.table.reserve(ConnectionId(7));
            inner.table.reserve(ConnectionId(8));
            inner.table.mark_opened(ConnectionId(8)).unwrap();
        }
        let open_result = Rc::new(RefCell::new(None));
        let open_result_clone = open_result.clone();
        client.inner.borrow_mut().open_waiters.insert(
            7,
            Box::new(move |result| *open_result_clone.borrow_mut() = Some(result)),
        );
        let closed_fired = Rc::new(RefCell::new(false));
        let closed_fired_clone = closed_fired.clone();
        client.on_close(ConnectionId(8), move || *closed_fired_clone.borrow_mut() = true);

        client.inner.borrow_mut().handle_channel_loss();

        assert!(open_result.borrow().as_ref().unwrap().is_err());
        assert!(*closed_fired.borrow());
        assert!(client.is_closed(ConnectionId(7)));
        assert!(client.is_closed(ConnectionId(8)));
    }

    fn base64_of(data: &[u8]) -> String {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;
        BASE64.encode(data)
    }
}
