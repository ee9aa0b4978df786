//! The synchronous host-call messenger (spec.md §4.3, §5).
//!
//! Three of these exist per controller, one per call family (console,
//! network, persistence). A runner wanting to make a blocking host call:
//!
//! 1. Writes `-1` (pending) into the `status` slot.
//! 2. Posts a request to the controller naming this messenger and the call.
//! 3. Calls [`Messenger::wait_for_result`], which blocks on `status` until it
//!    is no longer `-1`.
//! 4. Reads the `payload` slot and maps `status` to a [`StatusCode`].
//!
//! The controller writes `payload` before `status` (see
//! [`Messenger::complete`]) so that by the time a waiter observes a
//! non-pending `status`, `payload` is already settled — the ordering
//! guarantee spec.md §5 calls out explicitly.

use std::fmt;

pub const STATUS_PENDING: i32 = -1;
const SLOT_STATUS: u32 = 0;
const SLOT_PAYLOAD: u32 = 1;

/// Uniform result codes across every call family (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Error,
    /// Persistence only: path not found.
    NotFound,
    /// Network only: remote end closed the connection.
    RemoteClosed,
}

impl StatusCode {
    pub fn to_i32(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Error => 1,
            StatusCode::NotFound => 2,
            StatusCode::RemoteClosed => 3,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(StatusCode::Success),
            1 => Some(StatusCode::Error),
            2 => Some(StatusCode::NotFound),
            3 => Some(StatusCode::RemoteClosed),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "success"),
            StatusCode::Error => write!(f, "error"),
            StatusCode::NotFound => write!(f, "not found"),
            StatusCode::RemoteClosed => write!(f, "remote closed"),
        }
    }
}

/// Abstracts the two 32-bit slots a [`Messenger`] is built on, so the
/// blocking protocol can be exercised on the host without a real
/// `SharedArrayBuffer`.
pub trait AtomicSlots {
    fn load(&self, slot: u32) -> i32;
    fn store(&self, slot: u32, value: i32);
    /// Block until the slot no longer reads `expect`.
    fn wait(&self, slot: u32, expect: i32);
    fn notify(&self, slot: u32);
}

/// Lets the controller hold a runner table keyed by a trait object rather
/// than a concrete slots type, since each runner record's backing is the
/// same shape (`WasmSlots` in production, `NativeSlots`/`NativeLockSlots`
/// in tests) but the controller shouldn't need to be generic over it.
pub type DynSlots = Box<dyn AtomicSlots>;

impl AtomicSlots for DynSlots {
    fn load(&self, slot: u32) -> i32 {
        (**self).load(slot)
    }

    fn store(&self, slot: u32, value: i32) {
        (**self).store(slot, value)
    }

    fn wait(&self, slot: u32, expect: i32) {
        (**self).wait(slot, expect)
    }

    fn notify(&self, slot: u32) {
        (**self).notify(slot)
    }
}

/// One call family's blocking channel.
pub struct Messenger<S: AtomicSlots> {
    slots: S,
}

impl<S: AtomicSlots> Messenger<S> {
    pub fn new(slots: S) -> Self {
        Self { slots }
    }

    /// Runner side: arm the messenger before posting a request.
    pub fn begin(&self) {
        self.slots.store(SLOT_STATUS, STATUS_PENDING);
    }

    /// Runner side: block until the controller completes the call, then
    /// return the status and payload.
    pub fn wait_for_result(&self) -> (StatusCode, i32) {
        self.slots.wait(SLOT_STATUS, STATUS_PENDING);
        let status = self.slots.load(SLOT_STATUS);
        let payload = self.slots.load(SLOT_PAYLOAD);
        (StatusCode::from_i32(status).unwrap_or(StatusCode::Error), payload)
    }

    /// Controller side: publish a result and wake the waiting runner.
    /// `payload` is written before `status`, matching the ordering
    /// invariant in spec.md §3/§5.
    pub fn complete(&self, status: StatusCode, payload: i32) {
        self.slots.store(SLOT_PAYLOAD, payload);
        self.slots.store(SLOT_STATUS, status.to_i32());
        self.slots.notify(SLOT_STATUS);
    }
}

/// Native slots for host-side tests: a plain pair of cells, with `wait`
/// implemented as a no-op check since tests drive both sides from one
/// thread (the controller always completes before the runner waits).
pub struct NativeSlots {
    status: std::cell::Cell<i32>,
    payload: std::cell::Cell<i32>,
}

impl NativeSlots {
    pub fn new() -> Self {
        Self { status: std::cell::Cell::new(STATUS_PENDING), payload: std::cell::Cell::new(0) }
    }
}

impl Default for NativeSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicSlots for NativeSlots {
    fn load(&self, slot: u32) -> i32 {
        match slot {
            SLOT_STATUS => self.status.get(),
            SLOT_PAYLOAD => self.payload.get(),
            _ => 0,
        }
    }

    fn store(&self, slot: u32, value: i32) {
        match slot {
            SLOT_STATUS => self.status.set(value),
            SLOT_PAYLOAD => self.payload.set(value),
            _ => {}
        }
    }

    fn wait(&self, slot: u32, expect: i32) {
        debug_assert_ne!(self.load(slot), expect, "NativeSlots::wait called before completion was staged");
    }

    fn notify(&self, _slot: u32) {}
}

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::AtomicSlots;
    use js_sys::{Atomics, Int32Array};

    /// Wasm slots: a real `Int32Array` over a `SharedArrayBuffer`-backed
    /// `WebAssembly.Memory`, blocking via `Atomics.wait`/`Atomics.notify`.
    /// Only valid when called from a Worker — the main thread may not call
    /// `Atomics.wait`.
    pub struct WasmSlots {
        array: Int32Array,
        base: u32,
    }

    impl WasmSlots {
        pub fn new(array: Int32Array, base_index: u32) -> Self {
            Self { array, base: base_index }
        }
    }

    impl AtomicSlots for WasmSlots {
        fn load(&self, slot: u32) -> i32 {
            Atomics::load(&self.array, self.base + slot).unwrap_or(0)
        }

        fn store(&self, slot: u32, value: i32) {
            let _ = Atomics::store(&self.array, self.base + slot, value);
        }

        fn wait(&self, slot: u32, expect: i32) {
            let _ = Atomics::wait(&self.array, self.base + slot, expect);
        }

        fn notify(&self, slot: u32) {
            let _ = Atomics::notify(&self.array, self.base + slot);
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::WasmSlots;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_complete_round_trips_payload() {
        let m = Messenger::new(NativeSlots::new());
        m.begin();
        assert_eq!(m.slots.load(SLOT_STATUS), STATUS_PENDING);
        m.complete(StatusCode::Success, 42);
        let (status, payload) = m.wait_for_result();
        assert_eq!(status, StatusCode::Success);
        assert_eq!(payload, 42);
    }

    #[test]
    fn unknown_status_code_maps_to_error() {
        assert_eq!(StatusCode::from_i32(99), None);
    }

    #[test]
    fn not_found_round_trips_for_persistence_miss() {
        let m = Messenger::new(NativeSlots::new());
        m.begin();
        m.complete(StatusCode::NotFound, 0);
        let (status, _) = m.wait_for_result();
        assert_eq!(status, StatusCode::NotFound);
    }
}
