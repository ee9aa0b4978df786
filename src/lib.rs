//! wasmlinux-runtime - host runtime for a Linux kernel compiled to WebAssembly
//!
//! This crate is itself compiled to WebAssembly and runs both on the page's
//! main thread (as the controller) and inside every spawned Web Worker (as a
//! runner). The two roles share one wasm-bindgen module/memory pair so that
//! workers can be handed the already-compiled module instead of recompiling
//! it, following the same trick every wasm-thread-pool crate in this space
//! uses.
//!
//! Four subsystems, leaves first:
//! - [`memory`] and [`bridge`]: shared-memory primitives and the syscall
//!   pointer translator.
//! - [`wasm_host`]: instantiates the guest kernel and user WebAssembly
//!   modules via the browser's own `WebAssembly` API.
//! - [`runner`]: the per-CPU/per-task body that runs inside a Worker.
//! - [`controller`]: the main-thread singleton that owns runner and
//!   connection tables and is the only thing allowed to spawn a Worker.
//! - [`relay`] and [`persistence`]: the two asynchronous browser facilities
//!   reachable through the bridge.

use wasm_bindgen::prelude::*;

pub mod bridge;
pub mod config;
pub mod controller;
pub mod memory;
pub mod persistence;
pub mod relay;
pub mod runner;
pub mod task;
pub mod wasm_host;

/// Initialize panic hook for better error messages in browser console
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);

    #[wasm_bindgen(js_namespace = console, js_name = error)]
    fn error(s: &str);
}

/// Log to browser console
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log an error-severity message to the browser console
#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => {
        $crate::error(&format!($($t)*))
    };
}

/// Called once, automatically, the first time this wasm module is loaded in
/// any context (main thread or worker). Both roles need the panic hook; only
/// the main-thread role goes on to construct a [`controller::Controller`].
#[wasm_bindgen(start)]
pub fn init() {
    init_panic_hook();
}
