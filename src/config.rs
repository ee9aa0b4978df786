//! Runtime configuration
//!
//! Plain data, constructed once by the embedding page when it creates the
//! [`crate::controller::Controller`]. There is no env/CLI parsing layer here
//! because this runs in a browser tab, not a process with argv.

/// Default size of the per-task syscall scratch region (spec.md §9 leaves
/// this as an open question; 64 KiB is this runtime's concrete choice).
pub const DEFAULT_SCRATCH_REGION_SIZE: u32 = 64 * 1024;

/// Default timeout for a relay "open" request that never completes.
pub const DEFAULT_PENDING_OPEN_TIMEOUT_MS: f64 = 10_000.0;

/// Default URL every spawned Worker is pointed at (spec.md §6 "controller
/// API"). A real deployment always overrides this with its own built runner
/// script; the empty default only matters off `wasm32`, where no Worker is
/// ever actually spawned.
pub const DEFAULT_RUNNER_PROGRAM_URL: &str = "";

/// Runtime-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes reserved per task for syscall argument marshalling.
    pub scratch_region_size: u32,
    /// How long a relay `open` may stay pending before it is timed out.
    pub pending_open_timeout_ms: f64,
    /// Optional auth token injected into the relay channel URL.
    pub relay_token: Option<String>,
    /// URL of the runner entry script every spawned Worker loads (spec.md
    /// §4.1 "a Worker hosts exactly one runner body"). The embedding page
    /// builds this script around [`crate::runner::install_runner_entry_point`]
    /// and serves it alongside the kernel/user `.wasm` files.
    pub runner_program_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scratch_region_size: DEFAULT_SCRATCH_REGION_SIZE,
            pending_open_timeout_ms: DEFAULT_PENDING_OPEN_TIMEOUT_MS,
            relay_token: None,
            runner_program_url: DEFAULT_RUNNER_PROGRAM_URL.to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scratch_region_size(mut self, size: u32) -> Self {
        self.scratch_region_size = size;
        self
    }

    pub fn with_pending_open_timeout_ms(mut self, ms: f64) -> Self {
        self.pending_open_timeout_ms = ms;
        self
    }

    pub fn with_relay_token(mut self, token: impl Into<String>) -> Self {
        self.relay_token = Some(token.into());
        self
    }

    pub fn with_runner_program_url(mut self, url: impl Into<String>) -> Self {
        self.runner_program_url = url.into();
        self
    }
}
