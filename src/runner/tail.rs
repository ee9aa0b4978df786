//! User-mode tail control (spec.md §4.1 "user-mode tail control", §9
//! "coroutine-like control flow around exec and signals").
//!
//! The kernel's return-from-syscall path hands back a small tail code
//! instead of returning control straight to guest user code. Rather than
//! the source's unwind-with-a-sentinel-exception trick, this is modeled as
//! an explicit state machine: each tail code is a transition, and the
//! runner's top-level loop matches on the resulting state instead of
//! catching a thrown value.

use std::fmt;

/// Raw tail code returned by the kernel's user-mode hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailCode {
    Normal,
    SignalDeliver,
    SignalReturn,
    Exec,
}

impl TailCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TailCode::Normal),
            1 => Some(TailCode::SignalDeliver),
            2 => Some(TailCode::SignalReturn),
            3 => Some(TailCode::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for TailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailCode::Normal => write!(f, "normal"),
            TailCode::SignalDeliver => write!(f, "signal-deliver"),
            TailCode::SignalReturn => write!(f, "signal-return"),
            TailCode::Exec => write!(f, "exec"),
        }
    }
}

/// Where the user-mode loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Running,
    AboutToSignal,
    AboutToSigreturn,
    AboutToExec,
}

/// Drives [`TailState`] transitions from a stream of [`TailCode`]s. Owned by
/// the runner hosting one task; reset implicitly whenever a new task starts
/// running on this runner.
pub struct UserModeTail {
    state: TailState,
}

impl UserModeTail {
    pub fn new() -> Self {
        Self { state: TailState::Running }
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    /// Apply one tail code, returning the new state. The runner's top level
    /// acts on the *previous* state transition out of `Running` before
    /// calling this again — e.g. `AboutToSignal` means "swap SP/TLS and
    /// invoke the signal handler export now", `AboutToExec` means
    /// "instantiate the pre-loaded user module and run its entry now".
    pub fn apply(&mut self, code: TailCode) -> TailState {
        self.state = match (self.state, code) {
            (_, TailCode::Normal) => TailState::Running,
            (_, TailCode::SignalDeliver) => TailState::AboutToSignal,
            (TailState::AboutToSignal, TailCode::SignalReturn) => TailState::AboutToSigreturn,
            // A sigreturn tail code observed outside signal delivery is
            // still honored — the kernel is authoritative about when a
            // handler has finished — but is otherwise the same transition.
            (_, TailCode::SignalReturn) => TailState::AboutToSigreturn,
            (_, TailCode::Exec) => TailState::AboutToExec,
        };
        self.state
    }

    /// After the runner has acted on `AboutToSigreturn` (stack pointer and
    /// TLS base reloaded) or `AboutToExec` (new module instantiated), it
    /// calls this to return to normal running before resuming the loop.
    pub fn resume_running(&mut self) {
        self.state = TailState::Running;
    }
}

impl Default for UserModeTail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_tail_code_stays_running() {
        let mut tail = UserModeTail::new();
        assert_eq!(tail.apply(TailCode::Normal), TailState::Running);
    }

    #[test]
    fn signal_then_sigreturn_transitions_in_order() {
        let mut tail = UserModeTail::new();
        assert_eq!(tail.apply(TailCode::SignalDeliver), TailState::AboutToSignal);
        assert_eq!(tail.apply(TailCode::SignalReturn), TailState::AboutToSigreturn);
        tail.resume_running();
        assert_eq!(tail.state(), TailState::Running);
    }

    #[test]
    fn exec_is_reachable_from_any_state() {
        let mut tail = UserModeTail::new();
        tail.apply(TailCode::SignalDeliver);
        assert_eq!(tail.apply(TailCode::Exec), TailState::AboutToExec);
    }

    #[test]
    fn unknown_raw_code_is_rejected() {
        assert_eq!(TailCode::from_i32(99), None);
    }
}
