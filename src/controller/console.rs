//! Console I/O backing (spec.md §4.3 "console: blocking read into a
//! kernel-memory buffer; unbuffered write from a kernel-memory buffer").
//!
//! Writes complete immediately (the embedding page's console writer is
//! synchronous). Reads are the one host call whose completion genuinely
//! depends on something arriving later — browser key-input events injected
//! through the controller's page-facing API (spec.md §6 "key-input
//! injection") — so a read that finds nothing buffered yet is queued and
//! completed the next time input arrives, in FIFO order.

use std::collections::VecDeque;

use crate::bridge::StatusCode;
use crate::task::RunnerId;

/// A console read waiting on input that hasn't arrived yet.
struct PendingRead {
    runner: RunnerId,
    buf_offset: u32,
    len: u32,
}

/// Owned by the controller. Holds buffered input bytes (pushed by the
/// embedding page) and any reads that are blocked waiting for more.
#[derive(Default)]
pub struct ConsoleBridge {
    input: VecDeque<u8>,
    pending_reads: VecDeque<PendingRead>,
}

/// What the controller should do once a read either completes immediately
/// or gets queued.
pub enum ReadOutcome {
    /// Enough input was already buffered; copy `bytes` to `buf_offset` in
    /// kernel memory and complete the runner's messenger with this count.
    Ready { bytes: Vec<u8> },
    /// Nothing buffered yet; the read was queued and will complete later
    /// via [`ConsoleBridge::push_input`].
    Queued,
}

impl ConsoleBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page-facing key-input injection (spec.md §6 "key-input injection").
    /// Feeds one or more bytes and immediately tries to satisfy the oldest
    /// pending read.
    pub fn push_input(&mut self, bytes: &[u8]) -> Vec<(RunnerId, u32, Vec<u8>)> {
        self.input.extend(bytes.iter().copied());
        let mut completions = Vec::new();
        while let Some(front) = self.pending_reads.front() {
            if (self.input.len() as u32) < 1 {
                break;
            }
            let PendingRead { runner, buf_offset, len } = self.pending_reads.pop_front().unwrap();
            let take = (len as usize).min(self.input.len());
            let bytes: Vec<u8> = self.input.drain(..take).collect();
            completions.push((runner, buf_offset, bytes));
            let _ = front;
        }
        completions
    }

    /// A runner's blocking `read` request. Returns bytes immediately if any
    /// input is already buffered (even short of `len`, matching a
    /// non-blocking-read-with-whatever's-available convention), otherwise
    /// queues it.
    pub fn read(&mut self, runner: RunnerId, buf_offset: u32, len: u32) -> ReadOutcome {
        if self.input.is_empty() {
            self.pending_reads.push_back(PendingRead { runner, buf_offset, len });
            return ReadOutcome::Queued;
        }
        let take = (len as usize).min(self.input.len());
        let bytes: Vec<u8> = self.input.drain(..take).collect();
        ReadOutcome::Ready { bytes }
    }
}

/// Maps a console write's outcome to the uniform status/payload pair
/// (spec.md §4.3 "status codes").
pub fn write_result(written: u32) -> (StatusCode, i32) {
    (StatusCode::Success, written as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_with_no_input_is_queued() {
        let mut console = ConsoleBridge::new();
        match console.read(RunnerId(0), 0x1000, 4) {
            ReadOutcome::Queued => {}
            ReadOutcome::Ready { .. } => panic!("expected queued"),
        }
    }

    #[test]
    fn read_with_buffered_input_completes_immediately() {
        let mut console = ConsoleBridge::new();
        console.push_input(b"hi");
        match console.read(RunnerId(0), 0x1000, 4) {
            ReadOutcome::Ready { bytes } => assert_eq!(bytes, b"hi"),
            ReadOutcome::Queued => panic!("expected ready"),
        }
    }

    #[test]
    fn queued_read_completes_once_input_arrives_in_order() {
        let mut console = ConsoleBridge::new();
        let outcome = console.read(RunnerId(1), 0x2000, 3);
        assert!(matches!(outcome, ReadOutcome::Queued));

        let completions = console.push_input(b"abcdef");
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, RunnerId(1));
        assert_eq!(completions[0].2, b"abc");
    }
}
