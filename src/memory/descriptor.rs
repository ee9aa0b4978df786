//! Declarative description of a syscall's pointer-argument shapes
//! (spec.md §4.2).
//!
//! A [`SyscallDescriptor`] says, for each of a syscall's (up to six) integer
//! arguments, whether it is an ordinary value or a pointer that needs
//! copy-in/copy-out through the per-task scratch region, and how to find its
//! length. The generic translator in [`super::translate`] is the only code
//! that interprets these; individual syscalls never hand-roll their own
//! marshalling.

use std::collections::HashMap;

/// Where a pointer argument's length comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenSpec {
    /// The length is a compile-time constant (e.g. a fixed `struct stat`).
    Fixed(u32),
    /// The length is the value of another argument, given by its index.
    ArgIndex(usize),
}

/// Which way bytes move for an `iovec`-style argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoVecDirection {
    /// `readv`-like: the kernel fills guest buffers, host copies data out.
    Read,
    /// `writev`-like: guest buffers are already filled, host copies data in.
    Write,
}

/// How many of an output pointer's declared bytes actually get copied back
/// (spec.md §4.2 "For read-like syscalls whose output length equals the
/// integer return value, the translator copies back exactly that many
/// bytes; for fixed-size outputs, it copies the declared length.").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyLen {
    /// Copy all `len` bytes, regardless of the syscall's return value
    /// (e.g. `fstat`'s `struct stat` output).
    Declared,
    /// Copy `min(len, max(return_value, 0))` bytes (e.g. `read`'s buffer).
    UpToReturn,
}

/// The shape of one syscall argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// An ordinary integer, passed through unchanged.
    Value,
    /// A pointer to guest-readable data the host must copy into the scratch
    /// region before invoking the syscall (e.g. a path string's raw bytes,
    /// when the length is known up front rather than NUL-terminated).
    InPtr { len: LenSpec },
    /// A pointer to a buffer the guest kernel will fill; the host copies the
    /// result back into user memory after the call.
    OutPtr { len: LenSpec, copy: CopyLen },
    /// A pointer used for both directions (e.g. a `struct pollfd` array that
    /// is read for its request and rewritten with results).
    InOutPtr { len: LenSpec, copy: CopyLen },
    /// A NUL-terminated string, such as an `openat` path.
    CString { max_len: u32 },
    /// A pointer to an array of `(ptr, len)` pairs (an `iovec` array), whose
    /// element count is given by another argument. A `Read` direction is
    /// always clamped to the syscall's return value, in declared-entry
    /// order, matching `readv`'s own semantics.
    IoVec { count_arg: usize, direction: IoVecDirection },
}

/// The full pointer-argument shape of one syscall.
#[derive(Debug, Clone, Default)]
pub struct SyscallDescriptor {
    /// `args[i]` describes raw argument `i`; `None` means "plain value, no
    /// translation needed" (the common case, so descriptors only list the
    /// arguments that actually need it).
    pub args: HashMap<usize, ArgKind>,
}

impl SyscallDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, index: usize, kind: ArgKind) -> Self {
        self.args.insert(index, kind);
        self
    }

    pub fn kind_of(&self, index: usize) -> Option<ArgKind> {
        self.args.get(&index).copied()
    }
}

/// Maps syscall numbers to their [`SyscallDescriptor`]. Built once at boot
/// from the guest kernel's published syscall table (spec.md §6) and shared
/// read-only across every runner.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    by_number: HashMap<u32, SyscallDescriptor>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, syscall_number: u32, descriptor: SyscallDescriptor) {
        self.by_number.insert(syscall_number, descriptor);
    }

    /// The descriptor for a syscall number, if one was registered. A syscall
    /// with no descriptor is assumed to take only plain values and is passed
    /// through untranslated.
    pub fn get(&self, syscall_number: u32) -> Option<&SyscallDescriptor> {
        self.by_number.get(&syscall_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // openat(dirfd, path: CString, flags, mode) — spec.md §8 worked example.
    fn openat_descriptor() -> SyscallDescriptor {
        SyscallDescriptor::new().with_arg(1, ArgKind::CString { max_len: 4096 })
    }

    // readv(fd, iov, iovcnt) — spec.md §8 worked example.
    fn readv_descriptor() -> SyscallDescriptor {
        SyscallDescriptor::new().with_arg(
            1,
            ArgKind::IoVec { count_arg: 2, direction: IoVecDirection::Read },
        )
    }

    #[test]
    fn unregistered_syscall_has_no_descriptor() {
        let table = DescriptorTable::new();
        assert!(table.get(999).is_none());
    }

    #[test]
    fn registered_descriptor_round_trips() {
        let mut table = DescriptorTable::new();
        table.register(257, openat_descriptor());
        table.register(19, readv_descriptor());

        assert_eq!(
            table.get(257).unwrap().kind_of(1),
            Some(ArgKind::CString { max_len: 4096 })
        );
        assert_eq!(
            table.get(19).unwrap().kind_of(1),
            Some(ArgKind::IoVec { count_arg: 2, direction: IoVecDirection::Read })
        );
        assert_eq!(table.get(19).unwrap().kind_of(0), None);
    }
}
