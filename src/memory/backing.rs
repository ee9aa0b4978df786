//! The byte-addressable backing store behind [`super::KernelMemory`] and
//! [`super::UserMemory`].
//!
//! On `wasm32` this is a real `js_sys::WebAssembly::Memory` object — the
//! host's own Rust code cannot alias the guest's linear memory directly (the
//! guest is a *separate* WebAssembly instance), so every byte in or out goes
//! through a `Uint8Array` view over the memory's `buffer()`. Off `wasm32`
//! (native unit tests) it's a plain `Vec<u8>`, so the syscall translator in
//! [`super::translate`] can be exercised without a browser.

use std::fmt;

/// Error surfaced by the memory backing itself (bounds, growth failure).
/// Distinct from [`super::TranslateError`], which is the translator's own
/// failure surface (scratch overflow, unterminated string, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    OutOfBounds,
    GrowFailed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfBounds => write!(f, "memory access out of bounds"),
            MemoryError::GrowFailed => write!(f, "failed to grow linear memory"),
        }
    }
}

/// A growable linear byte buffer, shared or private.
pub trait LinearMemory {
    /// Current size in bytes.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow by `delta_pages` 64 KiB pages. Returns the previous size in
    /// pages, matching the `WebAssembly.Memory.grow` convention.
    fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError>;

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), MemoryError>;

    /// Read a NUL-terminated string starting at `offset`, scanning at most
    /// `max_len` bytes. Returns the bytes up to (excluding) the terminator,
    /// or `None` if no terminator was found within the budget.
    fn read_cstr(&self, offset: u32, max_len: u32) -> Result<Option<Vec<u8>>, MemoryError> {
        let mut out = Vec::new();
        let mut pos = offset;
        let end = offset.saturating_add(max_len);
        let mut byte = [0u8; 1];
        while pos < end {
            self.read(pos, &mut byte)?;
            if byte[0] == 0 {
                return Ok(Some(out));
            }
            out.push(byte[0]);
            pos += 1;
        }
        Ok(None)
    }
}

pub const WASM_PAGE_SIZE: u32 = 64 * 1024;

/// Native backing for non-wasm unit tests: a plain growable `Vec<u8>` behind
/// a `RefCell`, zero-initialized on grow.
pub struct NativeMemory {
    data: std::cell::RefCell<Vec<u8>>,
}

impl NativeMemory {
    pub fn new(initial_pages: u32) -> Self {
        Self {
            data: std::cell::RefCell::new(vec![0u8; (initial_pages * WASM_PAGE_SIZE) as usize]),
        }
    }
}

impl LinearMemory for NativeMemory {
    fn len(&self) -> u32 {
        self.data.borrow().len() as u32
    }

    fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError> {
        let mut data = self.data.borrow_mut();
        let prev_pages = data.len() as u32 / WASM_PAGE_SIZE;
        data.resize(data.len() + (delta_pages * WASM_PAGE_SIZE) as usize, 0);
        Ok(prev_pages)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.borrow();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(MemoryError::OutOfBounds)?;
        if end > data.len() {
            return Err(MemoryError::OutOfBounds);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), MemoryError> {
        let mut data = self.data.borrow_mut();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(MemoryError::OutOfBounds)?;
        if end > data.len() {
            return Err(MemoryError::OutOfBounds);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::{LinearMemory, MemoryError, WASM_PAGE_SIZE};
    use js_sys::WebAssembly;

    /// Wasm backing: a real `WebAssembly.Memory`, either a `SharedArrayBuffer`
    /// (kernel memory) or a private `ArrayBuffer` (user memory) depending on
    /// how it was constructed.
    pub struct WasmMemory {
        memory: WebAssembly::Memory,
    }

    impl WasmMemory {
        pub fn new(memory: WebAssembly::Memory) -> Self {
            Self { memory }
        }

        pub fn create(initial_pages: u32, maximum_pages: u32, shared: bool) -> Result<Self, MemoryError> {
            let descriptor = js_sys::Object::new();
            js_sys::Reflect::set(&descriptor, &"initial".into(), &initial_pages.into())
                .map_err(|_| MemoryError::GrowFailed)?;
            js_sys::Reflect::set(&descriptor, &"maximum".into(), &maximum_pages.into())
                .map_err(|_| MemoryError::GrowFailed)?;
            if shared {
                js_sys::Reflect::set(&descriptor, &"shared".into(), &true.into())
                    .map_err(|_| MemoryError::GrowFailed)?;
            }
            let memory = WebAssembly::Memory::new(&descriptor).map_err(|_| MemoryError::GrowFailed)?;
            Ok(Self { memory })
        }

        /// The underlying `WebAssembly.Memory`, handed to a worker's import
        /// object so every runner shares the same kernel memory.
        pub fn js_memory(&self) -> &WebAssembly::Memory {
            &self.memory
        }

        fn view(&self) -> js_sys::Uint8Array {
            // Re-fetch every time: `grow()` detaches any previously obtained
            // buffer/view in JS.
            js_sys::Uint8Array::new(&self.memory.buffer())
        }
    }

    impl LinearMemory for WasmMemory {
        fn len(&self) -> u32 {
            self.view().length()
        }

        fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError> {
            self.memory.grow(delta_pages).map_err(|_| MemoryError::GrowFailed)
        }

        fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
            let view = self.view();
            let end = offset.checked_add(buf.len() as u32).ok_or(MemoryError::OutOfBounds)?;
            if end > view.length() {
                return Err(MemoryError::OutOfBounds);
            }
            view.subarray(offset, end).copy_to(buf);
            Ok(())
        }

        fn write(&self, offset: u32, buf: &[u8]) -> Result<(), MemoryError> {
            let view = self.view();
            let end = offset.checked_add(buf.len() as u32).ok_or(MemoryError::OutOfBounds)?;
            if end > view.length() {
                return Err(MemoryError::OutOfBounds);
            }
            view.subarray(offset, end).copy_from(buf);
            Ok(())
        }
    }

    // Silence the otherwise-unused-constant warning on this cfg path; page
    // size is consumed only by the native stub's initial-size math.
    const _: u32 = WASM_PAGE_SIZE;
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::WasmMemory;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_memory_round_trips() {
        let mem = NativeMemory::new(1);
        mem.write(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        mem.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn native_memory_out_of_bounds() {
        let mem = NativeMemory::new(1);
        let mut buf = [0u8; 8];
        assert_eq!(mem.read(WASM_PAGE_SIZE - 4, &mut buf), Err(MemoryError::OutOfBounds));
    }

    #[test]
    fn native_memory_grow_zeroes_new_pages() {
        let mem = NativeMemory::new(1);
        let prev = mem.grow(1).unwrap();
        assert_eq!(prev, 1);
        assert_eq!(mem.len(), WASM_PAGE_SIZE * 2);
        let mut buf = [0u8; 4];
        mem.read(WASM_PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
    }

    #[test]
    fn read_cstr_stops_at_nul() {
        let mem = NativeMemory::new(1);
        mem.write(0, b"/hello\0garbage").unwrap();
        let s = mem.read_cstr(0, 64).unwrap();
        assert_eq!(s, Some(b"/hello".to_vec()));
    }

    #[test]
    fn read_cstr_fails_without_terminator_in_budget() {
        let mem = NativeMemory::new(1);
        mem.write(0, &[b'a'; 16]).unwrap();
        let s = mem.read_cstr(0, 8).unwrap();
        assert_eq!(s, None);
    }
}
