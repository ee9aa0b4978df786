//! Private per-process user memory (spec.md §3 "user memory", §4.2).
//!
//! Unlike kernel memory this is never shared between runners: each user
//! process gets its own `WebAssembly.Memory` (an ordinary `ArrayBuffer`, not
//! a `SharedArrayBuffer`), instantiated by [`crate::wasm_host`] when the
//! process's module is loaded.

use super::backing::{LinearMemory, MemoryError};

pub struct UserMemory<M: LinearMemory> {
    backing: M,
}

impl<M: LinearMemory> UserMemory<M> {
    pub fn new(backing: M) -> Self {
        Self { backing }
    }

    pub fn backing(&self) -> &M {
        &self.backing
    }

    pub fn len(&self) -> u32 {
        self.backing.len()
    }

    pub fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError> {
        self.backing.grow(delta_pages)
    }

    pub fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.backing.read(offset, buf)
    }

    pub fn write(&self, offset: u32, buf: &[u8]) -> Result<(), MemoryError> {
        self.backing.write(offset, buf)
    }

    pub fn read_cstr(&self, offset: u32, max_len: u32) -> Result<Option<Vec<u8>>, MemoryError> {
        self.backing.read_cstr(offset, max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backing::NativeMemory;

    #[test]
    fn user_memory_is_isolated_from_kernel_memory() {
        let user_a = UserMemory::new(NativeMemory::new(1));
        let user_b = UserMemory::new(NativeMemory::new(1));
        user_a.write(0, b"process-a").unwrap();
        let mut buf = [0u8; 9];
        user_b.read(0, &mut buf).unwrap();
        assert_ne!(&buf, b"process-a");
        assert_eq!(buf, [0u8; 9]);
    }
}
