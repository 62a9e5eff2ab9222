use std::{alloc, ptr::NonNull};

use crate::{align::POINTER_SIZE, platform::MemorySource, Pointer};

/// Deterministic [`MemorySource`] that simulates the program break inside a
/// fixed slab obtained from the global allocator. Anonymous mappings are
/// plain global allocations as well.
///
/// This is what the test-suite runs on: the real program break is a process
/// wide singleton, so tests hammering `sbrk` from multiple allocator
/// instances would corrupt each other's idea of physical adjacency. A slab
/// per allocator keeps every test hermetic, works under
/// [Miri](https://github.com/rust-lang/miri) where FFI is unavailable, and
/// makes kernel exhaustion reproducible: size the slab, run the allocator
/// into the wall, and watch it hand out the null sentinel.
pub struct ArenaSource {
    /// Backing storage for the simulated break.
    slab: NonNull<u8>,
    /// Slab length in bytes. The simulated break fails beyond this.
    capacity: usize,
    /// Bytes of the slab consumed so far.
    brk: usize,
    /// Bytes currently handed out through [`MemorySource::map`].
    mapped: usize,
}

impl ArenaSource {
    /// Builds a source whose simulated program break can grow by `capacity`
    /// bytes in total.
    pub fn with_capacity(capacity: usize) -> Self {
        let layout = Self::layout(capacity);

        let Some(slab) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            alloc::handle_alloc_error(layout);
        };

        Self {
            slab,
            capacity,
            brk: 0,
            mapped: 0,
        }
    }

    /// Total bytes delivered through [`MemorySource::extend`].
    pub fn break_size(&self) -> usize {
        self.brk
    }

    /// Bytes delivered through [`MemorySource::map`] and not yet returned.
    pub fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    fn layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, POINTER_SIZE).unwrap()
    }
}

impl MemorySource for ArenaSource {
    unsafe fn extend(&mut self, increment: usize) -> Pointer<u8> {
        if self.capacity - self.brk < increment {
            return None;
        }

        let address = NonNull::new_unchecked(self.slab.as_ptr().add(self.brk));
        self.brk += increment;

        Some(address)
    }

    unsafe fn map(&mut self, length: usize) -> Pointer<u8> {
        // Anonymous mappings are zero-filled by kernel contract, so the mock
        // has to zero as well.
        let address = NonNull::new(alloc::alloc_zeroed(Self::layout(length)))?;
        self.mapped += length;

        Some(address)
    }

    unsafe fn unmap(&mut self, address: NonNull<u8>, length: usize) {
        alloc::dealloc(address.as_ptr(), Self::layout(length));
        self.mapped -= length;
    }
}

impl Drop for ArenaSource {
    fn drop(&mut self) {
        // Outstanding mappings are the caller's to release, only the slab is
        // ours.
        unsafe { alloc::dealloc(self.slab.as_ptr(), Self::layout(self.capacity)) };
    }
}
