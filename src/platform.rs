use std::ptr::NonNull;

use crate::Pointer;

/// Abstraction over the two ways this allocator obtains address space from
/// the operating system. The block manager only needs a one-way growing
/// contiguous segment plus individually releasable anonymous regions, it
/// doesn't care about the APIs offered by the underlying kernel.
///
/// Failure is reported as `None` and must leave the source unchanged, the
/// allocator relies on that to keep its own structures untouched when the
/// kernel runs dry.
pub trait MemorySource {
    /// Grows the contiguous segment by exactly `increment` bytes and returns
    /// the previous end, which is the start of the fresh region. The segment
    /// never shrinks and consecutive calls return adjacent regions.
    ///
    /// # Safety
    ///
    /// Caller must not request an increment that overflows the address space.
    unsafe fn extend(&mut self, increment: usize) -> Pointer<u8>;

    /// Obtains an anonymous private read-write region of exactly `length`
    /// bytes, zero-filled by the kernel.
    ///
    /// # Safety
    ///
    /// Caller must keep `length` within what the returned region can hold.
    unsafe fn map(&mut self, length: usize) -> Pointer<u8>;

    /// Releases a region previously returned by [`MemorySource::map`]. Must
    /// be called with the exact address and length of that mapping.
    ///
    /// # Safety
    ///
    /// The region must not be accessed afterwards.
    unsafe fn unmap(&mut self, address: NonNull<u8>, length: usize);
}

/// [`MemorySource`] backed by the real kernel interfaces, `sbrk` for the
/// contiguous segment and `mmap`/`munmap` for anonymous regions. This is the
/// source production allocators run on. There can only sensibly be one user
/// of the program break per process, so don't instantiate two allocators
/// over this source.
#[derive(Default)]
pub struct Platform;

#[cfg(unix)]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{MemorySource, Platform};
    use crate::Pointer;

    impl MemorySource for Platform {
        unsafe fn extend(&mut self, increment: usize) -> Pointer<u8> {
            // On failure sbrk returns (void*) -1 and the break is unchanged.
            let address = libc::sbrk(increment as libc::intptr_t);

            if address == usize::MAX as *mut libc::c_void {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn map(&mut self, length: usize) -> Pointer<u8> {
            // Read-write memory, private to our process, not mapped to any
            // file. For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn unmap(&mut self, address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // TODO: What should we do here? Panic? Memory region is still
                // valid here, it wasn't unmapped.
            }
        }
    }
}
