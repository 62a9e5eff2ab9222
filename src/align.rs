use std::mem;

/// Pointer size in bytes on the current machine (or target architecture).
/// Most personal computers nowadays are 64 bit machines, so this is going to
/// equal 8 in most cases.
pub(crate) const POINTER_SIZE: usize = mem::size_of::<usize>();

/// Largest payload size a caller may request, in bytes. Anything above this
/// is rejected before we even look at the heap.
pub(crate) const MAX_PAYLOAD_SIZE: usize = 100_000_000;

/// Rounds `size` up to the next multiple of the machine word size.
///
/// ```text
/// 64 bit machine: align(13) == 16
/// 32 bit machine: align(11) == 12
/// ```
///
/// Every payload size we hand out is aligned this way, which together with
/// word-aligned headers keeps every payload address word-aligned without any
/// padding bookkeeping.
#[inline]
pub(crate) fn align(size: usize) -> usize {
    (size + POINTER_SIZE - 1) & !(POINTER_SIZE - 1)
}
