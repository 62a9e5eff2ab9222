use std::{cmp, ptr, ptr::NonNull};

use crate::{
    align::{align, MAX_PAYLOAD_SIZE},
    allocator::BinAllocator,
    block::{Block, BLOCK_HEADER_SIZE},
    header::Header,
    platform::MemorySource,
    Pointer,
};

/// Reallocation. The interesting part of the allocator: before falling back
/// to the copy-to-fresh-block strategy every other allocator ends at, a heap
/// block tries a cascade of cheaper strategies that reuse the memory it
/// already sits in, in this order:
///
/// 1. Mapped blocks always move, their mappings cannot grow.
/// 2. The block is already big enough: reuse in place, splitting off the
///    excess when worthwhile.
/// 3. The previous neighbour is free and merging reaches the request: absorb
///    the block into it and slide the payload down.
/// 4. Same with the next neighbour, no payload movement needed.
/// 5. Same with both neighbours at once.
/// 6. The block is the wilderness block: stretch the program break, first
///    absorbing a free previous neighbour when there is one.
/// 7. Fallback: fresh allocation, copy, free.
///
/// The first branch whose precondition holds wins. Every branch that splits
/// re-coalesces the split remainder with the block after it, so the heap
/// list never ends up with two adjacent free blocks.
impl<S: MemorySource> BinAllocator<S> {
    /// Resizes the allocation behind `address` to `size` bytes, preserving
    /// the first `min(old payload, size)` bytes, and returns the possibly
    /// relocated payload address. `None` behaves like plain allocation.
    ///
    /// Returns `None` when `size` is zero, above the request cap, or the
    /// source is exhausted; the original allocation stays valid and
    /// untouched in that case.
    ///
    /// # Safety
    ///
    /// `address` must have come from this allocator and must not have been
    /// freed. When the returned address differs from `address`, the old
    /// payload must not be accessed anymore.
    pub unsafe fn reallocate(&mut self, address: Pointer<u8>, size: usize) -> Pointer<u8> {
        if size == 0 || size > MAX_PAYLOAD_SIZE {
            return None;
        }

        let Some(address) = address else {
            return self.allocate(size);
        };

        let size = align(size);
        let block = Header::<Block>::from_payload_address(address);

        if block.as_ref().is_mapped() {
            return self.move_to_fresh_block(block, address, size);
        }

        if block.as_ref().size() >= size {
            self.shrink_in_place(block, size);
            return Some(address);
        }

        if let Some(prev) = block.as_ref().prev.filter(|prev| prev.as_ref().is_free()) {
            if prev.as_ref().size() + BLOCK_HEADER_SIZE + block.as_ref().size() >= size {
                let copy = cmp::min(size, block.as_ref().size());
                return Some(self.absorb_into_prev(prev, block, size, copy));
            }
        }

        if let Some(next) = block.as_ref().next.filter(|next| next.as_ref().is_free()) {
            if block.as_ref().size() + BLOCK_HEADER_SIZE + next.as_ref().size() >= size {
                self.absorb_next(block, next);
                self.shrink_in_place(block, size);
                return Some(address);
            }
        }

        if let (Some(prev), Some(next)) = (block.as_ref().prev, block.as_ref().next) {
            if prev.as_ref().is_free()
                && next.as_ref().is_free()
                && prev.as_ref().size()
                    + block.as_ref().size()
                    + next.as_ref().size()
                    + 2 * BLOCK_HEADER_SIZE
                    >= size
            {
                let copy = cmp::min(size, block.as_ref().size());
                self.absorb_next(block, next);
                return Some(self.absorb_into_prev(prev, block, size, copy));
            }
        }

        if block.as_ref().next.is_none() {
            return self.grow_wilderness(block, address, size);
        }

        self.move_to_fresh_block(block, address, size)
    }

    /// In-place reuse of a block that already holds `size` bytes: split off
    /// the excess when worthwhile and stitch the remainder into a free
    /// follower. Used by every cascade branch that ends up with an oversized
    /// block.
    unsafe fn shrink_in_place(&mut self, block: NonNull<Header<Block>>, size: usize) {
        let Some(suffix) = self.split_if_oversized(block, size) else {
            return;
        };

        if suffix.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
            self.merge_next(suffix);
        }
    }

    /// Grows backwards: `block` disappears into its free previous neighbour
    /// and the payload slides down to the neighbour's payload address. The
    /// ranges overlap, `copy` bytes move memmove-style. Returns the new
    /// payload address.
    unsafe fn absorb_into_prev(
        &mut self,
        mut prev: NonNull<Header<Block>>,
        block: NonNull<Header<Block>>,
        size: usize,
        copy: usize,
    ) -> NonNull<u8> {
        self.bins.remove(prev);

        prev.as_mut().data.size += BLOCK_HEADER_SIZE + block.as_ref().size();
        self.heap.remove(block);

        let destination = Header::payload_address_of(prev);
        ptr::copy(
            Header::payload_address_of(block).as_ptr(),
            destination.as_ptr(),
            copy,
        );

        self.shrink_in_place(prev, size);

        destination
    }

    /// Grows forward: the free next neighbour disappears into `block`. No
    /// payload moves.
    unsafe fn absorb_next(
        &mut self,
        mut block: NonNull<Header<Block>>,
        next: NonNull<Header<Block>>,
    ) {
        self.bins.remove(next);

        block.as_mut().data.size += next.as_ref().total_size();
        self.heap.remove(next);
    }

    /// The block is the last one in the heap list, so the program break can
    /// be stretched by exactly the missing bytes. A free previous neighbour
    /// is folded in first, which shrinks the extension. The source call
    /// happens before any structure is touched: a failing extension must
    /// leave the allocator as it was.
    unsafe fn grow_wilderness(
        &mut self,
        mut block: NonNull<Header<Block>>,
        address: NonNull<u8>,
        size: usize,
    ) -> Pointer<u8> {
        if let Some(mut prev) = block.as_ref().prev.filter(|prev| prev.as_ref().is_free()) {
            // The extension is sized against the merged block, not against
            // `block` alone.
            let merged = prev.as_ref().size() + BLOCK_HEADER_SIZE + block.as_ref().size();
            self.source.extend(size - merged)?;

            let copy = block.as_ref().size();

            self.bins.remove(prev);
            prev.as_mut().data.size = size;
            self.heap.remove(block);

            let destination = Header::payload_address_of(prev);
            ptr::copy(address.as_ptr(), destination.as_ptr(), copy);

            return Some(destination);
        }

        self.source.extend(size - block.as_ref().size())?;
        block.as_mut().data.size = size;

        Some(address)
    }

    /// The copy strategy: fresh allocation, copy the surviving prefix, free
    /// the old block. The old block is only freed once the new one exists,
    /// a failing allocation must leave the original allocation valid.
    unsafe fn move_to_fresh_block(
        &mut self,
        block: NonNull<Header<Block>>,
        address: NonNull<u8>,
        size: usize,
    ) -> Pointer<u8> {
        let new_address = self.allocate(size)?;

        ptr::copy_nonoverlapping(
            address.as_ptr(),
            new_address.as_ptr(),
            cmp::min(size, block.as_ref().size()),
        );
        self.free(Some(address));

        Some(new_address)
    }
}
