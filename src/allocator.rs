use std::ptr::NonNull;

use crate::{
    align::{align, MAX_PAYLOAD_SIZE},
    bins::FreeBins,
    block::{Block, BLOCK_HEADER_SIZE, MMAP_THRESHOLD},
    header::Header,
    list::LinkedList,
    platform::{MemorySource, Platform},
    Pointer,
};

/// The block manager. It carves the address space delivered by its
/// [`MemorySource`] into headed blocks and keeps three views over them:
///
/// ```text
///                 +-------+     +-------+     +-------+     +-------+
/// heap list   --> | Used  | --> | Free  | --> | Used  | --> | Free  |   <- ascending addresses,
///                 +-------+     +---|---+     +-------+     +---^---+      physically adjacent
///                                   |                           |
///                      +------------+              +------------+
///                      v                            |
///                 +---------+---------+-----------------+
/// free bins   --> | bins[0] | bins[1] |  ...  bins[127] |   <- free heap blocks,
///                 +---------+---------+-----------------+      sorted per bucket
///
///                 +-------+     +-------+
/// mmap list   --> | Used  | --> | Used  |   <- one kernel mapping each,
///                 +-------+     +-------+      never split, never binned
/// ```
///
/// Small requests are served out of the bins, by stretching the last heap
/// block, or by extending the program break. Large requests (see
/// [`MMAP_THRESHOLD`]) get a mapping of their own that goes straight back to
/// the kernel on free. Freeing a heap block coalesces it with whichever
/// physical neighbours happen to be free, so the heap list never contains
/// two adjacent free blocks.
///
/// All operations take `&mut self` and run to completion: this type is
/// single threaded on purpose. It also holds raw pointers into the segment
/// it manages, so the compiler won't let it travel across threads.
///
/// # Drop
///
/// There is no teardown. The program break cannot be handed back and the
/// structures live inside the memory they manage, so the allocator's
/// lifetime is the lifetime of its source.
pub struct BinAllocator<S: MemorySource = Platform> {
    /// Blocks carved out of the contiguous segment, in address order.
    pub(crate) heap: LinkedList<Block>,
    /// Blocks with their own anonymous mapping.
    pub(crate) mapped: LinkedList<Block>,
    /// Size index over the free blocks of the heap list.
    pub(crate) bins: FreeBins,
    /// Where the address space comes from.
    pub(crate) source: S,
}

#[cfg(unix)]
impl BinAllocator {
    /// Allocator over the real program break and kernel mappings. Only one
    /// of these should exist per process, see [`Platform`].
    pub const fn new() -> Self {
        Self::with_source(Platform)
    }
}

#[cfg(unix)]
impl Default for BinAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> BinAllocator<S> {
    /// Allocator over a caller-provided memory source.
    pub const fn with_source(source: S) -> Self {
        Self {
            heap: LinkedList::new(),
            mapped: LinkedList::new(),
            bins: FreeBins::new(),
            source,
        }
    }

    /// Read access to the underlying source, mostly useful for accounting.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Allocates a block of at least `size` bytes and returns the address of
    /// its payload, or `None` when `size` is zero, above the request cap, or
    /// the source is exhausted. On failure the allocator state is exactly
    /// what it was before the call.
    ///
    /// # Safety
    ///
    /// The source must uphold the [`MemorySource`] contract. With a correct
    /// source this function is sound for any `size`.
    pub unsafe fn allocate(&mut self, size: usize) -> Pointer<u8> {
        if size == 0 || size > MAX_PAYLOAD_SIZE {
            return None;
        }

        let size = align(size);

        if size >= MMAP_THRESHOLD {
            return self.allocate_mapped(size);
        }

        if let Some(block) = self.bins.find_fit(size) {
            self.bins.remove(block);
            self.split_if_oversized(block, size);
            return Some(Header::payload_address_of(block));
        }

        if let Some(last) = self.heap.last().filter(|last| last.as_ref().is_free()) {
            return self.extend_wilderness(last, size);
        }

        let address = self.source.extend(BLOCK_HEADER_SIZE + size)?;
        let block = self.heap.append(Block::new(size, false, false), address);

        Some(Header::payload_address_of(block))
    }

    /// Allocates `num * size` bytes and zero-fills them. Returns `None` on
    /// the same conditions as [`BinAllocator::allocate`], and also when the
    /// product overflows.
    ///
    /// # Safety
    ///
    /// Same contract as [`BinAllocator::allocate`].
    pub unsafe fn zero_allocate(&mut self, num: usize, size: usize) -> Pointer<u8> {
        let total = num.checked_mul(size)?;
        let address = self.allocate(total)?;

        address.as_ptr().write_bytes(0, total);

        Some(address)
    }

    /// Releases the block that backs `address`. Mapped blocks go back to the
    /// kernel immediately; heap blocks return to the bins and are merged
    /// with whichever physical neighbours are free. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `address` must have come from this allocator and must not have been
    /// freed already. The payload must not be accessed afterwards.
    pub unsafe fn free(&mut self, address: Pointer<u8>) {
        let Some(address) = address else { return };

        let block = Header::<Block>::from_payload_address(address);

        if block.as_ref().is_mapped() {
            let length = block.as_ref().total_size();
            self.mapped.remove(block);
            self.source.unmap(block.cast(), length);
            return;
        }

        self.bins.insert(block);
        self.merge_neighbours(block);
    }

    /// Large allocation fast path: one dedicated kernel mapping per block,
    /// tracked in its own list so diagnostics can see it.
    unsafe fn allocate_mapped(&mut self, size: usize) -> Pointer<u8> {
        let address = self.source.map(BLOCK_HEADER_SIZE + size)?;
        let block = self.mapped.append(Block::new(size, false, true), address);

        Some(Header::payload_address_of(block))
    }

    /// Grows the last heap block in place by extending the program break.
    /// Only called when the bins had nothing, which implies the wilderness
    /// block is smaller than `size`.
    unsafe fn extend_wilderness(
        &mut self,
        mut last: NonNull<Header<Block>>,
        size: usize,
    ) -> Pointer<u8> {
        self.source.extend(size - last.as_ref().size())?;

        // Bin removal keys off the payload size, so resize after.
        self.bins.remove(last);
        last.as_mut().data.size = size;

        Some(Header::payload_address_of(last))
    }

    /// Block splitting algorithm. Serving a small request out of a large
    /// free block would waste the tail of the block, so when the leftover is
    /// big enough to stand on its own (see [`Header::can_split`]) it becomes
    /// a new free block:
    ///
    /// **Before**:
    ///
    /// ```text
    ///         +-->  +-----------+
    ///         |     |   Header  |
    /// Block   |     +-----------+
    ///         |     |  Payload  | <- 1024 bytes, request for 128.
    ///         +-->  +-----------+
    /// ```
    ///
    /// **After**:
    ///
    /// ```text
    ///         +-->  +-----------+
    ///         |     |   Header  |
    /// Prefix  |     +-----------+
    ///         |     |  Payload  | <- 128 bytes, served.
    ///         +-->  +-----------+
    ///         |     |   Header  |
    /// Suffix  |     +-----------+
    ///         |     |  Payload  | <- 1024 - 128 - header bytes, free, binned.
    ///         +-->  +-----------+
    /// ```
    ///
    /// `block` must already be out of the bins. Returns the suffix when a
    /// split happened.
    pub(crate) unsafe fn split_if_oversized(
        &mut self,
        mut block: NonNull<Header<Block>>,
        size: usize,
    ) -> Pointer<Header<Block>> {
        if !block.as_ref().can_split(size) {
            return None;
        }

        let remainder = block.as_ref().size() - size - BLOCK_HEADER_SIZE;
        let address = NonNull::new_unchecked(Header::payload_address_of(block).as_ptr().add(size));

        block.as_mut().data.size = size;

        let suffix = self
            .heap
            .insert_after(block, Block::new(remainder, true, false), address);
        self.bins.insert(suffix);

        Some(suffix)
    }

    /// The inverse of [`BinAllocator::split_if_oversized`]: a freshly freed
    /// block absorbs whichever physical neighbours are free, so the heap
    /// list never keeps two adjacent free blocks. If the previous block is
    /// absorbed the surviving block changes address, hence the return value.
    unsafe fn merge_neighbours(
        &mut self,
        mut block: NonNull<Header<Block>>,
    ) -> NonNull<Header<Block>> {
        if block.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
            self.merge_next(block);
        }

        if block.as_ref().prev.is_some_and(|prev| prev.as_ref().is_free()) {
            block = block.as_ref().prev.unwrap();
            self.merge_next(block);
        }

        block
    }

    /// Merges the block right after `block` into `block`. Both must be free
    /// heap blocks. Merging is always right-to-left so the surviving header
    /// is the one at the lower address:
    ///
    /// ```text
    /// +----------------+---------------+
    /// |    Block A     |   Block B     |
    /// +----------------+---------------+
    ///        ^                 |
    ///        |                 |
    ///        +-----------------+
    ///           Merge B into A
    /// ```
    pub(crate) unsafe fn merge_next(&mut self, mut block: NonNull<Header<Block>>) {
        let next = block.as_ref().next.unwrap();

        // Both bin memberships key off sizes that are about to change, so
        // the bins are updated first.
        self.bins.remove(next);
        self.bins.remove(block);

        block.as_mut().data.size += next.as_ref().total_size();
        self.heap.remove(next);

        self.bins.insert(block);
    }

    /// Number of free blocks in the heap list.
    pub fn num_free_blocks(&self) -> usize {
        unsafe { self.heap.iter().filter(|block| block.as_ref().is_free()).count() }
    }

    /// Total payload bytes of the free blocks in the heap list.
    pub fn num_free_bytes(&self) -> usize {
        unsafe {
            self.heap
                .iter()
                .filter(|block| block.as_ref().is_free())
                .map(|block| block.as_ref().size())
                .sum()
        }
    }

    /// Number of live blocks, used or free, heap and mapped alike.
    pub fn num_allocated_blocks(&self) -> usize {
        self.heap.len() + self.mapped.len()
    }

    /// Total payload bytes of all live blocks, excluding headers.
    pub fn num_allocated_bytes(&self) -> usize {
        unsafe {
            self.heap.iter().chain(self.mapped.iter())
                .map(|block| block.as_ref().size())
                .sum()
        }
    }

    /// Total header bytes currently in the heap and mmap lists.
    pub fn num_meta_data_bytes(&self) -> usize {
        self.num_allocated_blocks() * BLOCK_HEADER_SIZE
    }

    /// Size of a single block header.
    pub fn size_meta_data(&self) -> usize {
        BLOCK_HEADER_SIZE
    }

    /// Asserts the structural invariants: the heap list holds no two
    /// adjacent free blocks, every free heap block is binned exactly once
    /// with buckets sorted ascending, and no used or mapped block is binned.
    #[cfg(test)]
    pub(crate) unsafe fn check_invariants(&self) {
        use crate::bins::{BIN_COUNT, BIN_WIDTH};

        let mut previous: Pointer<Header<Block>> = None;
        for block in self.heap.iter() {
            if let Some(previous) = previous {
                assert!(
                    !(previous.as_ref().is_free() && block.as_ref().is_free()),
                    "two adjacent free blocks in the heap list"
                );
                assert!(
                    crate::block::are_adjacent(previous, block),
                    "heap list out of physical order"
                );
            }
            previous = Some(block);
            assert!(!block.as_ref().is_mapped());
        }

        assert_eq!(self.num_free_blocks(), self.bins.count());

        for bucket in 0..BIN_COUNT {
            let sizes = self.bins.sizes_in(bucket);
            for window in sizes.windows(2) {
                assert!(window[0] <= window[1], "bucket {bucket} out of order");
            }
            for size in sizes {
                if bucket < BIN_COUNT - 1 {
                    assert_eq!(crate::bins::FreeBins::index(size), bucket);
                } else {
                    assert!(size >= (BIN_COUNT - 1) * BIN_WIDTH);
                }
            }
        }

        for block in self.mapped.iter() {
            assert!(block.as_ref().is_mapped());
            assert!(!block.as_ref().is_free());
        }
    }
}
