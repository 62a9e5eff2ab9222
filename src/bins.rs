use std::{cmp, ptr::NonNull};

use crate::{block::Block, header::Header, Pointer};

/// Number of free bins. The last one is a catch-all, see [`FreeBins::index`].
pub(crate) const BIN_COUNT: usize = 128;

/// Payload size granularity of the bins. Bucket `i` holds free blocks whose
/// payload lies in `[i * BIN_WIDTH, (i + 1) * BIN_WIDTH)` bytes.
pub(crate) const BIN_WIDTH: usize = 1024;

/// Size-segregated index over every free block of the heap list. When a block
/// is freed it gets threaded into the bucket matching its payload size through
/// the `bin_next`/`bin_prev` links of its own header, so the index costs no
/// memory beyond the header fields that are dead while a block is in use.
///
/// ```text
///             +--------+     +--------+
/// buckets[0]  | 24 B   | --> | 960 B  |
///             +--------+     +--------+
///             +--------+
/// buckets[1]  | 1104 B |
///             +--------+
///                ...
///             +--------+     +--------+     +--------+
/// buckets[127]| 130 KiB| --> | 140 KiB| --> | 2 MiB  |
///             +--------+     +--------+     +--------+
/// ```
///
/// Each bucket is sorted by ascending payload size, so scanning a bucket
/// front to back yields the tightest resident fit. Mapped blocks never show
/// up here, they are returned to the kernel the moment they are freed.
pub(crate) struct FreeBins {
    buckets: [Pointer<Header<Block>>; BIN_COUNT],
}

impl FreeBins {
    /// Builds an empty bin array.
    pub const fn new() -> Self {
        Self {
            buckets: [None; BIN_COUNT],
        }
    }

    /// Bucket index for a block of payload `size`. Splitting and coalescing
    /// can produce free heap blocks larger than anything a caller may request
    /// from the heap, so everything past the last boundary lands in the final
    /// bucket.
    #[inline]
    pub fn index(size: usize) -> usize {
        cmp::min(BIN_COUNT - 1, size / BIN_WIDTH)
    }

    /// Threads `block` into the bucket matching its payload size, keeping the
    /// bucket sorted by ascending size, and marks it free. Ties go before the
    /// first resident of equal size.
    ///
    /// # Safety
    ///
    /// `block` must be valid and not currently sitting in any bin.
    pub unsafe fn insert(&mut self, mut block: NonNull<Header<Block>>) {
        let bucket = Self::index(block.as_ref().size());

        let mut prev: Pointer<Header<Block>> = None;
        let mut current = self.buckets[bucket];

        while let Some(existing) = current {
            if existing.as_ref().size() >= block.as_ref().size() {
                break;
            }
            prev = current;
            current = existing.as_ref().data.bin_next;
        }

        block.as_mut().data.bin_next = current;
        block.as_mut().data.bin_prev = prev;

        if let Some(mut next) = current {
            next.as_mut().data.bin_prev = Some(block);
        }

        match prev {
            Some(mut prev) => prev.as_mut().data.bin_next = Some(block),
            None => self.buckets[bucket] = Some(block),
        }

        block.as_mut().data.is_free = true;
    }

    /// Unthreads `block` from its bucket and marks it used. O(1) splice
    /// through the block's own links.
    ///
    /// # Safety
    ///
    /// `block` must currently be in a bin, and its payload size must not have
    /// changed since [`FreeBins::insert`]: the bucket head fixup below derives
    /// the bucket index from it. Resize only after removing.
    pub unsafe fn remove(&mut self, mut block: NonNull<Header<Block>>) {
        let prev = block.as_ref().data.bin_prev;
        let next = block.as_ref().data.bin_next;

        match prev {
            Some(mut prev) => prev.as_mut().data.bin_next = next,
            None => self.buckets[Self::index(block.as_ref().size())] = next,
        }

        if let Some(mut next) = next {
            next.as_mut().data.bin_prev = prev;
        }

        block.as_mut().data.bin_next = None;
        block.as_mut().data.bin_prev = None;
        block.as_mut().data.is_free = false;
    }

    /// Returns the first free block that can hold `size` bytes, or `None` if
    /// no bucket has one. Scans from the bucket matching `size` upwards and
    /// walks each bucket in ascending size order, so the result is the best
    /// fit at bucket granularity and the exact first fit within its bucket.
    ///
    /// # Safety
    ///
    /// The bins must be consistent, which is guaranteed as long as blocks are
    /// only inserted and removed through this struct.
    pub unsafe fn find_fit(&self, size: usize) -> Pointer<Header<Block>> {
        for bucket in Self::index(size)..BIN_COUNT {
            let mut current = self.buckets[bucket];

            while let Some(block) = current {
                if block.as_ref().size() >= size {
                    return Some(block);
                }
                current = block.as_ref().data.bin_next;
            }
        }

        None
    }

    /// Total number of binned blocks. Only used to cross-check the heap list
    /// traversal in tests.
    #[cfg(test)]
    pub unsafe fn count(&self) -> usize {
        (0..BIN_COUNT).map(|bucket| self.sizes_in(bucket).len()).sum()
    }

    /// Payload sizes of one bucket, front to back.
    #[cfg(test)]
    pub unsafe fn sizes_in(&self, bucket: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut current = self.buckets[bucket];

        while let Some(block) = current {
            sizes.push(block.as_ref().size());
            current = block.as_ref().data.bin_next;
        }

        sizes
    }
}
