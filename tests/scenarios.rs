//! End-to-end allocator scenarios driven through the public API and observed
//! through the diagnostic counters. Every test runs on its own [`ArenaSource`]
//! so the scenarios are hermetic and deterministic.

use binalloc::{ArenaSource, BinAllocator};

fn allocator() -> BinAllocator<ArenaSource> {
    BinAllocator::with_source(ArenaSource::with_capacity(4 * 1024 * 1024))
}

fn align(size: usize) -> usize {
    let word = std::mem::size_of::<usize>();
    (size + word - 1) & !(word - 1)
}

#[test]
fn single_block_lifecycle() {
    let mut allocator = allocator();

    unsafe {
        let p = allocator.allocate(40).unwrap();

        assert_eq!(allocator.num_allocated_blocks(), 1);
        assert_eq!(allocator.num_free_blocks(), 0);
        assert!(allocator.num_allocated_bytes() >= 40);

        allocator.free(Some(p));

        assert_eq!(allocator.num_free_blocks(), 1);
        assert!(allocator.num_free_bytes() >= 40);
        assert_eq!(allocator.num_allocated_blocks(), 1);
    }
}

#[test]
fn middle_block_is_recycled() {
    let mut allocator = allocator();

    unsafe {
        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(100).unwrap();
        let c = allocator.allocate(100).unwrap();

        allocator.free(Some(b));

        // The freed middle block holds 104 bytes and the leftover after 80
        // is far below header + 128: it is served whole.
        let d = allocator.allocate(80).unwrap();

        assert_eq!(d, b);
        assert_eq!(allocator.num_free_blocks(), 0);
        assert_eq!(allocator.num_allocated_blocks(), 3);

        allocator.free(Some(a));
        allocator.free(Some(c));
        allocator.free(Some(d));
    }
}

#[test]
fn freeing_neighbours_coalesces() {
    let mut allocator = allocator();

    unsafe {
        let a = allocator.allocate(1000).unwrap();
        let b = allocator.allocate(100).unwrap();

        allocator.free(Some(a));
        allocator.free(Some(b));

        // One merged block: both payloads plus the swallowed header.
        assert_eq!(allocator.num_free_blocks(), 1);
        assert_eq!(
            allocator.num_free_bytes(),
            1000 + align(100) + allocator.size_meta_data()
        );
    }
}

#[test]
fn large_allocation_round_trips_through_the_kernel() {
    let mut allocator = allocator();

    unsafe {
        let p = allocator.allocate(200_000).unwrap();

        assert_eq!(allocator.num_allocated_blocks(), 1);
        assert_eq!(allocator.source().break_size(), 0);
        assert!(allocator.source().mapped_bytes() > 200_000);

        allocator.free(Some(p));

        assert_eq!(allocator.num_allocated_blocks(), 0);
        assert_eq!(allocator.source().mapped_bytes(), 0);
    }
}

#[test]
fn growing_into_freed_follower_keeps_address() {
    let mut allocator = allocator();

    unsafe {
        let a = allocator.allocate(300).unwrap();
        let b = allocator.allocate(300).unwrap();

        for i in 0..300 {
            *a.as_ptr().add(i) = (i % 251) as u8;
        }

        allocator.free(Some(b));

        let q = allocator.reallocate(Some(a), 400).unwrap();

        assert_eq!(q, a);
        for i in 0..300 {
            assert_eq!(*q.as_ptr().add(i), (i % 251) as u8);
        }

        allocator.free(Some(q));
    }
}

#[test]
fn growing_between_freed_neighbours_moves_down() {
    let mut allocator = allocator();

    unsafe {
        let a = allocator.allocate(50).unwrap();
        let b = allocator.allocate(50).unwrap();
        let c = allocator.allocate(50).unwrap();

        for i in 0..50 {
            *b.as_ptr().add(i) = 0xaa;
        }

        allocator.free(Some(a));
        allocator.free(Some(c));

        // Growing the boxed-in middle block reuses the freed space around
        // it; the result lands on the lowest absorbed address.
        let q = allocator.reallocate(Some(b), 160).unwrap();

        assert_eq!(q, a);
        for i in 0..50 {
            assert_eq!(*q.as_ptr().add(i), 0xaa);
        }

        allocator.free(Some(q));
    }
}

#[test]
fn rejects_zero_and_oversized_requests() {
    let mut allocator = allocator();

    unsafe {
        assert!(allocator.allocate(0).is_none());
        assert!(allocator.allocate(100_000_001).is_none());
        assert!(allocator.zero_allocate(0, 16).is_none());
        assert!(allocator.reallocate(None, 100_000_001).is_none());

        // None of the rejected requests touched anything.
        assert_eq!(allocator.num_allocated_blocks(), 0);
        assert_eq!(allocator.source().break_size(), 0);
        assert_eq!(allocator.source().mapped_bytes(), 0);

        // The cap itself is still serviceable.
        let p = allocator.allocate(100_000_000).unwrap();
        allocator.free(Some(p));
    }
}

#[test]
fn free_of_null_is_a_noop() {
    let mut allocator = allocator();

    unsafe {
        allocator.free(None);
        assert_eq!(allocator.num_allocated_blocks(), 0);
    }
}

#[test]
fn reallocate_of_null_allocates() {
    let mut allocator = allocator();

    unsafe {
        let p = allocator.reallocate(None, 64).unwrap();

        assert_eq!(allocator.num_allocated_blocks(), 1);
        assert!(allocator.num_allocated_bytes() >= 64);

        allocator.free(Some(p));
    }
}

#[test]
fn mapping_threshold_is_inclusive() {
    let mut allocator = allocator();

    unsafe {
        let p = allocator.allocate(128 * 1024).unwrap();

        // Exactly 128 KiB goes to the kernel, not to the break.
        assert_eq!(allocator.source().break_size(), 0);
        assert!(allocator.source().mapped_bytes() > 0);

        allocator.free(Some(p));
    }
}

#[test]
fn shrinking_reallocation_is_stable() {
    let mut allocator = allocator();

    unsafe {
        let p = allocator.allocate(256).unwrap();

        // Small enough to fit, not small enough to split: same address.
        let q = allocator.reallocate(Some(p), 200).unwrap();
        assert_eq!(q, p);

        let r = allocator.reallocate(Some(q), 256).unwrap();
        assert_eq!(r, p);

        allocator.free(Some(r));
    }
}

#[test]
fn zero_allocation_is_zeroed() {
    let mut allocator = allocator();

    unsafe {
        // Leave dirty memory around, then reuse it.
        let dirty = allocator.allocate(2048).unwrap();
        dirty.as_ptr().write_bytes(0xff, 2048);
        allocator.free(Some(dirty));

        let p = allocator.zero_allocate(64, 32).unwrap();
        for i in 0..64 * 32 {
            assert_eq!(*p.as_ptr().add(i), 0);
        }

        allocator.free(Some(p));
    }
}

#[test]
fn payloads_are_word_aligned() {
    let mut allocator = allocator();
    let word = std::mem::size_of::<usize>();

    unsafe {
        let mut live = Vec::new();

        for size in [1, 3, 8, 13, 100, 1000, 4096, 200_000] {
            let p = allocator.allocate(size).unwrap();
            assert_eq!(p.as_ptr() as usize % word, 0, "size {size} misaligned");
            live.push(p);
        }

        for p in live {
            allocator.free(Some(p));
        }
    }
}

#[test]
fn every_byte_is_payload_or_header() {
    let mut allocator = allocator();

    unsafe {
        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(5000).unwrap();
        let c = allocator.allocate(150_000).unwrap();
        allocator.free(Some(a));

        assert_eq!(
            allocator.num_allocated_bytes() + allocator.num_meta_data_bytes(),
            allocator.source().break_size() + allocator.source().mapped_bytes()
        );
        assert_eq!(
            allocator.num_meta_data_bytes(),
            allocator.num_allocated_blocks() * allocator.size_meta_data()
        );

        allocator.free(Some(b));
        allocator.free(Some(c));
    }
}
