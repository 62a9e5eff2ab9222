//! Randomised stress test. Hammers the allocator with a mixed workload of
//! allocations, frees and reallocations, while continuously checking the
//! payload contents of every live block and the accounting identities the
//! diagnostic counters must satisfy.

use binalloc::{ArenaSource, BinAllocator};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// One live allocation: payload address, requested size, fill byte.
struct Live {
    address: std::ptr::NonNull<u8>,
    size: usize,
    fill: u8,
}

unsafe fn paint(live: &Live) {
    live.address.as_ptr().write_bytes(live.fill, live.size);
}

unsafe fn verify(live: &Live) {
    for i in 0..live.size {
        assert_eq!(
            *live.address.as_ptr().add(i),
            live.fill,
            "byte {i} of a {} byte block corrupted",
            live.size
        );
    }
}

fn accounting_holds(allocator: &BinAllocator<ArenaSource>) {
    // Every byte obtained from the source is either payload or header.
    assert_eq!(
        allocator.num_allocated_bytes() + allocator.num_meta_data_bytes(),
        allocator.source().break_size() + allocator.source().mapped_bytes()
    );
    assert!(allocator.num_free_bytes() <= allocator.num_allocated_bytes());
    assert!(allocator.num_free_blocks() <= allocator.num_allocated_blocks());
}

fn run_stress(seed: u64) {
    let mut allocator = BinAllocator::with_source(ArenaSource::with_capacity(256 * 1024 * 1024));
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live: Vec<Live> = Vec::new();

    let operations = if cfg!(miri) { 300 } else { 10_000 };

    unsafe {
        for op in 0..operations {
            let roll = rng.gen_range(0..100);

            if roll < 40 || live.is_empty() {
                // Mostly heap sized, occasionally large enough for a
                // dedicated mapping.
                let size = if rng.gen_bool(0.05) {
                    rng.gen_range(128 * 1024..256 * 1024)
                } else {
                    rng.gen_range(1..4096)
                };

                let fill = rng.gen();
                let address = if rng.gen_bool(0.1) {
                    let address = allocator.zero_allocate(1, size).unwrap();
                    for i in 0..size {
                        assert_eq!(*address.as_ptr().add(i), 0);
                    }
                    address
                } else {
                    allocator.allocate(size).unwrap()
                };

                assert_eq!(address.as_ptr() as usize % std::mem::size_of::<usize>(), 0);

                let block = Live { address, size, fill };
                paint(&block);
                live.push(block);
            } else if roll < 70 {
                let index = rng.gen_range(0..live.len());
                let block = live.swap_remove(index);
                verify(&block);
                allocator.free(Some(block.address));
            } else {
                let index = rng.gen_range(0..live.len());
                let block = &mut live[index];

                let new_size = if rng.gen() && block.size < 200_000 {
                    rng.gen_range(block.size..=(block.size * 2).min(200_000))
                } else {
                    rng.gen_range(1..=block.size)
                };

                let address = allocator.reallocate(Some(block.address), new_size).unwrap();

                // The surviving prefix must be intact, the rest is repainted.
                let surviving = new_size.min(block.size);
                for i in 0..surviving {
                    assert_eq!(*address.as_ptr().add(i), block.fill);
                }

                block.address = address;
                block.size = new_size;
                paint(block);
            }

            if op % 64 == 0 {
                accounting_holds(&allocator);
                for block in &live {
                    verify(block);
                }
            }
        }

        for block in &live {
            verify(block);
        }

        for block in live.drain(..) {
            allocator.free(Some(block.address));
        }

        // Everything is free now: the heap list must have collapsed into a
        // single wilderness block and all mappings must be gone.
        accounting_holds(&allocator);
        assert_eq!(allocator.source().mapped_bytes(), 0);
        assert!(allocator.num_allocated_blocks() <= 1);
        assert_eq!(allocator.num_free_blocks(), allocator.num_allocated_blocks());
    }
}

#[test]
fn stress_mixed_workload() {
    for seed in 0..4 {
        run_stress(seed);
    }
}
