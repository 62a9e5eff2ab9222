//! General purpose memory allocator built on two kernel primitives: the
//! program break (`sbrk`) for small blocks and anonymous mappings (`mmap`)
//! for large ones. Small blocks live in a doubly linked heap list in address
//! order and, while free, in an array of size-indexed bins that makes reuse
//! cheap. Freed neighbours are coalesced eagerly and oversized blocks are
//! split, so the heap stays as compact as a one-way growing segment can be.
//!
//! The allocator is single threaded by construction: all operations take
//! `&mut self` and the handle holds raw pointers, so the compiler won't let
//! it cross threads. Wrap it yourself if you need sharing.

use std::ptr::NonNull;

mod align;
mod allocator;
mod arena;
mod bins;
mod block;
mod header;
mod list;
mod platform;
mod realloc;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case. `None` doubles as the null sentinel that every fallible operation
/// returns to its caller.
pub type Pointer<T> = Option<NonNull<T>>;

pub use allocator::BinAllocator;
pub use arena::ArenaSource;
pub use platform::{MemorySource, Platform};
