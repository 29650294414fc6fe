//! Spillable Robin-Hood hashmap and min-heap of byte strings.
//!
//! The `rhstore` crate provides ephemeral, single-threaded stores for bulk
//! processing workloads such as GROUP BY aggregation or external sorting of
//! inputs far larger than RAM. A [`RobinStore`] maps byte-string keys to
//! byte-string values with Robin-Hood open addressing; a [`SpillHeap`] keeps
//! variable-length byte items min-heap ordered under an external comparator.
//! Both transparently migrate their backing storage from anonymous memory to
//! memory-mapped temporary files as they grow, and both hand out borrowed
//! views that stay valid until the next mutation.
//!
//! There is deliberately no durability story: no checksums, no recovery, no
//! versioning. Files exist only to let the OS page cold data out, and they
//! are removed on `close`.
//!
//! ```
//! use rhstore::{RobinStore, StoreOptions};
//!
//! # fn main() -> rhstore::Result<()> {
//! let mut counts = RobinStore::create(StoreOptions::default().with_capacity(64));
//! for word in ["tea", "cake", "tea"] {
//!     let next = match counts.get(word.as_bytes()) {
//!         Some(previous) => u64::from_le_bytes(previous.try_into().unwrap()) + 1,
//!         None => 1,
//!     };
//!     counts.set(word.as_bytes(), &next.to_le_bytes())?;
//! }
//! assert_eq!(counts.get(b"tea"), Some(&2u64.to_le_bytes()[..]));
//! # Ok(())
//! # }
//! ```

/// Default slot count of a fresh store. A prime, to spread poor hashes.
pub const DEFAULT_START_SIZE: usize = 5303;

/// Default size of each arena chunk.
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Default probe distance beyond which a store grows.
pub const DEFAULT_MAX_DISTANCE: u16 = 10;

/// Default suffix for every file a store or heap creates.
pub const DEFAULT_FILE_SUFFIX: &str = ".rhstore";

mod error;
pub use error::{Error, Result};

pub mod hasher;
pub use hasher::{fnv1a_32, foldhash_32, HashFn};

mod mmap;

mod arena;
pub use arena::ChunkArena;

mod slots;
pub use slots::{MAX_DISTANCE_LIMIT, MAX_KEY_LEN, MAX_VAL_LEN};

mod store;
pub use store::{RobinStore, SpillOptions, StoreOptions};

mod heap;
pub use heap::{HeapOptions, SpillHeap};

#[cfg(test)]
mod proptests;
