use std::hash::BuildHasher;

use foldhash::fast::FixedState;

/// Hash function used to pick a key's home slot.
///
/// The store reduces the returned value modulo its capacity, so functions
/// with good low-bit dispersion work best.
pub type HashFn = fn(&[u8]) -> u32;

/// 32-bit FNV-1a, the default hash for [`RobinStore`](crate::RobinStore).
pub fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Alternative hash built on `foldhash`, truncated to 32 bits.
///
/// Faster than FNV-1a on long keys; pass it through
/// [`StoreOptions::with_hash_fn`](crate::StoreOptions::with_hash_fn) when the
/// exact FNV slot layout does not matter.
pub fn foldhash_32(data: &[u8]) -> u32 {
    FixedState::with_seed(0).hash_one(data) as u32
}
