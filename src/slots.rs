use std::path::PathBuf;

use crate::error::Result;
use crate::mmap::MappedFile;

/// Maximum encodable key length: the key size field is 25 bits wide.
pub const MAX_KEY_LEN: usize = (1 << 25) - 1;

/// Maximum encodable value length: the value size field is 25 bits wide.
pub const MAX_VAL_LEN: usize = (1 << 25) - 1;

/// Maximum representable probe distance: the distance field is 14 bits wide.
pub const MAX_DISTANCE_LIMIT: u16 = (1 << 14) - 1;

/// Words per slot record.
pub(crate) const SLOT_WORDS: usize = 3;

const KEY_SIZE_MASK: u64 = 0x0000_0000_01FF_FFFF;
const VAL_SIZE_SHIFT: u32 = 25;
const VAL_SIZE_MASK: u64 = 0x0003_FFFF_FE00_0000;
const DISTANCE_SHIFT: u32 = 50;
const DISTANCE_MASK: u64 = 0xFFFC_0000_0000_0000;

/// One decoded slot: two offset words plus a packed word holding
/// `distance:14 | value_size:25 | key_size:25` from the most significant bit
/// down. A record with `key_size == 0` is empty, which is why zero-length
/// keys are rejected at the store boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SlotRecord {
    pub key_offset: u64,
    pub val_offset: u64,
    packed: u64,
}

impl SlotRecord {
    pub fn new(
        key_offset: u64,
        key_size: u64,
        val_offset: u64,
        val_size: u64,
        distance: u64,
    ) -> SlotRecord {
        debug_assert!(key_size <= KEY_SIZE_MASK);
        debug_assert!(val_size <= MAX_VAL_LEN as u64);
        debug_assert!(distance <= MAX_DISTANCE_LIMIT as u64);
        SlotRecord {
            key_offset,
            val_offset,
            packed: (distance << DISTANCE_SHIFT) | (val_size << VAL_SIZE_SHIFT) | key_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_size() == 0
    }

    pub fn key_size(&self) -> u64 {
        self.packed & KEY_SIZE_MASK
    }

    pub fn val_size(&self) -> u64 {
        (self.packed & VAL_SIZE_MASK) >> VAL_SIZE_SHIFT
    }

    pub fn distance(&self) -> u64 {
        (self.packed & DISTANCE_MASK) >> DISTANCE_SHIFT
    }

    pub fn set_distance(&mut self, distance: u64) {
        debug_assert!(distance <= MAX_DISTANCE_LIMIT as u64);
        self.packed = (self.packed & !DISTANCE_MASK) | (distance << DISTANCE_SHIFT);
    }

    /// Rewrites the value offset and size, leaving the key fields alone.
    pub fn set_value(&mut self, val_offset: u64, val_size: u64) {
        debug_assert!(val_size <= MAX_VAL_LEN as u64);
        self.val_offset = val_offset;
        self.packed = (self.packed & !VAL_SIZE_MASK) | (val_size << VAL_SIZE_SHIFT);
    }
}

enum Backing {
    Heap(Vec<u64>),
    Mapped(MappedFile),
}

/// Fixed-capacity array of packed slot records.
///
/// Heap-backed tables live in a plain `Vec<u64>`; mapped tables reinterpret
/// an mmap'ed file of exactly `capacity * 24` bytes as the same word array.
/// The slots file format is a raw host-endian dump of those words.
pub(crate) struct SlotTable {
    backing: Backing,
    capacity: usize,
}

impl SlotTable {
    pub fn in_memory(capacity: usize) -> SlotTable {
        SlotTable {
            backing: Backing::Heap(vec![0u64; capacity * SLOT_WORDS]),
            capacity,
        }
    }

    pub fn mapped(path: PathBuf, capacity: usize) -> Result<SlotTable> {
        let file = MappedFile::create(path, capacity * SLOT_WORDS * 8)?;
        Ok(SlotTable {
            backing: Backing::Mapped(file),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn load(&self, index: usize) -> SlotRecord {
        let words = self.words();
        let at = index * SLOT_WORDS;
        SlotRecord {
            key_offset: words[at],
            val_offset: words[at + 1],
            packed: words[at + 2],
        }
    }

    pub fn store(&mut self, index: usize, record: SlotRecord) {
        let words = self.words_mut();
        let at = index * SLOT_WORDS;
        words[at] = record.key_offset;
        words[at + 1] = record.val_offset;
        words[at + 2] = record.packed;
    }

    pub fn clear_slot(&mut self, index: usize) {
        self.store(index, SlotRecord::default());
    }

    pub fn zero_all(&mut self) {
        self.words_mut().fill(0);
    }

    /// Releases the table; mapped tables remove their slots file.
    pub fn close(&mut self) -> Result<()> {
        self.capacity = 0;
        match std::mem::replace(&mut self.backing, Backing::Heap(Vec::new())) {
            Backing::Heap(_) => Ok(()),
            Backing::Mapped(file) => file.remove(),
        }
    }

    fn words(&self) -> &[u64] {
        match &self.backing {
            Backing::Heap(words) => words,
            Backing::Mapped(file) => file.as_u64_slice(),
        }
    }

    fn words_mut(&mut self) -> &mut [u64] {
        match &mut self.backing {
            Backing::Heap(words) => words,
            Backing::Mapped(file) => file.as_u64_slice_mut(),
        }
    }
}

impl Drop for SlotTable {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
