use std::path::PathBuf;

use tracing::debug;

use crate::arena::{Arena, ChunkArena, FlatArena};
use crate::error::{Error, Result};
use crate::hasher::{fnv1a_32, HashFn};
use crate::slots::{SlotRecord, SlotTable, MAX_DISTANCE_LIMIT, MAX_KEY_LEN, MAX_VAL_LEN};
use crate::{DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_FILE_SUFFIX, DEFAULT_MAX_DISTANCE, DEFAULT_START_SIZE};

/// Options for an in-memory [`RobinStore`].
#[derive(Clone, Copy)]
pub struct StoreOptions {
    capacity: usize,
    max_distance: u16,
    growth_factor: f64,
    hash_fn: HashFn,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            capacity: DEFAULT_START_SIZE,
            max_distance: DEFAULT_MAX_DISTANCE,
            growth_factor: 2.0,
            hash_fn: fnv1a_32,
        }
    }
}

impl StoreOptions {
    /// Initial number of slots.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Probe distance that triggers a grow. Values above the 14-bit
    /// representable maximum are clamped to it, which effectively disables
    /// distance-triggered growth.
    pub fn with_max_distance(mut self, max_distance: u32) -> Self {
        self.max_distance = max_distance.min(MAX_DISTANCE_LIMIT as u32) as u16;
        self
    }

    /// Capacity multiplier applied on each grow.
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Overrides the hash function. See [`crate::hasher`].
    pub fn with_hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }
}

/// Options for a spill-capable [`RobinStore`].
#[derive(Clone)]
pub struct SpillOptions {
    start_size: usize,
    max_distance: u16,
    growth_factor: f64,
    hash_fn: HashFn,
    chunk_size_bytes: usize,
    file_suffix: String,
}

impl Default for SpillOptions {
    fn default() -> Self {
        SpillOptions {
            start_size: DEFAULT_START_SIZE,
            max_distance: DEFAULT_MAX_DISTANCE,
            growth_factor: 2.0,
            hash_fn: fnv1a_32,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
        }
    }
}

impl SpillOptions {
    /// Slot count of the initial, in-memory generation-0 table.
    pub fn with_start_size(mut self, start_size: usize) -> Self {
        self.start_size = start_size;
        self
    }

    /// See [`StoreOptions::with_max_distance`].
    pub fn with_max_distance(mut self, max_distance: u32) -> Self {
        self.max_distance = max_distance.min(MAX_DISTANCE_LIMIT as u32) as u16;
        self
    }

    /// See [`StoreOptions::with_growth_factor`].
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// See [`StoreOptions::with_hash_fn`].
    pub fn with_hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Size of each key/value chunk file. No key or value stored through the
    /// spill store can exceed this.
    pub fn with_chunk_size_bytes(mut self, chunk_size_bytes: usize) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    /// Suffix appended to every file the store creates.
    pub fn with_file_suffix(mut self, file_suffix: &str) -> Self {
        self.file_suffix = file_suffix.to_string();
        self
    }
}

struct SpillConfig {
    path_prefix: String,
    file_suffix: String,
}

enum Probe {
    Inserted,
    Updated,
    NeedsGrow(SlotRecord),
}

/// Robin-Hood hashmap from byte-string keys to byte-string values.
///
/// Keys and values live in an append-only arena; each slot holds their
/// offsets plus a packed probe distance. An in-memory store keeps both the
/// slot table and the arena on the heap; a spill store created through
/// [`create_spill`](Self::create_spill) migrates the slot table to mmap'ed
/// files as it grows and spills arena chunks to disk.
///
/// The store is single-threaded and ephemeral: there are no checksums, no
/// durability guarantees, and deleted bytes are only reclaimed by a bulk
/// [`copy_to`](Self::copy_to) or [`reset`](Self::reset).
///
/// Views returned by [`get`](Self::get), [`del`](Self::del) and
/// [`visit`](Self::visit) borrow the arena and are invalidated by the next
/// mutation; the borrow checker enforces this.
///
/// ```
/// use rhstore::{RobinStore, StoreOptions};
///
/// # fn main() -> rhstore::Result<()> {
/// let mut store = RobinStore::create(StoreOptions::default().with_capacity(16));
/// assert!(store.set(b"color", b"teal")?);
/// assert_eq!(store.get(b"color"), Some(&b"teal"[..]));
/// assert!(!store.set(b"color", b"cyan")?);
/// assert_eq!(store.del(b"color")?, Some(&b"cyan"[..]));
/// # Ok(())
/// # }
/// ```
pub struct RobinStore {
    slots: SlotTable,
    arena: Arena,
    capacity: usize,
    count: usize,
    max_distance: u16,
    growth_factor: f64,
    hash_fn: HashFn,
    spill: Option<SpillConfig>,
    generation: u64,
}

impl RobinStore {
    /// Creates an in-memory store. All slots are allocated up front.
    pub fn create(options: StoreOptions) -> RobinStore {
        assert!(options.capacity > 0, "capacity must be positive");
        RobinStore {
            slots: SlotTable::in_memory(options.capacity),
            arena: Arena::Flat(FlatArena::new()),
            capacity: options.capacity,
            count: 0,
            max_distance: options.max_distance,
            growth_factor: options.growth_factor,
            hash_fn: options.hash_fn,
            spill: None,
            generation: 0,
        }
    }

    /// Creates a spill-capable store.
    ///
    /// The generation-0 slot table and chunk 0 of the arena start in memory;
    /// every grow writes the next table to
    /// `{path_prefix}_slots_{generation:09}{suffix}` and arena overflow goes
    /// to `{path_prefix}_chunk_{index:09}{suffix}`. The prefix must not be in
    /// use by another store.
    pub fn create_spill(path_prefix: &str, options: SpillOptions) -> Result<RobinStore> {
        assert!(options.start_size > 0, "start size must be positive");
        assert!(!path_prefix.is_empty(), "path prefix must not be empty");

        let arena = ChunkArena::new(
            options.chunk_size_bytes,
            path_prefix,
            &options.file_suffix,
        );

        Ok(RobinStore {
            slots: SlotTable::in_memory(options.start_size),
            arena: Arena::Chunked(arena),
            capacity: options.start_size,
            count: 0,
            max_distance: options.max_distance,
            growth_factor: options.growth_factor,
            hash_fn: options.hash_fn,
            spill: Some(SpillConfig {
                path_prefix: path_prefix.to_string(),
                file_suffix: options.file_suffix,
            }),
            generation: 0,
        })
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot table generation; 0 until the first grow of a spill store.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Retrieves the value stored under `key`.
    ///
    /// The view is valid until the next mutation. Empty keys are never
    /// present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        if key.is_empty() || self.capacity == 0 {
            return None;
        }

        let mut index = self.home(key);
        let start = index;
        loop {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                return None;
            }
            if self.arena.read(slot.key_offset, slot.key_size()).ok()? == key {
                return self.arena.read(slot.val_offset, slot.val_size()).ok();
            }
            index += 1;
            if index >= self.capacity {
                index = 0;
            }
            if index == start {
                // Went all the way around.
                return None;
            }
        }
    }

    /// Inserts or updates `key`, returning whether the key was newly seen.
    ///
    /// The value is appended to the arena first and the key after it, so
    /// that an update can clip the redundant key bytes back off. Updating a
    /// key leaves its original key bytes canonical; only the value offset is
    /// rewritten.
    ///
    /// When a probe exceeds the configured maximum distance, or wraps all
    /// the way around, the store grows by its growth factor and the pending
    /// item is re-inserted against the new table.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        if value.len() > MAX_VAL_LEN {
            return Err(Error::ValueTooLarge {
                len: value.len(),
                max: MAX_VAL_LEN,
            });
        }

        let (val_offset, val_size) = self.arena.append(value)?;
        let (key_offset, key_size) = self.arena.append(key)?;

        let incoming = SlotRecord::new(key_offset, key_size, val_offset, val_size, 0);
        self.place(incoming, Some(key_offset))
    }

    /// Inserts an item whose key and value bytes are already in the arena.
    ///
    /// Nothing is appended; the slot simply references the given offsets.
    /// This is how a grow rehashes without copying bytes, and how callers
    /// can rebuild a table from [`visit_offsets`](Self::visit_offsets).
    pub fn set_offsets(
        &mut self,
        key_offset: u64,
        key_size: u64,
        val_offset: u64,
        val_size: u64,
    ) -> Result<bool> {
        if key_size == 0 {
            return Err(Error::EmptyKey);
        }
        if key_size > MAX_KEY_LEN as u64 {
            return Err(Error::KeyTooLarge {
                len: key_size as usize,
                max: MAX_KEY_LEN,
            });
        }
        if val_size > MAX_VAL_LEN as u64 {
            return Err(Error::ValueTooLarge {
                len: val_size as usize,
                max: MAX_VAL_LEN,
            });
        }

        let incoming = SlotRecord::new(key_offset, key_size, val_offset, val_size, 0);
        self.place(incoming, None)
    }

    /// Removes `key`, returning the previous value view if it existed.
    ///
    /// Deletion backshifts the following probe chain so lookups never cross
    /// a stale gap. The value bytes stay in the arena until a bulk compact.
    pub fn del(&mut self, key: &[u8]) -> Result<Option<&[u8]>> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.capacity == 0 {
            return Ok(None);
        }

        let mut index = self.home(key);
        let start = index;
        let victim = loop {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                return Ok(None);
            }
            if self.arena.read(slot.key_offset, slot.key_size())? == key {
                break slot;
            }
            index += 1;
            if index >= self.capacity {
                index = 0;
            }
            if index == start {
                return Ok(None);
            }
        };

        // Left-shift succeeding items in the linear chain; each moved item
        // lands one closer to home, so its distance drops by one.
        loop {
            let mut next_index = index + 1;
            if next_index >= self.capacity {
                next_index = 0;
            }
            if next_index == index {
                break;
            }
            let mut follower = self.slots.load(next_index);
            if follower.is_empty() || follower.distance() == 0 {
                break;
            }
            follower.set_distance(follower.distance() - 1);
            self.slots.store(index, follower);
            index = next_index;
        }
        self.slots.clear_slot(index);
        self.count -= 1;

        Ok(Some(self.arena.read(victim.val_offset, victim.val_size())?))
    }

    /// Invokes `callback` on every live entry in slot order; a `false`
    /// return stops the walk early. Slot order is neither insertion order
    /// nor sorted order.
    pub fn visit<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        for index in 0..self.capacity {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                continue;
            }
            let key = self.arena.read(slot.key_offset, slot.key_size())?;
            let value = self.arena.read(slot.val_offset, slot.val_size())?;
            if !callback(key, value) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Like [`visit`](Self::visit) but hands out the raw
    /// `(key_offset, key_size, val_offset, val_size)` of each entry.
    pub fn visit_offsets<F>(&self, mut callback: F)
    where
        F: FnMut(u64, u64, u64, u64) -> bool,
    {
        for index in 0..self.capacity {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                continue;
            }
            if !callback(
                slot.key_offset,
                slot.key_size(),
                slot.val_offset,
                slot.val_size(),
            ) {
                return;
            }
        }
    }

    /// Copies every live entry into `dest` via [`set`](Self::set).
    ///
    /// This is the canonical way to compact out the bytes of deleted and
    /// overwritten values.
    pub fn copy_to(&self, dest: &mut RobinStore) -> Result<()> {
        for index in 0..self.capacity {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                continue;
            }
            let key = self.arena.read(slot.key_offset, slot.key_size())?;
            let value = self.arena.read(slot.val_offset, slot.val_size())?;
            dest.set(key, value)?;
        }
        Ok(())
    }

    /// Clears the store, keeping its capacity and configuration. Spilled
    /// arena chunks are removed; the slot table is zeroed in place.
    pub fn reset(&mut self) -> Result<()> {
        self.slots.zero_all();
        self.arena.truncate(0)?;
        self.count = 0;
        Ok(())
    }

    /// Releases the slot table and arena, removing any files. Idempotent;
    /// using the store afterwards panics.
    pub fn close(&mut self) -> Result<()> {
        self.count = 0;
        self.capacity = 0;
        let slots_result = self.slots.close();
        let arena_result = self.arena.close();
        slots_result?;
        arena_result
    }

    fn home(&self, key: &[u8]) -> usize {
        ((self.hash_fn)(key) as u64 % self.capacity as u64) as usize
    }

    fn place(&mut self, mut incoming: SlotRecord, clip: Option<u64>) -> Result<bool> {
        loop {
            match self.probe(incoming)? {
                Probe::Inserted => {
                    self.count += 1;
                    return Ok(true);
                }
                Probe::Updated => {
                    if let Some(mark) = clip {
                        // Clip off the freshly appended key bytes.
                        self.arena.truncate(mark)?;
                    }
                    return Ok(false);
                }
                Probe::NeedsGrow(pending) => {
                    let next = (self.capacity as f64 * self.growth_factor).round() as usize;
                    self.grow(next.max(self.capacity + 1))?;
                    incoming = pending;
                    incoming.set_distance(0);
                }
            }
        }
    }

    fn probe(&mut self, mut incoming: SlotRecord) -> Result<Probe> {
        let mut index = {
            let key = self.arena.read(incoming.key_offset, incoming.key_size())?;
            ((self.hash_fn)(key) as u64 % self.capacity as u64) as usize
        };
        let start = index;

        loop {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                self.slots.store(index, incoming);
                return Ok(Probe::Inserted);
            }

            let same_key = {
                let slot_key = self.arena.read(slot.key_offset, slot.key_size())?;
                let incoming_key = self.arena.read(incoming.key_offset, incoming.key_size())?;
                slot_key == incoming_key
            };
            if same_key {
                // Keep the resident key bytes canonical; only the value
                // moves. The probe cannot have swapped before a match, so
                // the distances agree.
                let mut updated = slot;
                updated.set_value(incoming.val_offset, incoming.val_size());
                updated.set_distance(incoming.distance());
                self.slots.store(index, updated);
                return Ok(Probe::Updated);
            }

            // Robin-Hood steal: the richer resident yields to the poorer
            // incoming item.
            if slot.distance() < incoming.distance() {
                self.slots.store(index, incoming);
                incoming = slot;
            }

            let next_distance = incoming.distance() + 1;
            index += 1;
            if index >= self.capacity {
                index = 0;
            }
            if next_distance > self.max_distance as u64 || index == start {
                return Ok(Probe::NeedsGrow(incoming));
            }
            incoming.set_distance(next_distance);
        }
    }

    /// Allocates the next slot table and rehashes every live item into it by
    /// offsets. On failure the current table remains usable and the partial
    /// successor is removed.
    fn grow(&mut self, next_capacity: usize) -> Result<()> {
        let mut next = match &self.spill {
            Some(config) => {
                let generation = self.generation + 1;
                let path = PathBuf::from(format!(
                    "{}_slots_{:09}{}",
                    config.path_prefix, generation, config.file_suffix
                ));
                debug!(
                    from = self.capacity,
                    to = next_capacity,
                    generation,
                    "growing slot table"
                );
                match SlotTable::mapped(path, next_capacity) {
                    Ok(table) => table,
                    Err(Error::Io(err)) => return Err(Error::Grow(err)),
                    Err(err) => return Err(err),
                }
            }
            None => {
                debug!(from = self.capacity, to = next_capacity, "growing slot table");
                SlotTable::in_memory(next_capacity)
            }
        };

        // Rehash with the distance cap lifted so copying cannot recurse
        // into another grow.
        for index in 0..self.capacity {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                continue;
            }

            let home = {
                let key = match self.arena.read(slot.key_offset, slot.key_size()) {
                    Ok(key) => key,
                    Err(err) => {
                        let _ = next.close();
                        return Err(err);
                    }
                };
                ((self.hash_fn)(key) as u64 % next_capacity as u64) as usize
            };

            let mut pending = slot;
            pending.set_distance(0);
            let mut at = home;
            loop {
                let existing = next.load(at);
                if existing.is_empty() {
                    next.store(at, pending);
                    break;
                }
                if existing.distance() < pending.distance() {
                    next.store(at, pending);
                    pending = existing;
                }
                let next_distance = pending.distance() + 1;
                if next_distance > MAX_DISTANCE_LIMIT as u64 {
                    let _ = next.close();
                    return Err(Error::grow(std::io::Error::other(
                        "probe distance overflow while rehashing",
                    )));
                }
                pending.set_distance(next_distance);
                at += 1;
                if at >= next_capacity {
                    at = 0;
                }
            }
        }

        let mut old = std::mem::replace(&mut self.slots, next);
        self.capacity = next_capacity;
        if self.spill.is_some() {
            self.generation += 1;
        }
        old.close()
    }
}

impl Drop for RobinStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
impl RobinStore {
    pub(crate) fn slot_key(&self, index: usize) -> Option<Vec<u8>> {
        let slot = self.slots.load(index);
        if slot.is_empty() {
            return None;
        }
        self.arena
            .read(slot.key_offset, slot.key_size())
            .ok()
            .map(|key| key.to_vec())
    }

    pub(crate) fn arena_len(&self) -> u64 {
        self.arena.len()
    }

    /// Asserts the Robin-Hood structural invariants over every slot.
    pub(crate) fn check_invariants(&self) {
        let mut live = 0;
        for index in 0..self.capacity {
            let slot = self.slots.load(index);
            if slot.is_empty() {
                continue;
            }
            live += 1;

            let key = self.arena.read(slot.key_offset, slot.key_size()).unwrap();
            let home = self.home(key);
            assert_eq!(
                (home + slot.distance() as usize) % self.capacity,
                index,
                "home + distance must land on the slot"
            );
            assert!(slot.distance() <= self.max_distance as u64);
            assert!(slot.key_offset + slot.key_size() <= self.arena.len());
            assert!(slot.val_offset + slot.val_size() <= self.arena.len());

            // No gap in any probe chain: a successor may be at most one
            // step poorer than its predecessor.
            let next = (index + 1) % self.capacity;
            if next != index {
                let follower = self.slots.load(next);
                if !follower.is_empty() {
                    assert!(follower.distance() <= slot.distance() + 1);
                }
            }
        }
        assert_eq!(live, self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn check_get(store: &RobinStore, model: &HashMap<Vec<u8>, Vec<u8>>, key: &str) {
        let got = store.get(key.as_bytes());
        let expected = model.get(key.as_bytes());
        assert_eq!(got, expected.map(|v| v.as_slice()), "get {key:?}");
        assert_eq!(store.count(), model.len());
    }

    fn check_copy_to(store: &RobinStore, model: &HashMap<Vec<u8>, Vec<u8>>) {
        let mut dest = RobinStore::create(
            StoreOptions::default()
                .with_capacity(1)
                .with_max_distance(1),
        );
        store.copy_to(&mut dest).unwrap();

        let mut seen = HashMap::new();
        dest.visit(|key, value| {
            seen.insert(key.to_vec(), value.to_vec());
            true
        })
        .unwrap();
        assert_eq!(&seen, model);
    }

    fn do_set(
        store: &mut RobinStore,
        model: &mut HashMap<Vec<u8>, Vec<u8>>,
        key: &str,
        value: &str,
        check_copy: bool,
    ) {
        let was_new = store.set(key.as_bytes(), value.as_bytes()).unwrap();
        let model_was_new = model
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec())
            .is_none();
        assert_eq!(was_new, model_was_new, "set {key:?}");
        assert_eq!(store.count(), model.len());
        store.check_invariants();
        if check_copy {
            check_copy_to(store, model);
        }
    }

    fn do_del(
        store: &mut RobinStore,
        model: &mut HashMap<Vec<u8>, Vec<u8>>,
        key: &str,
        check_copy: bool,
    ) {
        let previous = store.del(key.as_bytes()).unwrap().map(|v| v.to_vec());
        let model_previous = model.remove(key.as_bytes());
        assert_eq!(previous, model_previous, "del {key:?}");
        assert_eq!(store.count(), model.len());
        store.check_invariants();
        if check_copy {
            check_copy_to(store, model);
        }
    }

    /// Scripted workout shared by the sizing tests: misses, updates,
    /// deletes of absent and present keys, then 18 distinct inserts.
    fn exercise(store: &mut RobinStore, check_copy: bool) -> HashMap<Vec<u8>, Vec<u8>> {
        let mut model = HashMap::new();

        check_get(store, &model, "not a key");
        check_get(store, &model, "nothing there");

        do_set(store, &mut model, "a", "A", check_copy);
        check_get(store, &model, "a");
        check_get(store, &model, "b");

        do_set(store, &mut model, "a", "AA", check_copy);
        check_get(store, &model, "a");
        check_get(store, &model, "b");

        do_set(store, &mut model, "b", "B", check_copy);
        check_get(store, &model, "a");
        check_get(store, &model, "b");
        check_get(store, &model, "c");

        do_del(store, &mut model, "a", check_copy);
        check_get(store, &model, "a");
        do_del(store, &mut model, "a", check_copy);
        do_del(store, &mut model, "b", check_copy);
        check_get(store, &model, "b");

        for (key, value) in [
            ("a", "A"),
            ("b", "B"),
            ("c", "C"),
            ("d", "D"),
            ("e", "E"),
            ("f", "F"),
            ("a1", "A1"),
            ("b1", "B1"),
            ("c1", "C1"),
            ("d1", "D1"),
            ("e1", "E1"),
            ("f1", "F1"),
            ("a11", "A11"),
            ("b11", "B11"),
            ("c11", "C11"),
            ("d11", "D11"),
            ("e11", "E11"),
            ("f11", "F11"),
        ] {
            do_set(store, &mut model, key, value, check_copy);
        }

        check_get(store, &model, "a");
        check_get(store, &model, "f11");
        check_get(store, &model, "not a key");

        model
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(1));

        assert_eq!(store.get(b""), None);
        assert!(matches!(store.set(b"", b"nope"), Err(Error::EmptyKey)));
        assert!(matches!(store.del(b""), Err(Error::EmptyKey)));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_size_1() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(1));
        exercise(&mut store, true);
        store.reset().unwrap();
        exercise(&mut store, true);
    }

    #[test]
    fn test_size_2() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(2));
        exercise(&mut store, true);
        store.reset().unwrap();
        exercise(&mut store, true);
    }

    #[test]
    fn test_size_10() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(10));
        exercise(&mut store, true);
        store.reset().unwrap();
        exercise(&mut store, true);
    }

    fn run_size_18_non_growing(store: &mut RobinStore) {
        exercise(store, false);
        assert_eq!(store.count(), 18);
        assert_eq!(store.capacity(), 18);

        store.reset().unwrap();
        assert_eq!(store.count(), 0);
        assert_eq!(store.capacity(), 18);
        assert_eq!(store.arena_len(), 0);
        for index in 0..18 {
            assert!(store.slot_key(index).is_none());
        }

        let mut model = exercise(store, false);
        assert_eq!(store.count(), 18);
        assert_eq!(store.capacity(), 18);

        // The FNV-1a layout is deterministic.
        assert_eq!(store.slot_key(0).as_deref(), Some(&b"f11"[..]));
        assert_eq!(store.slot_key(1).as_deref(), Some(&b"a11"[..]));

        // Deleting f11 backshifts a chain without growing.
        do_del(store, &mut model, "f11", false);
        assert_eq!(store.count(), 17);
        assert_eq!(store.capacity(), 18);

        do_set(store, &mut model, "california", "hi", false);
        check_get(store, &model, "california");
        do_del(store, &mut model, "california", false);
        check_get(store, &model, "california");
        assert_eq!(store.capacity(), 18);

        // Fully loaded, still no grow.
        do_set(store, &mut model, "x", "xxx", false);
        assert_eq!(store.count(), 18);
        assert_eq!(store.capacity(), 18);

        do_del(store, &mut model, "not-there", false);

        // One more key forces a grow.
        do_set(store, &mut model, "y", "yyy", false);
        assert_eq!(store.count(), 19);
        assert_eq!(store.capacity(), 36);
    }

    #[test]
    fn test_size_18_non_growing() {
        let mut store = RobinStore::create(
            StoreOptions::default()
                .with_capacity(18)
                .with_max_distance(100_000),
        );
        run_size_18_non_growing(&mut store);
    }

    #[test]
    fn test_spill_size_18_non_growing() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("store").to_string_lossy().into_owned();
        let mut store = RobinStore::create_spill(
            &prefix,
            SpillOptions::default()
                .with_start_size(18)
                .with_max_distance(100_000),
        )
        .unwrap();
        run_size_18_non_growing(&mut store);
        store.close().unwrap();
    }

    #[test]
    fn test_spill_small_sizes() {
        for start_size in [1, 2, 10, DEFAULT_START_SIZE] {
            let dir = tempfile::tempdir().unwrap();
            let prefix = dir.path().join("store").to_string_lossy().into_owned();
            let mut store = RobinStore::create_spill(
                &prefix,
                SpillOptions::default().with_start_size(start_size),
            )
            .unwrap();
            exercise(&mut store, true);
            store.reset().unwrap();
            exercise(&mut store, true);
            store.close().unwrap();
        }
    }

    #[test]
    fn test_update_clips_appended_key() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(4));

        store.set(b"k", b"v1").unwrap();
        let after_insert = store.arena_len();

        store.set(b"k", b"v2").unwrap();
        // The update appended the new value but clipped the duplicate key.
        assert_eq!(store.arena_len(), after_insert + 2);
        assert_eq!(store.get(b"k"), Some(&b"v2"[..]));
        store.check_invariants();
    }

    #[test]
    fn test_size_limits() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(4));

        let oversized = vec![b'x'; MAX_KEY_LEN + 1];
        assert!(matches!(
            store.set(&oversized, b"v"),
            Err(Error::KeyTooLarge { .. })
        ));
        assert!(matches!(
            store.set(b"k", &oversized),
            Err(Error::ValueTooLarge { .. })
        ));
        assert_eq!(store.count(), 0);

        // A spill store also refuses items wider than one chunk.
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("store").to_string_lossy().into_owned();
        let mut store = RobinStore::create_spill(
            &prefix,
            SpillOptions::default().with_chunk_size_bytes(64),
        )
        .unwrap();
        assert!(matches!(
            store.set(b"k", &[0u8; 65]),
            Err(Error::AppendTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_values() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(4));

        assert!(store.set(b"k", b"").unwrap());
        assert_eq!(store.get(b"k"), Some(&b""[..]));
        assert_eq!(store.del(b"k").unwrap(), Some(&b""[..]));
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn test_visit_stops_early() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(8));
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        store.set(b"c", b"3").unwrap();

        let mut seen = 0;
        store
            .visit(|_, _| {
                seen += 1;
                seen < 2
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_visit_offsets_and_set_offsets() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(8));
        store.set(b"alpha", b"1").unwrap();
        store.set(b"beta", b"22").unwrap();

        let mut offsets = Vec::new();
        store.visit_offsets(|ko, ks, vo, vs| {
            offsets.push((ko, ks, vo, vs));
            true
        });
        assert_eq!(offsets.len(), 2);

        // Re-inserting by offsets updates in place without appending bytes.
        let arena_before = store.arena_len();
        for &(ko, ks, vo, vs) in &offsets {
            assert!(!store.set_offsets(ko, ks, vo, vs).unwrap());
        }
        assert_eq!(store.arena_len(), arena_before);
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(b"alpha"), Some(&b"1"[..]));
        assert_eq!(store.get(b"beta"), Some(&b"22"[..]));

        assert!(matches!(
            store.set_offsets(0, 0, 0, 0),
            Err(Error::EmptyKey)
        ));
    }

    #[test]
    fn test_reset_replay_matches_fresh() {
        let mut replayed = RobinStore::create(StoreOptions::default().with_capacity(18));
        exercise(&mut replayed, false);
        replayed.reset().unwrap();
        exercise(&mut replayed, false);

        let mut fresh = RobinStore::create(StoreOptions::default().with_capacity(18));
        exercise(&mut fresh, false);

        assert_eq!(replayed.capacity(), fresh.capacity());
        for index in 0..fresh.capacity() {
            assert_eq!(replayed.slot_key(index), fresh.slot_key(index));
        }
    }

    #[test]
    fn test_spill_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("groupby").to_string_lossy().into_owned();
        let mut store = RobinStore::create_spill(
            &prefix,
            SpillOptions::default().with_start_size(18),
        )
        .unwrap();

        const N: usize = 100_000;
        for i in 0..N {
            let key = format!("key-{i:06}");
            let value = key.repeat(12);
            assert!(store.set(key.as_bytes(), value.as_bytes()).unwrap());
        }
        assert_eq!(store.count(), N);
        assert!(store.generation() >= 1);

        let mut slot_files = 0;
        let mut chunk_files = 0;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name.contains("_slots_") {
                slot_files += 1;
                let generation: u64 = name
                    .trim_start_matches("groupby_slots_")
                    .trim_end_matches(DEFAULT_FILE_SUFFIX)
                    .parse()
                    .unwrap();
                assert!(generation >= 1);
            }
            if name.contains("_chunk_") {
                chunk_files += 1;
            }
        }
        assert!(slot_files >= 1, "expected a spilled slots file");
        assert!(chunk_files >= 2, "expected at least two chunk files");

        let mut compact = RobinStore::create(StoreOptions::default().with_capacity(1));
        store.copy_to(&mut compact).unwrap();
        assert_eq!(compact.count(), N);

        let mut seen = HashSet::new();
        compact
            .visit(|key, value| {
                let key_str = String::from_utf8(key.to_vec()).unwrap();
                assert_eq!(value, key_str.repeat(12).as_bytes());
                seen.insert(key_str);
                true
            })
            .unwrap();
        assert_eq!(seen.len(), N);

        store.close().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "close must remove every file");
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("store").to_string_lossy().into_owned();
        let mut store =
            RobinStore::create_spill(&prefix, SpillOptions::default().with_start_size(2)).unwrap();

        for i in 0..100u32 {
            store
                .set(format!("k{i}").as_bytes(), &i.to_le_bytes())
                .unwrap();
        }
        assert!(store.generation() >= 1);

        store.close().unwrap();
        store.close().unwrap();
        assert_eq!(store.get(b"k1"), None);
    }

    #[test]
    fn test_randomized_against_model() {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(7));
        let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

        for round in 0..20_000u64 {
            let roll = rand::random::<u64>();
            let key = format!("k{}", roll % 500).into_bytes();
            match roll % 3 {
                0 => {
                    let value = format!("v{round}").into_bytes();
                    let was_new = store.set(&key, &value).unwrap();
                    assert_eq!(was_new, model.insert(key, value).is_none());
                }
                1 => {
                    let previous = store.del(&key).unwrap().map(|v| v.to_vec());
                    assert_eq!(previous, model.remove(&key));
                }
                _ => {
                    assert_eq!(
                        store.get(&key),
                        model.get(&key).map(|v| v.as_slice())
                    );
                }
            }
            assert_eq!(store.count(), model.len());
        }
        store.check_invariants();
    }
}
