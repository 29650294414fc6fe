use crate::arena::ChunkArena;
use crate::error::{Error, Result};
use crate::{DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_FILE_SUFFIX};

/// Options for a [`SpillHeap`].
#[derive(Clone)]
pub struct HeapOptions {
    heap_chunk_size: usize,
    data_chunk_size: usize,
    file_suffix: String,
}

impl Default for HeapOptions {
    fn default() -> Self {
        HeapOptions {
            heap_chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            data_chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
        }
    }
}

impl HeapOptions {
    /// Chunk size of the slot arena; must be a positive multiple of 16.
    pub fn with_heap_chunk_size(mut self, heap_chunk_size: usize) -> Self {
        self.heap_chunk_size = heap_chunk_size;
        self
    }

    /// Chunk size of the data arena; no pushed item may exceed it minus the
    /// 8-byte length prefix.
    pub fn with_data_chunk_size(mut self, data_chunk_size: usize) -> Self {
        self.data_chunk_size = data_chunk_size;
        self
    }

    /// Suffix appended to every spilled chunk file.
    pub fn with_file_suffix(mut self, file_suffix: &str) -> Self {
        self.file_suffix = file_suffix.to_string();
        self
    }
}

struct RecordSpan {
    offset: u64,
    size: u64,
    payload_offset: u64,
    payload_len: u64,
}

/// Min-heap of variable-length byte strings that spills to disk.
///
/// Two chunk arenas back the heap: a slot arena of 16-byte records, each a
/// little-endian `(offset, size)` pair, and a data arena where every item is
/// stored as an 8-byte little-endian length prefix followed by its bytes.
/// Popped records go onto a free list and are recycled first-fit by later
/// pushes.
///
/// Ordering comes from the external comparator handed to
/// [`create`](Self::create). [`push`](Self::push) and [`pop`](Self::pop)
/// run the classical sift-up/sift-down driver internally; a caller that
/// wants to drive the sifting itself uses the raw
/// [`push_bytes`](Self::push_bytes) / [`pop_bytes`](Self::pop_bytes)
/// primitives together with [`len`](Self::len), [`less`](Self::less) and
/// [`swap`](Self::swap), and must not mix the two styles on one heap. The
/// first error the comparator machinery hits is latched and visible through
/// [`error`](Self::error); `less` reports `false` after latching.
pub struct SpillHeap {
    less_fn: Box<dyn Fn(&[u8], &[u8]) -> bool>,
    cur_items: usize,
    max_items: usize,
    slots: ChunkArena,
    data: ChunkArena,
    free: Vec<(u64, u64)>,
    scratch: Vec<u8>,
    err: Option<Error>,
}

impl SpillHeap {
    /// Creates a heap ordered by `less_fn`.
    ///
    /// With an empty `path_prefix` both arenas stay in memory; otherwise the
    /// slot arena spills to `{prefix}_heap_chunk_*` files and the data arena
    /// to `{prefix}_data_chunk_*` files.
    ///
    /// # Panics
    ///
    /// Panics if the heap chunk size is not a positive multiple of 16, or
    /// the data chunk size is zero.
    pub fn create<F>(less_fn: F, path_prefix: &str, options: HeapOptions) -> SpillHeap
    where
        F: Fn(&[u8], &[u8]) -> bool + 'static,
    {
        assert!(
            options.heap_chunk_size > 0 && options.heap_chunk_size % 16 == 0,
            "heap chunk size must be a positive multiple of 16"
        );
        assert!(options.data_chunk_size > 0, "data chunk size must be positive");

        let (slots_prefix, data_prefix) = if path_prefix.is_empty() {
            (String::new(), String::new())
        } else {
            (format!("{path_prefix}_heap"), format!("{path_prefix}_data"))
        };

        SpillHeap {
            less_fn: Box::new(less_fn),
            cur_items: 0,
            max_items: 0,
            slots: ChunkArena::new(options.heap_chunk_size, &slots_prefix, &options.file_suffix),
            data: ChunkArena::new(options.data_chunk_size, &data_prefix, &options.file_suffix),
            free: Vec::new(),
            scratch: Vec::new(),
            err: None,
        }
    }

    /// Number of live items on the heap.
    pub fn len(&self) -> usize {
        self.cur_items
    }

    pub fn is_empty(&self) -> bool {
        self.cur_items == 0
    }

    /// First error latched by any operation since the last reset.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Returns the `i`-th slot's payload. Raw indexed access; no heap
    /// ordering is implied, and after a [`sort`](Self::sort) the sorted run
    /// remains readable here even though the heap itself is drained.
    pub fn get(&mut self, index: usize) -> Result<&[u8]> {
        let span = self.record_span(index)?;
        self.data.read(span.payload_offset, span.payload_len)
    }

    /// Like [`get`](Self::get), also returning the record's holding-area
    /// offset and size in the data arena.
    pub fn get_offset_size(&mut self, index: usize) -> Result<(&[u8], u64, u64)> {
        let span = self.record_span(index)?;
        let payload = self.data.read(span.payload_offset, span.payload_len)?;
        Ok((payload, span.offset, span.size))
    }

    /// Applies the comparator to the payloads at `i` and `j`. Read failures
    /// latch and compare as `false`.
    pub fn less(&mut self, i: usize, j: usize) -> bool {
        let a = match self.record_span(i) {
            Ok(span) => span,
            Err(_) => return false,
        };
        let b = match self.record_span(j) {
            Ok(span) => span,
            Err(_) => return false,
        };
        match (
            self.data.read(a.payload_offset, a.payload_len),
            self.data.read(b.payload_offset, b.payload_len),
        ) {
            (Ok(left), Ok(right)) => (self.less_fn)(left, right),
            _ => false,
        }
    }

    /// Swaps the 16-byte slot records at `i` and `j`; the data bytes stay
    /// put.
    pub fn swap(&mut self, i: usize, j: usize) {
        let a = match self.read_slot(i) {
            Ok(pair) => pair,
            Err(err) => {
                self.latch(err);
                return;
            }
        };
        let b = match self.read_slot(j) {
            Ok(pair) => pair,
            Err(err) => {
                self.latch(err);
                return;
            }
        };
        if let Err(err) = self.write_slot(i, b.0, b.1) {
            self.latch(err);
            return;
        }
        if let Err(err) = self.write_slot(j, a.0, a.1) {
            self.latch(err);
        }
    }

    /// Pushes `item` and restores the heap order by sifting up.
    ///
    /// Equivalent to [`push_bytes`](Self::push_bytes) followed by the
    /// internal sift; use this unless an external driver owns the ordering.
    pub fn push(&mut self, item: &[u8]) -> Result<()> {
        self.push_bytes(item)?;
        self.sift_up(self.cur_items - 1);
        Ok(())
    }

    /// Raw push: appends `item` as the new last slot without any
    /// re-ordering.
    ///
    /// The length-prefixed record is copied into the first free-list span
    /// that fits, or appended to the data arena. Fails when the record
    /// exceeds the data chunk size. Driven alone this makes the heap an
    /// appendable sequence of byte strings; an external classical driver
    /// pairs it with [`len`](Self::len), [`less`](Self::less) and
    /// [`swap`](Self::swap) to establish the order itself.
    pub fn push_bytes(&mut self, item: &[u8]) -> Result<()> {
        if let Err(err) = self.push_record(item) {
            return Err(self.latch(err));
        }
        Ok(())
    }

    /// Pops the minimum item.
    ///
    /// Swaps the root into the last slot, sifts down, then hands the slot to
    /// [`pop_bytes`](Self::pop_bytes). The returned view aliases live
    /// storage: it is recycled by the next push, so callers keeping it must
    /// copy. Returns `None` on an empty heap.
    pub fn pop(&mut self) -> Result<Option<&[u8]>> {
        if self.cur_items == 0 {
            return Ok(None);
        }
        let last = self.cur_items - 1;
        if last > 0 {
            self.swap(0, last);
            self.sift_down(0, last);
        }
        self.pop_bytes()
    }

    /// Raw pop: removes the last slot's record without any re-ordering,
    /// recycling its span onto the free list.
    ///
    /// An external classical driver swaps the minimum into the last slot
    /// and sifts down before calling this; [`pop`](Self::pop) does exactly
    /// that internally. The returned view aliases live storage and is
    /// invalidated by the next mutation.
    pub fn pop_bytes(&mut self) -> Result<Option<&[u8]>> {
        if self.cur_items == 0 {
            return Ok(None);
        }
        let last = self.cur_items - 1;
        let span = self.record_span(last)?;
        self.cur_items = last;
        self.free.push((span.offset, span.size));

        let payload = self.data.read(span.payload_offset, span.payload_len)?;
        Ok(Some(payload))
    }

    /// Sorts the tail of the slot array in place, without touching the data
    /// bytes: items are popped min-first into the slots freed by the
    /// shrinking heap, then the run is flipped so slots `offset..n` read in
    /// non-decreasing order. An `offset` of 0 sorts everything, leaving the
    /// heap drained but the sorted run addressable via [`get`](Self::get).
    pub fn sort(&mut self, offset: usize) -> Result<()> {
        let end = self.cur_items;
        if offset >= end {
            return Ok(());
        }

        let mut index = end;
        while index > offset {
            index -= 1;
            let root = self.read_slot(0).map_err(|err| self.latch(err))?;
            self.pop()?;
            if let Some(err) = &self.err {
                return Err(err.clone());
            }
            // Popped spans must not be recycled or the sorted output would
            // be overwritten.
            self.free.clear();
            self.write_slot(index, root.0, root.1)
                .map_err(|err| self.latch(err))?;
        }

        // The pops land min-first at the top; flip the run into ascending
        // slot order.
        let run = end - offset;
        for step in 0..run / 2 {
            self.swap(offset + step, end - 1 - step);
        }
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Empties the heap: both arenas are truncated, counters, free list and
    /// the latched error are cleared.
    pub fn reset(&mut self) -> Result<()> {
        self.cur_items = 0;
        self.max_items = 0;
        self.slots.truncate(0)?;
        self.data.truncate(0)?;
        self.free.clear();
        self.err = None;
        Ok(())
    }

    /// Releases both arenas, removing any spilled files.
    pub fn close(&mut self) -> Result<()> {
        self.cur_items = 0;
        self.max_items = 0;
        self.free.clear();
        let slots_result = self.slots.close();
        let data_result = self.data.close();
        slots_result?;
        data_result
    }

    fn latch(&mut self, err: Error) -> Error {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
        err
    }

    fn read_slot(&self, index: usize) -> Result<(u64, u64)> {
        let record = self.slots.read(index as u64 * 16, 16)?;
        let offset = u64::from_le_bytes(record[..8].try_into().unwrap());
        let size = u64::from_le_bytes(record[8..].try_into().unwrap());
        Ok((offset, size))
    }

    fn write_slot(&mut self, index: usize, offset: u64, size: u64) -> Result<()> {
        let record = self.slots.read_mut(index as u64 * 16, 16)?;
        record[..8].copy_from_slice(&offset.to_le_bytes());
        record[8..].copy_from_slice(&size.to_le_bytes());
        Ok(())
    }

    fn record_span(&mut self, index: usize) -> Result<RecordSpan> {
        let (offset, size) = match self.read_slot(index) {
            Ok(pair) => pair,
            Err(err) => return Err(self.latch(err)),
        };

        let checked = self.data.read(offset, size).and_then(|record| {
            if record.len() < 8 {
                return Err(Error::ReadOutOfRange { offset, size });
            }
            let payload_len = u64::from_le_bytes(record[..8].try_into().unwrap());
            if payload_len > (record.len() - 8) as u64 {
                return Err(Error::ReadOutOfRange { offset, size });
            }
            Ok(payload_len)
        });

        match checked {
            Ok(payload_len) => Ok(RecordSpan {
                offset,
                size,
                payload_offset: offset + 8,
                payload_len,
            }),
            Err(err) => Err(self.latch(err)),
        }
    }

    fn push_record(&mut self, item: &[u8]) -> Result<()> {
        let record_len = item.len() + 8;
        if record_len > self.data.chunk_size() {
            return Err(Error::AppendTooLarge {
                len: record_len,
                chunk_size: self.data.chunk_size(),
            });
        }

        self.scratch.clear();
        self.scratch
            .extend_from_slice(&(item.len() as u64).to_le_bytes());
        self.scratch.extend_from_slice(item);

        // First-fit over recycled spans. Greedy and can fragment under
        // adversarial size patterns.
        let mut recycled = None;
        for (at, &(offset, size)) in self.free.iter().enumerate() {
            if size >= record_len as u64 {
                recycled = Some((at, offset, size));
                break;
            }
        }

        let (offset, size) = match recycled {
            Some((at, offset, size)) => {
                self.free.swap_remove(at);
                let target = self.data.read_mut(offset, size)?;
                target[..self.scratch.len()].copy_from_slice(&self.scratch);
                (offset, size)
            }
            None => self.data.append(&self.scratch)?,
        };

        if self.cur_items < self.max_items {
            // Reuse the slot freed by an earlier pop.
            self.write_slot(self.cur_items, offset, size)?;
        } else {
            let mut record = [0u8; 16];
            record[..8].copy_from_slice(&offset.to_le_bytes());
            record[8..].copy_from_slice(&size.to_le_bytes());
            self.slots.append(&record)?;
        }

        self.cur_items += 1;
        if self.max_items < self.cur_items {
            self.max_items = self.cur_items;
        }
        Ok(())
    }

    fn sift_up(&mut self, mut child: usize) {
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.less(child, parent) {
                break;
            }
            self.swap(child, parent);
            child = parent;
        }
    }

    fn sift_down(&mut self, start: usize, end: usize) {
        let mut root = start;
        loop {
            let left = 2 * root + 1;
            if left >= end {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < end && self.less(right, left) {
                smallest = right;
            }
            if !self.less(smallest, root) {
                break;
            }
            self.swap(root, smallest);
            root = smallest;
        }
    }
}

#[cfg(test)]
impl SpillHeap {
    pub(crate) fn data_len(&self) -> u64 {
        self.data.len()
    }

    pub(crate) fn data_chunk_count(&self) -> usize {
        self.data.chunk_count()
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }
}
