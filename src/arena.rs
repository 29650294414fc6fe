use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::mmap::{MappedFile, Region};

/// Append-only byte arena built from equal-sized chunks.
///
/// Chunk 0 is always an in-memory buffer that grows up to the chunk size.
/// When a `path_prefix` is configured, every later chunk is a memory-mapped
/// temporary file of exactly `chunk_size` bytes named
/// `{prefix}_chunk_{index:09}{suffix}`; with an empty prefix later chunks are
/// fixed-size in-memory buffers instead.
///
/// Offsets returned by [`append`](Self::append) are absolute: the chunk index
/// is `offset / chunk_size` and the position inside it `offset % chunk_size`.
/// A single appended item can therefore never span chunks, and no item may
/// exceed `chunk_size`.
pub struct ChunkArena {
    path_prefix: String,
    file_suffix: String,
    chunk_size: usize,
    chunks: Vec<Region>,
    last_chunk_len: usize,
}

impl ChunkArena {
    /// Creates an empty arena. No chunk is allocated until the first append.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(chunk_size: usize, path_prefix: &str, file_suffix: &str) -> ChunkArena {
        assert!(chunk_size > 0, "chunk size must be positive");
        ChunkArena {
            path_prefix: path_prefix.to_string(),
            file_suffix: file_suffix.to_string(),
            chunk_size,
            chunks: Vec::new(),
            last_chunk_len: 0,
        }
    }

    /// Size of each chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently allocated, including the in-memory chunk 0.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Logical length: every sealed chunk counts as full.
    pub fn len(&self) -> u64 {
        (self.prev_chunk_lens() + self.last_chunk_len) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data`, returning its `(offset, size)`.
    ///
    /// If `data` does not fit into the tail chunk's remaining room, a new
    /// chunk is allocated first and the tail chunk's slack becomes dead
    /// space. Zero-length input returns `(0, 0)` without touching storage.
    ///
    /// # Errors
    ///
    /// [`Error::AppendTooLarge`] when `data` exceeds the chunk size, or
    /// [`Error::Io`] when a spill file cannot be created.
    pub fn append(&mut self, data: &[u8]) -> Result<(u64, u64)> {
        if data.len() > self.chunk_size {
            return Err(Error::AppendTooLarge {
                len: data.len(),
                chunk_size: self.chunk_size,
            });
        }
        if data.is_empty() {
            return Ok((0, 0));
        }

        if self.chunks.is_empty() || self.last_chunk_len + data.len() > self.chunk_size {
            self.add_chunk()?;
        }

        let offset = self.len();
        let start = self.last_chunk_len;
        self.last_chunk_len = start + data.len();

        let tail_index = self.chunks.len() - 1;
        match &mut self.chunks[tail_index] {
            // Chunk 0 grows in place.
            Region::Mem(buf) if tail_index == 0 => buf.extend_from_slice(data),
            region => region.as_mut_slice()[start..start + data.len()].copy_from_slice(data),
        }

        Ok((offset, data.len() as u64))
    }

    /// Returns a view of `size` bytes at `offset`.
    ///
    /// The view borrows the owning chunk; it is invalidated by the next
    /// mutation of the arena.
    pub fn read(&self, offset: u64, size: u64) -> Result<&[u8]> {
        if size == 0 {
            return Ok(&[]);
        }
        if size > self.chunk_size as u64 {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        let chunk_index = (offset / self.chunk_size as u64) as usize;
        if chunk_index >= self.chunks.len() {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        let start = (offset % self.chunk_size as u64) as usize;
        let end = start + size as usize;
        let buf = self.chunks[chunk_index].as_slice();
        if end > buf.len() {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        Ok(&buf[start..end])
    }

    /// Mutable counterpart of [`read`](Self::read), for callers that rewrite
    /// records in place.
    pub fn read_mut(&mut self, offset: u64, size: u64) -> Result<&mut [u8]> {
        if size == 0 {
            return Ok(&mut []);
        }
        if size > self.chunk_size as u64 {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        let chunk_index = (offset / self.chunk_size as u64) as usize;
        if chunk_index >= self.chunks.len() {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        let start = (offset % self.chunk_size as u64) as usize;
        let end = start + size as usize;
        let buf = self.chunks[chunk_index].as_mut_slice();
        if end > buf.len() {
            return Err(Error::ReadOutOfRange { offset, size });
        }

        Ok(&mut buf[start..end])
    }

    /// Shrinks the arena to `new_size` logical bytes.
    ///
    /// A target at or beyond the current length is a no-op. A target inside
    /// the tail chunk (or exactly at its start) shortens the tail. A target
    /// of zero removes every spilled chunk and clears chunk 0. Any other
    /// target lies inside a sealed chunk and is unsupported.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        if new_size >= self.len() {
            return Ok(());
        }

        if new_size == 0 {
            if self.chunks.len() > 1 {
                for chunk in self.chunks.split_off(1) {
                    chunk.close()?;
                }
            }
            if let Some(Region::Mem(buf)) = self.chunks.first_mut() {
                buf.clear();
            }
            self.last_chunk_len = 0;
            return Ok(());
        }

        let prev = self.prev_chunk_lens() as u64;
        if new_size >= prev {
            self.last_chunk_len = (new_size - prev) as usize;
            if self.chunks.len() == 1 {
                if let Some(Region::Mem(buf)) = self.chunks.first_mut() {
                    buf.truncate(self.last_chunk_len);
                }
            }
            return Ok(());
        }

        Err(Error::TruncateUnsupported { target: new_size })
    }

    /// Releases every chunk, removing spilled files. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for chunk in self.chunks.drain(..) {
            if let Err(err) = chunk.close() {
                first_err.get_or_insert(err);
            }
        }
        self.last_chunk_len = 0;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn add_chunk(&mut self) -> Result<()> {
        let region = if self.chunks.is_empty() {
            Region::Mem(Vec::new())
        } else if self.path_prefix.is_empty() {
            Region::Mem(vec![0u8; self.chunk_size])
        } else {
            let path = PathBuf::from(format!(
                "{}_chunk_{:09}{}",
                self.path_prefix,
                self.chunks.len(),
                self.file_suffix
            ));
            debug!(path = %path.display(), chunk_size = self.chunk_size, "spilling new chunk");
            Region::File(MappedFile::create(path, self.chunk_size)?)
        };

        self.chunks.push(region);
        self.last_chunk_len = 0;
        Ok(())
    }

    /// Combined length of all sealed chunks.
    fn prev_chunk_lens(&self) -> usize {
        if self.chunks.len() > 1 {
            (self.chunks.len() - 1) * self.chunk_size
        } else {
            0
        }
    }
}

impl Drop for ChunkArena {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Flat in-memory arena: a growable byte buffer with the same append, read
/// and truncate contract as [`ChunkArena`] but no size ceiling per item.
pub(crate) struct FlatArena {
    bytes: Vec<u8>,
}

impl FlatArena {
    pub fn new() -> FlatArena {
        FlatArena { bytes: Vec::new() }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn append(&mut self, data: &[u8]) -> (u64, u64) {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        (offset, data.len() as u64)
    }

    pub fn read(&self, offset: u64, size: u64) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + size as usize;
        if end > self.bytes.len() {
            return Err(Error::ReadOutOfRange { offset, size });
        }
        Ok(&self.bytes[start..end])
    }

    pub fn truncate(&mut self, new_size: u64) {
        if new_size < self.bytes.len() as u64 {
            self.bytes.truncate(new_size as usize);
        }
    }
}

/// Storage provider for a store's key/value bytes: either the flat in-memory
/// buffer or the chunked, spill-capable arena.
pub(crate) enum Arena {
    Flat(FlatArena),
    Chunked(ChunkArena),
}

impl Arena {
    pub fn len(&self) -> u64 {
        match self {
            Arena::Flat(arena) => arena.len(),
            Arena::Chunked(arena) => arena.len(),
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(u64, u64)> {
        match self {
            Arena::Flat(arena) => Ok(arena.append(data)),
            Arena::Chunked(arena) => arena.append(data),
        }
    }

    pub fn read(&self, offset: u64, size: u64) -> Result<&[u8]> {
        match self {
            Arena::Flat(arena) => arena.read(offset, size),
            Arena::Chunked(arena) => arena.read(offset, size),
        }
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        match self {
            Arena::Flat(arena) => {
                arena.truncate(new_size);
                Ok(())
            }
            Arena::Chunked(arena) => arena.truncate(new_size),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Arena::Flat(arena) => {
                arena.truncate(0);
                Ok(())
            }
            Arena::Chunked(arena) => arena.close(),
        }
    }
}
