use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::slice;

use memmap2::MmapMut;
use tracing::debug;

use crate::error::Result;

/// A read-write mapping of a freshly created file.
///
/// The file is created at its full size up front and mapped once; mappings
/// are never resized in place (a grow allocates a new `MappedFile`). The
/// mapping is page-aligned, which lets [`as_u64_slice`](Self::as_u64_slice)
/// reinterpret it as a slot-word array.
pub(crate) struct MappedFile {
    path: PathBuf,
    map: MmapMut,
    _file: fs::File,
}

impl MappedFile {
    /// Creates `path` with exactly `size` bytes and maps it read-write.
    ///
    /// Any file already at `path` is truncated. On a mapping failure the
    /// partially created file is removed before the error is returned.
    pub fn create(path: PathBuf, size: usize) -> Result<MappedFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        if let Err(err) = file.set_len(size as u64) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(err.into());
        }

        // Safety: the file was just created and is owned by this process for
        // the lifetime of the mapping; the store is single-threaded.
        let map = match unsafe { MmapMut::map_mut(&file) } {
            Ok(map) => map,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(err.into());
            }
        };

        debug!(path = %path.display(), size, "created mapped file");

        Ok(MappedFile {
            path,
            map,
            _file: file,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Views the mapping as an array of host-endian u64 words.
    pub fn as_u64_slice(&self) -> &[u64] {
        let bytes: &[u8] = &self.map;
        debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
        // Safety: mmap regions are page-aligned, and the length is a
        // multiple of 8 for every file this crate creates.
        unsafe { slice::from_raw_parts(bytes.as_ptr().cast::<u64>(), bytes.len() / 8) }
    }

    /// Mutable counterpart of [`as_u64_slice`](Self::as_u64_slice).
    pub fn as_u64_slice_mut(&mut self) -> &mut [u64] {
        let bytes: &mut [u8] = &mut self.map;
        debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
        unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<u64>(), bytes.len() / 8) }
    }

    /// Unmaps the region and removes the backing file.
    pub fn remove(self) -> Result<()> {
        let MappedFile { path, map, _file } = self;
        drop(map);
        drop(_file);
        debug!(path = %path.display(), "removing mapped file");
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// One backing region of an arena: either plain process memory or a mapped
/// temporary file.
pub(crate) enum Region {
    /// In-memory bytes. Chunk 0 of every arena starts empty and grows;
    /// file-less arenas also use fixed-size `Mem` regions for later chunks.
    Mem(Vec<u8>),
    /// A chunk spilled to disk.
    File(MappedFile),
}

impl Region {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Region::Mem(buf) => buf,
            Region::File(file) => file.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Region::Mem(buf) => buf,
            Region::File(file) => file.as_mut_slice(),
        }
    }

    /// Releases the region; file-backed regions are unmapped and deleted.
    pub fn close(self) -> Result<()> {
        match self {
            Region::Mem(_) => Ok(()),
            Region::File(file) => file.remove(),
        }
    }
}
