//! # Page — Memory-Mapped Result Page
//!
//! A page is a fixed-size anonymous temporary file mapped into memory via
//! `mmap`. Records are appended as frames, back to back, starting at byte 0:
//!
//! ```text
//! [0 .. 4)            → payload length (u32, little endian)
//! [4 .. 8)            → CRC32 of the payload (u32, little endian)
//! [8 .. 8 + len)      → payload bytes
//! ```
//!
//! The file is sized once at creation and never resized. It has no name on
//! disk, so it disappears with the last handle.

use std::fs::File;
use std::path::Path;

use crc32fast::Hasher;
use memmap2::MmapMut;

/// Bytes of framing in front of every payload.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Default page size: 1 MiB.
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024;

/// Smallest page that can be created.
pub const MIN_PAGE_SIZE: usize = 64;

pub struct Page {
    /// The mutable memory map over the page file.
    mmap: MmapMut,

    /// Next free byte.
    used: usize,

    /// The backing file (kept open for the lifetime of the page).
    _file: File,
}

impl Page {
    /// Create a page of `size` bytes, backed by an anonymous file in `dir`
    /// (or the system temp directory).
    pub fn create(dir: Option<&Path>, size: usize) -> std::io::Result<Self> {
        if size < MIN_PAGE_SIZE || size > u32::MAX as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("page size {} out of range", size),
            ));
        }

        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.set_len(size as u64)?;

        // SAFETY: The file is anonymous and owned by this page alone; nothing
        // else can map or truncate it while `_file` is alive.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap,
            used: 0,
            _file: file,
        })
    }

    /// Total size of the page in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Bytes still free.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size() - self.used
    }

    /// Largest payload a page of `size` bytes can ever hold.
    #[inline]
    pub const fn max_payload(size: usize) -> usize {
        size.saturating_sub(FRAME_HEADER_SIZE)
    }

    /// Append one frame. Returns the frame offset, or `None` if it does not
    /// fit in the remaining space.
    pub fn append(&mut self, payload: &[u8]) -> Option<usize> {
        let frame_len = FRAME_HEADER_SIZE + payload.len();
        if frame_len > self.remaining() {
            return None;
        }
        let len = u32::try_from(payload.len()).ok()?;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let checksum = hasher.finalize();

        let offset = self.used;
        self.mmap[offset..offset + 4].copy_from_slice(&len.to_le_bytes());
        self.mmap[offset + 4..offset + 8].copy_from_slice(&checksum.to_le_bytes());
        self.mmap[offset + FRAME_HEADER_SIZE..offset + frame_len].copy_from_slice(payload);
        self.used += frame_len;

        Some(offset)
    }

    /// Read the payload of the frame at `offset`.
    ///
    /// Returns `None` if the frame is out of bounds or its checksum does
    /// not match.
    pub fn read_at(&self, offset: usize) -> Option<&[u8]> {
        if offset + FRAME_HEADER_SIZE > self.used {
            return None;
        }
        let len = u32::from_le_bytes(self.mmap[offset..offset + 4].try_into().ok()?) as usize;
        let checksum = u32::from_le_bytes(self.mmap[offset + 4..offset + 8].try_into().ok()?);

        let start = offset + FRAME_HEADER_SIZE;
        if start + len > self.used {
            return None;
        }
        let payload = &self.mmap[start..start + len];

        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return None;
        }
        Some(payload)
    }

    #[cfg(test)]
    fn corrupt_byte(&mut self, at: usize) {
        self.mmap[at] ^= 0xFF;
    }
}
