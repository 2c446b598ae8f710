//! Fixed-size, page-granular random-access I/O over one OS file (C2).
//!
//! A `BlockFile` knows nothing about FSP/XDES/INODE semantics — it is the
//! single point where page numbers become byte offsets and `Read`/`Write`
//! calls happen. [`crate::innodb::buffer_pool::BufferPool`] is the only
//! caller that should read or write through it directly; everything above
//! the buffer pool addresses pages by number, never by file offset.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::EngineError;

/// Page-granular file handle. One `BlockFile` per tablespace.
pub struct BlockFile {
    file: File,
    page_size: u32,
}

impl BlockFile {
    /// Create a new file at `path`, pre-allocated to `max_size_pages * page_size`
    /// bytes so that unwritten pages read back as zero-filled (the sparse-file
    /// guarantee this crate's allocator relies on).
    pub fn create(path: impl AsRef<Path>, page_size: u32, max_size_pages: u64) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| EngineError::IoError(format!("cannot create {}: {e}", path.display())))?;
        file.set_len(max_size_pages * page_size as u64)
            .map_err(|e| EngineError::IoError(format!("cannot size {}: {e}", path.display())))?;
        Ok(BlockFile { file, page_size })
    }

    /// Open an existing file for read/write.
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EngineError::IoError(format!("cannot open {}: {e}", path.display())))?;
        Ok(BlockFile { file, page_size })
    }

    /// Page size this file was opened/created with.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Current file length in whole pages.
    pub fn page_count(&self) -> Result<u64, EngineError> {
        let len = self
            .file
            .metadata()
            .map_err(|e| EngineError::IoError(format!("cannot stat file: {e}")))?
            .len();
        Ok(len / self.page_size as u64)
    }

    /// Read exactly one page into a freshly allocated buffer.
    pub fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>, EngineError> {
        let mut buf = vec![0u8; self.page_size as usize];
        let offset = page_no as u64 * self.page_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::IoError(format!("seek to page {page_no}: {e}")))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| EngineError::IoError(format!("read page {page_no}: {e}")))?;
        Ok(buf)
    }

    /// Write exactly one page. `data` must be `page_size` bytes.
    pub fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<(), EngineError> {
        if data.len() != self.page_size as usize {
            return Err(EngineError::IoError(format!(
                "page {page_no} write is {} bytes, expected {}",
                data.len(),
                self.page_size
            )));
        }
        let offset = page_no as u64 * self.page_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::IoError(format!("seek to page {page_no}: {e}")))?;
        self.file
            .write_all(data)
            .map_err(|e| EngineError::IoError(format!("write page {page_no}: {e}")))?;
        Ok(())
    }

    /// Flush OS buffers for this file.
    pub fn sync(&mut self) -> Result<(), EngineError> {
        self.file
            .sync_all()
            .map_err(|e| EngineError::IoError(format!("sync: {e}")))
    }

    /// Grow the file to hold at least `min_pages` pages.
    pub fn ensure_size(&mut self, min_pages: u64) -> Result<(), EngineError> {
        let current = self.page_count()?;
        if current < min_pages {
            self.file
                .set_len(min_pages * self.page_size as u64)
                .map_err(|e| EngineError::IoError(format!("resize: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const PS: u32 = 16384;

    #[test]
    fn create_preallocates_and_zero_fills() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::create(tmp.path(), PS, 4).unwrap();
        assert_eq!(bf.page_count().unwrap(), 4);
        let page = bf.read_page(2).unwrap();
        assert_eq!(page, vec![0u8; PS as usize]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::create(tmp.path(), PS, 2).unwrap();
        let mut page = vec![0u8; PS as usize];
        page[0..4].copy_from_slice(&[1, 2, 3, 4]);
        bf.write_page(1, &page).unwrap();

        let read_back = bf.read_page(1).unwrap();
        assert_eq!(read_back, page);
        let untouched = bf.read_page(0).unwrap();
        assert_eq!(untouched, vec![0u8; PS as usize]);
    }

    #[test]
    fn wrong_size_write_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::create(tmp.path(), PS, 1).unwrap();
        assert!(bf.write_page(0, &[0u8; 10]).is_err());
    }

    #[test]
    fn ensure_size_grows_file() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::create(tmp.path(), PS, 1).unwrap();
        bf.ensure_size(8).unwrap();
        assert_eq!(bf.page_count().unwrap(), 8);
    }
}
