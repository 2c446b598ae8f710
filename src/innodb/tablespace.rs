//! Tablespace (C8): composes the block file, the FSP/XDES extent allocator,
//! and the INODE segment directory into one open file handle.
//!
//! Two constructors produce the same type (spec §9's remediation for the
//! "mixed initialization/load paths" pattern): [`Tablespace::create`] lays
//! out a brand-new file and writes its bootstrap pages; [`Tablespace::open`]
//! reads an existing one. Neither leaves the object in a "not yet
//! initialized" state that later calls must check for.

use std::path::Path;

use byteorder::BigEndian;
use tracing::{debug, instrument, warn};

use crate::innodb::block_file::BlockFile;
use crate::innodb::checksum::recalculate_checksum;
use crate::innodb::constants::*;
use crate::innodb::fsp::{self, ExtentState, XdesEntry};
use crate::innodb::page::{FilHeader, FspHeader};
use crate::innodb::page_types::PageType;
use crate::EngineError;

/// 256 MiB, the default pre-allocated size of a user tablespace (4096 extents).
pub const USER_TABLESPACE_PAGES: u64 = 4096 * FSP_EXTENT_SIZE as u64;

/// Which kind of tablespace this file is. Only affects the bootstrap page
/// layout written by [`Tablespace::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablespaceKind {
    /// space_id 0, `ibdata1` — carries the system catalog's root pages.
    System,
    /// space_id >= 1, one file per user table.
    User,
}

/// An open tablespace file.
pub struct Tablespace {
    file: BlockFile,
    space_id: u32,
    page_size: u32,
    fsp: FspHeader,
    /// Page numbers of all INODE pages allocated so far, in allocation order.
    /// Not persisted as a real on-disk FLST (see DESIGN.md) — rediscovered by
    /// walking from page 2 when a tablespace is reopened.
    inode_pages: Vec<u32>,
}

impl Tablespace {
    /// Lay out a brand-new tablespace file and write its bootstrap pages.
    #[instrument(skip(path))]
    pub fn create(path: impl AsRef<Path>, space_id: u32, kind: TablespaceKind) -> Result<Self, EngineError> {
        let page_size = SIZE_PAGE_DEFAULT;
        let total_pages = USER_TABLESPACE_PAGES;
        let mut file = BlockFile::create(path, page_size, total_pages)?;

        let fsp = FspHeader {
            space_id,
            size: total_pages as u32,
            free_limit: 3,
            flags: 0,
            frag_n_used: 3,
        };

        let mut ts = Tablespace {
            file,
            space_id,
            page_size,
            fsp,
            inode_pages: vec![2],
        };

        ts.write_fsp_hdr_page()?;
        ts.write_ibuf_bitmap_page()?;
        ts.write_empty_inode_page(2)?;

        if kind == TablespaceKind::System {
            for page_no in 3..=17u32 {
                ts.write_placeholder_sys_page(page_no)?;
            }
        }

        debug!(space_id, ?kind, "tablespace created");
        Ok(ts)
    }

    /// Open an existing tablespace file and validate its root page.
    #[instrument(skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let page_size = SIZE_PAGE_DEFAULT;
        let mut file = BlockFile::open(path, page_size)?;
        let page0 = file.read_page(0)?;

        let checksum = crate::innodb::checksum::validate_checksum(&page0, page_size);
        if !checksum.valid {
            return Err(EngineError::PageCorrupted(0));
        }

        let fsp = FspHeader::parse(&page0).ok_or(EngineError::PageCorrupted(0))?;
        let space_id = fsp.space_id;

        let mut ts = Tablespace {
            file,
            space_id,
            page_size,
            fsp,
            inode_pages: Vec::new(),
        };
        ts.discover_inode_pages()?;
        Ok(ts)
    }

    fn discover_inode_pages(&mut self) -> Result<(), EngineError> {
        // Page 2 is always the first INODE page; follow INODE_PAGE_FLST_NODE
        // "next" pointer (stored as a raw page number, see write_empty_inode_page)
        // until FIL_NULL.
        let mut page_no = 2u32;
        loop {
            self.inode_pages.push(page_no);
            let page = self.file.read_page(page_no)?;
            let next = BigEndian::read_u32(&page[INODE_PAGE_FLST_NODE + 4..]);
            if next == FIL_NULL {
                break;
            }
            page_no = next;
        }
        Ok(())
    }

    pub fn space_id(&self) -> u32 {
        self.space_id
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> Result<u64, EngineError> {
        self.file.page_count()
    }

    pub fn fsp_header(&self) -> &FspHeader {
        &self.fsp
    }

    /// Read a page straight off disk, bypassing any cache.
    pub fn load_page(&mut self, page_no: u32) -> Result<Vec<u8>, EngineError> {
        self.file.read_page(page_no)
    }

    /// Write a page straight to disk, recomputing its checksum first.
    pub fn flush_page(&mut self, page_no: u32, mut data: Vec<u8>) -> Result<(), EngineError> {
        recalculate_checksum(&mut data, self.page_size);
        self.file.write_page(page_no, &data)
    }

    fn write_fsp_hdr_page(&mut self) -> Result<(), EngineError> {
        let ps = self.page_size as usize;
        let mut page = vec![0u8; ps];
        let header = FilHeader {
            checksum: 0,
            page_number: 0,
            prev_page: FIL_NULL,
            next_page: FIL_NULL,
            lsn: 0,
            page_type: PageType::FspHdr,
            flush_lsn: 0,
            space_id: self.space_id,
        };
        header.encode(&mut page);
        self.fsp.encode(&mut page);

        // Extent 0 starts life in FREE_FRAG: pages 0 (FSP_HDR), 1 (IBUF_BITMAP),
        // and 2 (first INODE page) are pre-allocated as fragment pages.
        let mut extent0 = XdesEntry::new_free();
        extent0.allocate(0);
        extent0.allocate(1);
        extent0.allocate(2);
        extent0.state = ExtentState::FreeFrag;
        let off = fsp::xdes_entry_offset(0);
        extent0.encode(&mut page[off..off + XDES_ENTRY_SIZE]);

        self.flush_page(0, page)
    }

    fn write_ibuf_bitmap_page(&mut self) -> Result<(), EngineError> {
        let ps = self.page_size as usize;
        let mut page = vec![0u8; ps];
        let header = FilHeader {
            checksum: 0,
            page_number: 1,
            prev_page: FIL_NULL,
            next_page: FIL_NULL,
            lsn: 0,
            page_type: PageType::IbufBitmap,
            flush_lsn: 0,
            space_id: self.space_id,
        };
        header.encode(&mut page);
        self.flush_page(1, page)
    }

    fn write_empty_inode_page(&mut self, page_no: u32) -> Result<(), EngineError> {
        let ps = self.page_size as usize;
        let mut page = vec![0u8; ps];
        let header = FilHeader {
            checksum: 0,
            page_number: page_no,
            prev_page: FIL_NULL,
            next_page: FIL_NULL,
            lsn: 0,
            page_type: PageType::Inode,
            flush_lsn: 0,
            space_id: self.space_id,
        };
        header.encode(&mut page);
        BigEndian::write_u32(&mut page[INODE_PAGE_FLST_NODE..], FIL_NULL);
        BigEndian::write_u32(&mut page[INODE_PAGE_FLST_NODE + 4..], FIL_NULL);
        self.flush_page(page_no, page)
    }

    fn write_placeholder_sys_page(&mut self, page_no: u32) -> Result<(), EngineError> {
        let ps = self.page_size as usize;
        let mut page = vec![0u8; ps];
        let header = FilHeader {
            checksum: 0,
            page_number: page_no,
            prev_page: FIL_NULL,
            next_page: FIL_NULL,
            lsn: 0,
            page_type: PageType::Sys,
            flush_lsn: 0,
            space_id: self.space_id,
        };
        header.encode(&mut page);
        self.flush_page(page_no, page)
    }

    /// Read and decode the XDES entry for `extent_no`.
    pub fn get_xdes(&mut self, extent_no: u32) -> Result<XdesEntry, EngineError> {
        let (page_no, idx) = fsp::locate_extent(extent_no);
        let page = self.load_page(page_no)?;
        let off = fsp::xdes_entry_offset(idx);
        Ok(XdesEntry::decode(&page[off..off + XDES_ENTRY_SIZE]))
    }

    /// Load, mutate, and persist the XDES entry for `extent_no`.
    ///
    /// This is the only sanctioned way to change an extent's state: the
    /// closure never sees a reference back into the page bytes, only a
    /// detached, owned [`XdesEntry`].
    pub fn mutate_xdes<F>(&mut self, extent_no: u32, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut XdesEntry),
    {
        let (page_no, idx) = fsp::locate_extent(extent_no);
        let mut page = self.load_page(page_no)?;
        let off = fsp::xdes_entry_offset(idx);
        let mut entry = XdesEntry::decode(&page[off..off + XDES_ENTRY_SIZE]);
        f(&mut entry);
        entry.encode(&mut page[off..off + XDES_ENTRY_SIZE]);
        self.flush_page(page_no, page)
    }

    fn highest_known_extent(&self) -> u32 {
        (self.fsp.free_limit / FSP_EXTENT_SIZE).max(1)
    }

    /// Find an extent in FREE_FRAG (or FREE, promoting it) with a free page,
    /// allocate one page from it, and return the page number.
    pub fn alloc_fragment_page(&mut self) -> Result<u32, EngineError> {
        let max_extent = self.highest_known_extent();
        for extent_no in 0..max_extent {
            let entry = self.get_xdes(extent_no)?;
            if matches!(entry.state, ExtentState::FreeFrag) && entry.first_free().is_some() {
                return self.take_fragment_page(extent_no);
            }
        }
        // No FREE_FRAG extent with room; promote a FREE extent. A extent
        // beyond extent 0 that has never been claimed is still sparse-file
        // zero bytes on disk, which decodes as state Free but with a
        // bitmap that reads as "every page used" — reinitialize it to a
        // real all-free descriptor before changing its state, or the very
        // first page taken from it would fail with `extent_exhausted`.
        for extent_no in 0..max_extent {
            let entry = self.get_xdes(extent_no)?;
            if matches!(entry.state, ExtentState::Free) {
                self.mutate_xdes(extent_no, |e| {
                    *e = XdesEntry::new_free();
                    e.state = ExtentState::FreeFrag;
                })?;
                return self.take_fragment_page(extent_no);
            }
        }
        self.grow_and_take_fragment_page()
    }

    fn take_fragment_page(&mut self, extent_no: u32) -> Result<u32, EngineError> {
        let entry = self.get_xdes(extent_no)?;
        let idx = entry.first_free().ok_or_else(fsp::extent_exhausted)?;
        let page_no = fsp::extent_first_page(extent_no) + idx;
        let became_full = entry.free_count() == 1;
        self.mutate_xdes(extent_no, |e| {
            e.allocate(idx);
            if became_full {
                e.state = ExtentState::FullFrag;
            }
        })?;
        self.fsp.frag_n_used += 1;
        if page_no >= self.fsp.free_limit {
            self.fsp.free_limit = page_no + 1;
        }
        self.persist_fsp_header()?;
        Ok(page_no)
    }

    fn grow_and_take_fragment_page(&mut self) -> Result<u32, EngineError> {
        let extent_no = self.highest_known_extent();
        let max_pages = self.page_count()?;
        if (fsp::extent_first_page(extent_no) as u64 + FSP_EXTENT_SIZE as u64) > max_pages {
            return Err(fsp::extent_exhausted());
        }
        self.fsp.free_limit = fsp::extent_first_page(extent_no);
        // This extent has never been written, so its on-disk descriptor is
        // still zero bytes (not a real all-free bitmap) — initialize it
        // before flipping its state, same as the promotion path above.
        self.mutate_xdes(extent_no, |e| {
            *e = XdesEntry::new_free();
            e.state = ExtentState::FreeFrag;
        })?;
        self.take_fragment_page(extent_no)
    }

    /// Claim an entire free extent for segment `segment_id`.
    pub fn alloc_extent_for_segment(&mut self, segment_id: u64) -> Result<u32, EngineError> {
        let max_extent = self.highest_known_extent();
        for extent_no in 0..max_extent {
            let entry = self.get_xdes(extent_no)?;
            if matches!(entry.state, ExtentState::Free) {
                // See `alloc_fragment_page`: a never-claimed extent beyond
                // extent 0 is still zero bytes and needs a real all-free
                // bitmap before it becomes FSEG, or the segment's first
                // page allocation out of it would find nothing free.
                self.mutate_xdes(extent_no, |e| {
                    *e = XdesEntry::new_free();
                    e.state = ExtentState::Fseg;
                    e.segment_id = segment_id;
                })?;
                return Ok(extent_no);
            }
        }
        let extent_no = self.highest_known_extent();
        let max_pages = self.page_count()?;
        if (fsp::extent_first_page(extent_no) as u64 + FSP_EXTENT_SIZE as u64) > max_pages {
            return Err(fsp::extent_exhausted());
        }
        self.fsp.free_limit = fsp::extent_first_page(extent_no) + FSP_EXTENT_SIZE;
        self.mutate_xdes(extent_no, |e| {
            *e = XdesEntry::new_free();
            e.state = ExtentState::Fseg;
            e.segment_id = segment_id;
        })?;
        self.persist_fsp_header()?;
        Ok(extent_no)
    }

    /// Free a single page previously allocated as a fragment page or out of
    /// a segment's extent.
    pub fn free_page(&mut self, page_no: u32) -> Result<(), EngineError> {
        let (extent_no, idx) = fsp::page_to_extent(page_no);
        let mut became_free_frag = false;
        self.mutate_xdes(extent_no, |e| {
            e.free(idx);
            if matches!(e.state, ExtentState::FullFrag) {
                e.state = ExtentState::FreeFrag;
                became_free_frag = true;
            }
        })?;
        let _ = became_free_frag;
        if self.fsp.frag_n_used > 0 {
            self.fsp.frag_n_used -= 1;
        }
        self.persist_fsp_header()
    }

    fn persist_fsp_header(&mut self) -> Result<(), EngineError> {
        let mut page = self.load_page(0)?;
        self.fsp.encode(&mut page);
        self.flush_page(0, page)
    }

    /// Allocate a fresh INODE entry, growing the INODE page chain if every
    /// existing page is full. Returns `(inode_page_no, index_in_page)`.
    pub fn alloc_inode_entry(&mut self) -> Result<(u32, usize), EngineError> {
        for &page_no in self.inode_pages.clone().iter() {
            let page = self.load_page(page_no)?;
            for idx in 0..INODE_ENTRIES_PER_PAGE {
                let off = INODE_ARR_OFFSET + idx * INODE_ENTRY_SIZE;
                let magic = BigEndian::read_u32(&page[off + INODE_ENTRY_MAGIC..]);
                if magic != INODE_MAGIC_N {
                    return Ok((page_no, idx));
                }
            }
        }
        let new_page_no = self.alloc_fragment_page()?;
        let last = *self.inode_pages.last().unwrap();
        let mut last_page = self.load_page(last)?;
        BigEndian::write_u32(&mut last_page[INODE_PAGE_FLST_NODE + 4..], new_page_no);
        self.flush_page(last, last_page)?;

        self.write_empty_inode_page(new_page_no)?;
        self.inode_pages.push(new_page_no);
        Ok((new_page_no, 0))
    }

    pub fn next_segment_id(&mut self) -> u64 {
        static_next_seg_id(self)
    }
}

/// Segment ids are handed out from a counter persisted in the FSP header's
/// reserved `FSP_SEG_ID` field (see spec §3: "a monotonically increasing
/// `NEXT_SEG_ID`"). Kept as a free function so `Tablespace::next_segment_id`
/// can borrow `self` mutably just once.
fn static_next_seg_id(ts: &mut Tablespace) -> u64 {
    let page_no = 0u32;
    let mut page = ts.load_page(page_no).unwrap_or_else(|_| vec![0u8; ts.page_size as usize]);
    let offset = FIL_PAGE_DATA + FSP_SEG_ID;
    let current = BigEndian::read_u64(&page[offset..]);
    let next = current + 1;
    BigEndian::write_u64(&mut page[offset..], next);
    if ts.flush_page(page_no, page).is_err() {
        warn!("failed to persist next segment id");
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_tablespace() -> (NamedTempFile, Tablespace) {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        (tmp, ts)
    }

    #[test]
    fn create_then_open_round_trips() {
        let (tmp, _ts) = temp_tablespace();
        let ts2 = Tablespace::open(tmp.path()).unwrap();
        assert_eq!(ts2.space_id(), 1);
        assert_eq!(ts2.page_size(), SIZE_PAGE_DEFAULT);
    }

    #[test]
    fn fragment_pages_come_from_extent_zero_first() {
        let (_tmp, mut ts) = temp_tablespace();
        let p1 = ts.alloc_fragment_page().unwrap();
        let p2 = ts.alloc_fragment_page().unwrap();
        assert!(p1 >= 3 && p1 < 64);
        assert!(p2 >= 3 && p2 < 64);
        assert_ne!(p1, p2);
    }

    #[test]
    fn alloc_extent_for_segment_marks_fseg() {
        let (_tmp, mut ts) = temp_tablespace();
        let extent_no = ts.alloc_extent_for_segment(42).unwrap();
        let entry = ts.get_xdes(extent_no).unwrap();
        assert_eq!(entry.segment_id, 42);
        assert!(matches!(entry.state, ExtentState::Fseg));
    }

    #[test]
    fn next_segment_id_increments() {
        let (_tmp, mut ts) = temp_tablespace();
        let a = ts.next_segment_id();
        let b = ts.next_segment_id();
        assert!(b > a);
    }
}
