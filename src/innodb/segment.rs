//! Segment manager (C7): turns a tablespace's raw extent allocator into the
//! allocation policy a B+-tree index actually wants — a handful of individual
//! pages while the index is small, whole extents once it grows.
//!
//! Grounded in [`crate::innodb::index::FsegHeader`], which already parses the
//! two (leaf/internal) FSEG headers embedded in an INDEX page; this module
//! is the write side that decides what those headers should point at.
//!
//! Extent *membership* of a segment is never stored as an in-memory or
//! on-disk linked list here (see DESIGN.md): instead a segment's extents are
//! whichever XDES entries currently carry its `segment_id` and `Fseg` state.
//! That keeps a [`Segment`] handle to four numbers — no back-pointers, no
//! lists to keep consistent with the allocator's own FREE/FREE_FRAG/FULL_FRAG
//! bookkeeping.

use byteorder::{BigEndian, ByteOrder};
use tracing::instrument;

use crate::innodb::constants::*;
use crate::innodb::fsp::ExtentState;
use crate::innodb::tablespace::Tablespace;
use crate::EngineError;

/// One 192-byte INODE entry: a segment's identity plus its fragment-page array.
#[derive(Debug, Clone)]
pub struct InodeEntry {
    pub segment_id: u64,
    /// Number of occupied slots in `frag_array`, scanning from the front.
    pub n_used: u32,
    /// Individual pages allocated before the segment earned a whole extent.
    /// Unused slots hold `FIL_NULL`.
    pub frag_array: [u32; INODE_FRAG_ARR_N_SLOTS],
}

impl InodeEntry {
    fn new(segment_id: u64) -> Self {
        InodeEntry {
            segment_id,
            n_used: 0,
            frag_array: [FIL_NULL; INODE_FRAG_ARR_N_SLOTS],
        }
    }

    fn decode(data: &[u8]) -> Self {
        let segment_id = BigEndian::read_u64(&data[INODE_ENTRY_ID..]);
        let n_used = BigEndian::read_u32(&data[INODE_ENTRY_N_USED..]);
        let mut frag_array = [FIL_NULL; INODE_FRAG_ARR_N_SLOTS];
        for (i, slot) in frag_array.iter_mut().enumerate() {
            let off = INODE_ENTRY_FRAG_ARR + i * INODE_FRAG_SLOT_SIZE;
            *slot = BigEndian::read_u32(&data[off..]);
        }
        InodeEntry { segment_id, n_used, frag_array }
    }

    fn encode(&self, data: &mut [u8]) {
        BigEndian::write_u64(&mut data[INODE_ENTRY_ID..], self.segment_id);
        BigEndian::write_u32(&mut data[INODE_ENTRY_MAGIC..], INODE_MAGIC_N);
        BigEndian::write_u32(&mut data[INODE_ENTRY_N_USED..], self.n_used);
        for (i, &slot) in self.frag_array.iter().enumerate() {
            let off = INODE_ENTRY_FRAG_ARR + i * INODE_FRAG_SLOT_SIZE;
            BigEndian::write_u32(&mut data[off..], slot);
        }
    }

    fn push_frag_page(&mut self, page_no: u32) -> bool {
        if (self.n_used as usize) >= INODE_FRAG_ARR_N_SLOTS {
            return false;
        }
        self.frag_array[self.n_used as usize] = page_no;
        self.n_used += 1;
        true
    }
}

/// Handle to one file segment: a B+-tree's leaf-page chain or its internal
/// (non-leaf) page chain each get their own segment.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub id: u64,
    pub inode_page_no: u32,
    pub inode_index: usize,
}

impl Segment {
    /// Allocate a brand-new, empty segment: a fresh INODE entry with no
    /// pages yet.
    #[instrument(skip(ts))]
    pub fn create(ts: &mut Tablespace) -> Result<Self, EngineError> {
        let id = ts.next_segment_id();
        let (inode_page_no, inode_index) = ts.alloc_inode_entry()?;
        let entry = InodeEntry::new(id);
        Self::write_entry(ts, inode_page_no, inode_index, &entry)?;
        Ok(Segment { id, inode_page_no, inode_index })
    }

    /// Reopen a segment whose INODE entry location is already known (it is
    /// persisted by the owning B+-tree's root page FSEG header).
    pub fn open(ts: &mut Tablespace, inode_page_no: u32, inode_index: usize) -> Result<Self, EngineError> {
        let entry = Self::read_entry(ts, inode_page_no, inode_index)?;
        Ok(Segment { id: entry.segment_id, inode_page_no, inode_index })
    }

    fn entry_offset(inode_index: usize) -> usize {
        INODE_ARR_OFFSET + inode_index * INODE_ENTRY_SIZE
    }

    fn read_entry(ts: &mut Tablespace, inode_page_no: u32, inode_index: usize) -> Result<InodeEntry, EngineError> {
        let page = ts.load_page(inode_page_no)?;
        let off = Self::entry_offset(inode_index);
        Ok(InodeEntry::decode(&page[off..off + INODE_ENTRY_SIZE]))
    }

    fn write_entry(
        ts: &mut Tablespace,
        inode_page_no: u32,
        inode_index: usize,
        entry: &InodeEntry,
    ) -> Result<(), EngineError> {
        let mut page = ts.load_page(inode_page_no)?;
        let off = Self::entry_offset(inode_index);
        entry.encode(&mut page[off..off + INODE_ENTRY_SIZE]);
        ts.flush_page(inode_page_no, page)
    }

    /// Allocate one page for this segment: fills the 32-slot fragment array
    /// first, then starts claiming whole extents once that array is full.
    #[instrument(skip(ts), fields(segment_id = self.id))]
    pub fn allocate_page(&self, ts: &mut Tablespace) -> Result<u32, EngineError> {
        let mut entry = Self::read_entry(ts, self.inode_page_no, self.inode_index)?;

        if (entry.n_used as usize) < INODE_FRAG_ARR_N_SLOTS {
            let page_no = ts.alloc_fragment_page()?;
            entry.push_frag_page(page_no);
            Self::write_entry(ts, self.inode_page_no, self.inode_index, &entry)?;
            return Ok(page_no);
        }

        if let Some(extent_no) = self.extent_with_free_page(ts)? {
            return self.take_page_from_extent(ts, extent_no);
        }

        let extent_no = ts.alloc_extent_for_segment(self.id)?;
        self.take_page_from_extent(ts, extent_no)
    }

    /// Scan the tablespace's known extents for one already owned by this
    /// segment with at least one free page. O(extents); acceptable at the
    /// tablespace sizes this crate targets (a handful of thousand extents).
    fn extent_with_free_page(&self, ts: &mut Tablespace) -> Result<Option<u32>, EngineError> {
        let extent_count = (ts.fsp_header().free_limit / FSP_EXTENT_SIZE).max(1);
        for extent_no in 0..extent_count {
            let xdes = ts.get_xdes(extent_no)?;
            if xdes.segment_id == self.id
                && matches!(xdes.state, ExtentState::Fseg)
                && xdes.first_free().is_some()
            {
                return Ok(Some(extent_no));
            }
        }
        Ok(None)
    }

    fn take_page_from_extent(&self, ts: &mut Tablespace, extent_no: u32) -> Result<u32, EngineError> {
        let xdes = ts.get_xdes(extent_no)?;
        let idx = xdes
            .first_free()
            .ok_or_else(crate::innodb::fsp::extent_exhausted)?;
        ts.mutate_xdes(extent_no, |e| e.allocate(idx))?;
        Ok(crate::innodb::fsp::extent_first_page(extent_no) + idx)
    }

    /// Release a page back to the tablespace. Fragment-array slots are
    /// cleared but left as holes (InnoDB itself does not compact this array
    /// on free; neither do we).
    pub fn free_page(&self, ts: &mut Tablespace, page_no: u32) -> Result<(), EngineError> {
        let mut entry = Self::read_entry(ts, self.inode_page_no, self.inode_index)?;
        let mut in_frag_array = false;
        for slot in entry.frag_array.iter_mut() {
            if *slot == page_no {
                *slot = FIL_NULL;
                in_frag_array = true;
                break;
            }
        }
        if in_frag_array {
            Self::write_entry(ts, self.inode_page_no, self.inode_index, &entry)?;
        }
        ts.free_page(page_no)
    }

    /// Total pages currently owned by this segment (fragment array plus all
    /// non-free pages in owned extents). Used by tests and diagnostics, not
    /// on any hot path.
    pub fn page_count(&self, ts: &mut Tablespace) -> Result<u64, EngineError> {
        let entry = Self::read_entry(ts, self.inode_page_no, self.inode_index)?;
        let mut total = entry.frag_array.iter().filter(|&&p| p != FIL_NULL).count() as u64;

        let extent_count = (ts.fsp_header().free_limit / FSP_EXTENT_SIZE).max(1);
        for extent_no in 0..extent_count {
            let xdes = ts.get_xdes(extent_no)?;
            if xdes.segment_id == self.id && matches!(xdes.state, ExtentState::Fseg) {
                total += (FSP_EXTENT_SIZE - xdes.free_count()) as u64;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::tablespace::TablespaceKind;
    use tempfile::NamedTempFile;

    fn temp_tablespace() -> (NamedTempFile, Tablespace) {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        (tmp, ts)
    }

    #[test]
    fn create_then_open_round_trips() {
        let (_tmp, mut ts) = temp_tablespace();
        let seg = Segment::create(&mut ts).unwrap();
        let reopened = Segment::open(&mut ts, seg.inode_page_no, seg.inode_index).unwrap();
        assert_eq!(reopened.id, seg.id);
    }

    #[test]
    fn first_32_pages_come_from_fragment_array() {
        let (_tmp, mut ts) = temp_tablespace();
        let seg = Segment::create(&mut ts).unwrap();
        let mut pages = Vec::new();
        for _ in 0..INODE_FRAG_ARR_N_SLOTS {
            pages.push(seg.allocate_page(&mut ts).unwrap());
        }
        assert_eq!(pages.len(), INODE_FRAG_ARR_N_SLOTS);
        assert_eq!(seg.page_count(&mut ts).unwrap(), INODE_FRAG_ARR_N_SLOTS as u64);
    }

    #[test]
    fn page_33_comes_from_a_whole_extent() {
        let (_tmp, mut ts) = temp_tablespace();
        let seg = Segment::create(&mut ts).unwrap();
        for _ in 0..INODE_FRAG_ARR_N_SLOTS {
            seg.allocate_page(&mut ts).unwrap();
        }
        let page_33 = seg.allocate_page(&mut ts).unwrap();
        let (extent_no, _) = crate::innodb::fsp::page_to_extent(page_33);
        let xdes = ts.get_xdes(extent_no).unwrap();
        assert_eq!(xdes.segment_id, seg.id);
        assert!(matches!(xdes.state, ExtentState::Fseg));
    }

    #[test]
    fn free_page_returns_it_to_the_allocator() {
        let (_tmp, mut ts) = temp_tablespace();
        let seg = Segment::create(&mut ts).unwrap();
        let page = seg.allocate_page(&mut ts).unwrap();
        seg.free_page(&mut ts, page).unwrap();
        let (extent_no, idx) = crate::innodb::fsp::page_to_extent(page);
        let xdes = ts.get_xdes(extent_no).unwrap();
        assert!(xdes.is_free(idx));
    }
}
