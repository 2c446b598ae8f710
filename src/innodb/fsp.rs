//! Extent allocator (C6): the FREE / FREE_FRAG / FULL_FRAG / FSEG state
//! machine over a tablespace's XDES entries.
//!
//! Grounded in the FSP/XDES byte layout [`crate::innodb::page::FspHeader`]
//! and [`crate::innodb::constants`] already parse read-only; this module
//! adds the write side the teacher never needed (it only ever inspected
//! tablespaces, never allocated into them).
//!
//! Extents are addressed purely by `(tablespace, extent_no)` — nothing here
//! holds a reference back into the page bytes that describe an extent.
//! Mutation always goes through [`crate::innodb::tablespace::Tablespace::mutate_xdes`],
//! which loads the owning page, hands the closure a decoded [`XdesEntry`],
//! and re-encodes it back into the page on the way out.

use byteorder::{BigEndian, ByteOrder};

use crate::innodb::constants::*;
use crate::EngineError;

/// Extent allocation state (see spec §4.6 for the transition diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentState {
    /// Not yet handed to anything.
    Free,
    /// Some fragment pages allocated out of it, not owned by a segment.
    FreeFrag,
    /// All 64 pages allocated as fragment pages, not owned by a segment.
    FullFrag,
    /// Owned outright by one segment.
    Fseg,
}

impl ExtentState {
    fn from_u32(v: u32) -> Self {
        match v {
            XDES_FREE_FRAG => ExtentState::FreeFrag,
            XDES_FULL_FRAG => ExtentState::FullFrag,
            XDES_FSEG => ExtentState::Fseg,
            _ => ExtentState::Free,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            ExtentState::Free => XDES_FREE,
            ExtentState::FreeFrag => XDES_FREE_FRAG,
            ExtentState::FullFrag => XDES_FULL_FRAG,
            ExtentState::Fseg => XDES_FSEG,
        }
    }
}

/// One extent's on-disk descriptor (40 bytes): owning segment, state, and a
/// 2-bit-per-page bitmap (bit 0 = free, bit 1 = clean). Only the free bit is
/// used by this crate; the clean bit is carried for format fidelity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdesEntry {
    pub segment_id: u64,
    pub state: ExtentState,
    bitmap: [u8; 16],
}

impl XdesEntry {
    /// A brand-new, entirely free extent descriptor.
    pub fn new_free() -> Self {
        XdesEntry {
            segment_id: 0,
            state: ExtentState::Free,
            bitmap: [0xFFu8; 16], // all pages free
        }
    }

    /// Decode one 40-byte XDES entry from `data` (which must start at the entry).
    pub fn decode(data: &[u8]) -> Self {
        let segment_id = BigEndian::read_u64(&data[XDES_ID..]);
        let state = ExtentState::from_u32(BigEndian::read_u32(&data[XDES_STATE..]));
        let mut bitmap = [0u8; 16];
        bitmap.copy_from_slice(&data[XDES_BITMAP..XDES_BITMAP + 16]);
        XdesEntry { segment_id, state, bitmap }
    }

    /// Encode this entry back into its 40-byte slot.
    pub fn encode(&self, data: &mut [u8]) {
        BigEndian::write_u64(&mut data[XDES_ID..], self.segment_id);
        BigEndian::write_u32(&mut data[XDES_STATE..], self.state.as_u32());
        data[XDES_BITMAP..XDES_BITMAP + 16].copy_from_slice(&self.bitmap);
    }

    /// Is page `idx` (0..64 within the extent) free?
    pub fn is_free(&self, idx: u32) -> bool {
        let bit = (idx as usize) * 2;
        let byte = self.bitmap[bit / 8];
        (byte & (1 << (bit % 8))) != 0
    }

    fn set_free(&mut self, idx: u32, free: bool) {
        let bit = (idx as usize) * 2;
        let mask = 1u8 << (bit % 8);
        if free {
            self.bitmap[bit / 8] |= mask;
        } else {
            self.bitmap[bit / 8] &= !mask;
        }
    }

    /// Mark page `idx` used and return true if that fills the extent.
    pub fn allocate(&mut self, idx: u32) {
        self.set_free(idx, false);
    }

    /// Mark page `idx` free.
    pub fn free(&mut self, idx: u32) {
        self.set_free(idx, true);
    }

    /// Count of still-free pages in this extent.
    pub fn free_count(&self) -> u32 {
        (0..FSP_EXTENT_SIZE).filter(|&i| self.is_free(i)).count() as u32
    }

    /// Lowest-numbered free page index, if any.
    pub fn first_free(&self) -> Option<u32> {
        (0..FSP_EXTENT_SIZE).find(|&i| self.is_free(i))
    }
}

/// Byte offset, relative to the start of an FSP_HDR or XDES page, of XDES
/// entry `index_in_page`.
pub fn xdes_entry_offset(index_in_page: usize) -> usize {
    FIL_PAGE_DATA + XDES_ARR_OFFSET + index_in_page * XDES_ENTRY_SIZE
}

/// Which page holds the descriptor for `extent_no`, and at what index within
/// that page's 256-entry array.
pub fn locate_extent(extent_no: u32) -> (u32, usize) {
    let group = extent_no / XDES_ENTRIES_PER_PAGE as u32;
    let index_in_page = (extent_no % XDES_ENTRIES_PER_PAGE as u32) as usize;
    let descriptor_page = group * (XDES_ENTRIES_PER_PAGE as u32) * FSP_EXTENT_SIZE;
    (descriptor_page, index_in_page)
}

/// First page number belonging to extent `extent_no`.
pub fn extent_first_page(extent_no: u32) -> u32 {
    extent_no * FSP_EXTENT_SIZE
}

/// Which extent a page number falls in, and its index (0..64) within that extent.
pub fn page_to_extent(page_no: u32) -> (u32, u32) {
    (page_no / FSP_EXTENT_SIZE, page_no % FSP_EXTENT_SIZE)
}

/// Error raised when an extent operation cannot proceed (e.g. tablespace exhausted).
pub fn extent_exhausted() -> EngineError {
    EngineError::TablespaceFull("tablespace has no free extents".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_extent_is_fully_free() {
        let e = XdesEntry::new_free();
        assert_eq!(e.free_count(), 64);
        assert_eq!(e.first_free(), Some(0));
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let mut e = XdesEntry::new_free();
        e.allocate(3);
        assert!(!e.is_free(3));
        assert_eq!(e.free_count(), 63);
        e.free(3);
        assert!(e.is_free(3));
        assert_eq!(e.free_count(), 64);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut e = XdesEntry::new_free();
        e.allocate(0);
        e.allocate(1);
        e.segment_id = 7;
        e.state = ExtentState::Fseg;
        let mut buf = vec![0u8; XDES_ENTRY_SIZE];
        e.encode(&mut buf);
        let decoded = XdesEntry::decode(&buf);
        assert_eq!(decoded.segment_id, 7);
        assert_eq!(decoded.state, ExtentState::Fseg);
        assert_eq!(decoded.free_count(), 62);
    }

    #[test]
    fn locate_extent_within_first_group() {
        let (page, idx) = locate_extent(5);
        assert_eq!(page, 0);
        assert_eq!(idx, 5);
    }

    #[test]
    fn locate_extent_second_group() {
        let (page, idx) = locate_extent(256);
        assert_eq!(page, 16384);
        assert_eq!(idx, 0);
    }

    #[test]
    fn page_extent_round_trip() {
        let (extent_no, idx) = page_to_extent(130);
        assert_eq!(extent_no, 2);
        assert_eq!(idx, 2);
        assert_eq!(extent_first_page(extent_no) + idx, 130);
    }
}
