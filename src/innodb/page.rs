//! InnoDB page header and trailer parsing.
//!
//! Every InnoDB page begins with a 38-byte FIL header ([`FilHeader`]) containing
//! the checksum, page number, prev/next pointers, LSN, page type, flush LSN, and
//! space ID. The last 8 bytes form the FIL trailer ([`FilTrailer`]) with the
//! old-style checksum and low 32 bits of the LSN.
//!
//! Page 0 of every tablespace also contains the FSP header ([`FspHeader`]) at
//! byte offset 38, which stores the space ID, tablespace size, and feature flags
//! (page size, compression, encryption).

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::innodb::constants::*;
use crate::innodb::fsp::XdesEntry;
use crate::innodb::index::IndexHeader;
use crate::innodb::page_types::PageType;
use crate::EngineError;

/// Parsed FIL header (38 bytes, present at the start of every InnoDB page).
#[derive(Debug, Clone, Serialize)]
pub struct FilHeader {
    /// Checksum (or space id in older formats). Bytes 0-3.
    pub checksum: u32,
    /// Page number within the tablespace. Bytes 4-7.
    pub page_number: u32,
    /// Previous page in the doubly-linked list. Bytes 8-11.
    /// FIL_NULL (0xFFFFFFFF) if not used.
    pub prev_page: u32,
    /// Next page in the doubly-linked list. Bytes 12-15.
    /// FIL_NULL (0xFFFFFFFF) if not used.
    pub next_page: u32,
    /// LSN of newest modification to this page. Bytes 16-23.
    pub lsn: u64,
    /// Page type. Bytes 24-25.
    pub page_type: PageType,
    /// Flush LSN (only meaningful for page 0 of system tablespace). Bytes 26-33.
    pub flush_lsn: u64,
    /// Space ID this page belongs to. Bytes 34-37.
    pub space_id: u32,
}

impl FilHeader {
    /// Parse a FIL header from a byte slice.
    ///
    /// The slice must be at least SIZE_FIL_HEAD (38) bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SIZE_FIL_HEAD {
            return None;
        }

        Some(FilHeader {
            checksum: BigEndian::read_u32(&data[FIL_PAGE_SPACE_OR_CHKSUM..]),
            page_number: BigEndian::read_u32(&data[FIL_PAGE_OFFSET..]),
            prev_page: BigEndian::read_u32(&data[FIL_PAGE_PREV..]),
            next_page: BigEndian::read_u32(&data[FIL_PAGE_NEXT..]),
            lsn: BigEndian::read_u64(&data[FIL_PAGE_LSN..]),
            page_type: PageType::from_u16(BigEndian::read_u16(&data[FIL_PAGE_TYPE..])),
            flush_lsn: BigEndian::read_u64(&data[FIL_PAGE_FILE_FLUSH_LSN..]),
            space_id: BigEndian::read_u32(&data[FIL_PAGE_SPACE_ID..]),
        })
    }

    /// Returns true if prev_page is FIL_NULL (not used).
    pub fn has_prev(&self) -> bool {
        self.prev_page != FIL_NULL && self.prev_page != 0
    }

    /// Returns true if next_page is FIL_NULL (not used).
    pub fn has_next(&self) -> bool {
        self.next_page != FIL_NULL && self.next_page != 0
    }

    /// Write this header into the first `SIZE_FIL_HEAD` bytes of `page`.
    ///
    /// The checksum field is written as given; callers that want a correct
    /// checksum should call [`crate::innodb::checksum::recalculate_checksum`]
    /// afterward, once the page body has also been written.
    pub fn encode(&self, page: &mut [u8]) {
        debug_assert!(page.len() >= SIZE_FIL_HEAD);
        BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_OR_CHKSUM..], self.checksum);
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], self.page_number);
        BigEndian::write_u32(&mut page[FIL_PAGE_PREV..], self.prev_page);
        BigEndian::write_u32(&mut page[FIL_PAGE_NEXT..], self.next_page);
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], self.lsn);
        BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], self.page_type.as_u16());
        BigEndian::write_u64(&mut page[FIL_PAGE_FILE_FLUSH_LSN..], self.flush_lsn);
        BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_ID..], self.space_id);
    }
}

/// Parsed FIL trailer (8 bytes, present at the end of every InnoDB page).
#[derive(Debug, Clone, Serialize)]
pub struct FilTrailer {
    /// Old-style checksum (or low 32 bits of LSN, depending on version). Bytes 0-3 of trailer.
    pub checksum: u32,
    /// Low 32 bits of the LSN. Bytes 4-7 of trailer.
    pub lsn_low32: u32,
}

impl FilTrailer {
    /// Parse a FIL trailer from a byte slice.
    ///
    /// The slice should be the last 8 bytes of the page, or at least 8 bytes
    /// starting from the trailer position.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SIZE_FIL_TRAILER {
            return None;
        }

        Some(FilTrailer {
            checksum: BigEndian::read_u32(&data[0..]),
            lsn_low32: BigEndian::read_u32(&data[4..]),
        })
    }

    /// Write this trailer into an 8-byte slice (normally the last 8 bytes of a page).
    pub fn encode(&self, data: &mut [u8]) {
        debug_assert!(data.len() >= SIZE_FIL_TRAILER);
        BigEndian::write_u32(&mut data[0..], self.checksum);
        BigEndian::write_u32(&mut data[4..], self.lsn_low32);
    }
}

/// Parsed FSP header (from page 0 of a tablespace, starts at FIL_PAGE_DATA).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FspHeader {
    /// Space ID.
    pub space_id: u32,
    /// Size of the tablespace in pages.
    pub size: u32,
    /// Minimum page number not yet initialized.
    pub free_limit: u32,
    /// Space flags (contains page size, compression, encryption info).
    pub flags: u32,
    /// Number of used pages in the FSP_FREE_FRAG list.
    pub frag_n_used: u32,
}

impl FspHeader {
    /// Parse the FSP header from page 0's data area.
    ///
    /// `data` should be the full page buffer. FSP header starts at FIL_PAGE_DATA (byte 38).
    pub fn parse(page_data: &[u8]) -> Option<Self> {
        let offset = FIL_PAGE_DATA;
        if page_data.len() < offset + FSP_HEADER_SIZE {
            return None;
        }
        let data = &page_data[offset..];

        Some(FspHeader {
            space_id: BigEndian::read_u32(&data[FSP_SPACE_ID..]),
            size: BigEndian::read_u32(&data[FSP_SIZE..]),
            free_limit: BigEndian::read_u32(&data[FSP_FREE_LIMIT..]),
            flags: BigEndian::read_u32(&data[FSP_SPACE_FLAGS..]),
            frag_n_used: BigEndian::read_u32(&data[FSP_FRAG_N_USED..]),
        })
    }

    /// Extract the page size from FSP flags.
    ///
    /// Returns the page size in bytes, or None if the flags indicate the default (16K).
    pub fn page_size_from_flags(&self) -> u32 {
        let ssize = (self.flags & FSP_FLAGS_MASK_PAGE_SSIZE) >> FSP_FLAGS_POS_PAGE_SSIZE;
        if ssize == 0 {
            // Default/uncompressed: 16K
            SIZE_PAGE_DEFAULT
        } else {
            // ssize encodes page size as: 512 << ssize for values 1-7
            // In practice: ssize=3 => 4K, ssize=4 => 8K, ssize=5 => 16K, etc.
            // MySQL source: page_size = (512 << ssize) for ssize 1-7
            // But there's a special case: if ssize >= 1, page_size = 1 << (ssize + 9)
            // ssize=1 => 1024, ssize=2 => 2048, ssize=3 => 4096, ssize=4 => 8192,
            // ssize=5 => 16384, ssize=6 => 32768, ssize=7 => 65536
            1u32 << (ssize + 9)
        }
    }

    /// Write this FSP header into the data area of page 0 (starting at `FIL_PAGE_DATA`).
    ///
    /// Only the fixed fields are written; the FLST base nodes and XDES entry
    /// array that occupy the rest of the header-sized region are owned by
    /// [`crate::innodb::fsp`] and written separately.
    pub fn encode(&self, page: &mut [u8]) {
        let offset = FIL_PAGE_DATA;
        debug_assert!(page.len() >= offset + FSP_HEADER_SIZE);
        let data = &mut page[offset..];
        BigEndian::write_u32(&mut data[FSP_SPACE_ID..], self.space_id);
        BigEndian::write_u32(&mut data[FSP_SIZE..], self.size);
        BigEndian::write_u32(&mut data[FSP_FREE_LIMIT..], self.free_limit);
        BigEndian::write_u32(&mut data[FSP_SPACE_FLAGS..], self.flags);
        BigEndian::write_u32(&mut data[FSP_FRAG_N_USED..], self.frag_n_used);
    }
}

/// Minimal view of one INODE entry: enough to tell an occupied slot from a
/// free one without pulling in [`crate::innodb::segment::InodeEntry`]'s full
/// fragment array, which only a live [`crate::innodb::segment::Segment`]
/// handle (not a one-off page dump) has any use for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InodeSlotSummary {
    pub segment_id: u64,
    pub n_used: u32,
}

/// One decoded page, discriminated by its on-disk [`PageType`] rather than
/// making every caller inspect the FIL header's type field itself. Each
/// variant wraps the same per-structure codec this module (or a sibling
/// module) already exposes on its own — `Page::decode` is just the single
/// dispatch point a generic page-dumping caller wants; code that already
/// knows it is holding an INDEX page (the B+-tree, the buffer pool) keeps
/// going straight to [`FilHeader`]/[`IndexHeader`] without going through here.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    FspHdr(FspHeader),
    Xdes(Vec<XdesEntry>),
    Inode(Vec<InodeSlotSummary>),
    Index(IndexHeader),
    /// A recognized-but-uninterpreted type (ALLOCATED, SYS, IBUF_BITMAP,
    /// UNDO_LOG), or a raw value this crate doesn't assign a codec to.
    Other(PageType),
}

impl Page {
    /// The FIL header alone, with no further interpretation of the page body.
    pub fn header(data: &[u8]) -> Result<FilHeader, EngineError> {
        FilHeader::parse(data).ok_or(EngineError::PageCorrupted(0))
    }

    /// Parse the FIL header and decode the page body according to its type.
    /// If `expected` is given and the on-disk type doesn't match, this is a
    /// [`EngineError::PageCorrupted`] rather than a silently wrong variant.
    pub fn decode(data: &[u8], expected: Option<PageType>) -> Result<Self, EngineError> {
        let fil = Self::header(data)?;
        if let Some(want) = expected {
            if fil.page_type != want {
                return Err(EngineError::PageCorrupted(fil.page_number));
            }
        }

        Ok(match fil.page_type {
            PageType::FspHdr => {
                Page::FspHdr(FspHeader::parse(data).ok_or(EngineError::PageCorrupted(fil.page_number))?)
            }
            PageType::Xdes => Page::Xdes(decode_xdes_array(data)),
            PageType::Inode => Page::Inode(decode_inode_array(data)),
            PageType::Index => {
                Page::Index(IndexHeader::parse(data).ok_or(EngineError::PageCorrupted(fil.page_number))?)
            }
            other => Page::Other(other),
        })
    }

    /// The [`PageType`] this variant would write into the FIL header.
    fn page_type(&self) -> PageType {
        match self {
            Page::FspHdr(_) => PageType::FspHdr,
            Page::Xdes(_) => PageType::Xdes,
            Page::Inode(_) => PageType::Inode,
            Page::Index(_) => PageType::Index,
            Page::Other(pt) => *pt,
        }
    }

    /// Write this page's body (and its FIL header's type field) into `page`.
    /// Inverse of [`Page::decode`]: `Page::decode(&buf, None) == Ok(p)` holds
    /// after `p.encode(&mut buf)`, for any `p` this type can represent.
    ///
    /// Does not touch the rest of the FIL header (checksum, LSN, prev/next,
    /// space id) or the FIL trailer — callers needing those set them via
    /// [`FilHeader::encode`] and [`crate::innodb::checksum::recalculate_checksum`].
    pub fn encode(&self, page: &mut [u8]) {
        debug_assert!(page.len() >= SIZE_FIL_HEAD);
        BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], self.page_type().as_u16());
        match self {
            Page::FspHdr(fsp) => fsp.encode(page),
            Page::Xdes(entries) => encode_xdes_array(page, entries),
            Page::Inode(slots) => encode_inode_array(page, slots),
            Page::Index(hdr) => hdr.encode(page),
            Page::Other(_) => {}
        }
    }
}

/// Decode every XDES entry this page carries. Valid on page 0 (FSP_HDR, which
/// embeds the first 256-entry array alongside the FSP header) as well as on a
/// dedicated XDES page, since both lay the array out at the same
/// [`crate::innodb::fsp::xdes_entry_offset`].
fn decode_xdes_array(data: &[u8]) -> Vec<XdesEntry> {
    (0..XDES_ENTRIES_PER_PAGE)
        .map(|i| {
            let off = crate::innodb::fsp::xdes_entry_offset(i);
            XdesEntry::decode(&data[off..off + XDES_ENTRY_SIZE])
        })
        .collect()
}

/// Decode every INODE slot on this page. A segment_id of 0 marks a slot that
/// has never been written to (InnoDB reserves id 0 for "no segment").
fn decode_inode_array(data: &[u8]) -> Vec<InodeSlotSummary> {
    (0..INODE_ENTRIES_PER_PAGE)
        .map(|i| {
            let off = INODE_ARR_OFFSET + i * INODE_ENTRY_SIZE;
            InodeSlotSummary {
                segment_id: BigEndian::read_u64(&data[off + INODE_ENTRY_ID..]),
                n_used: BigEndian::read_u32(&data[off + INODE_ENTRY_N_USED..]),
            }
        })
        .collect()
}

/// Inverse of [`decode_xdes_array`]. `entries` must have
/// [`XDES_ENTRIES_PER_PAGE`] elements (as produced by `decode_xdes_array`).
fn encode_xdes_array(data: &mut [u8], entries: &[XdesEntry]) {
    for (i, entry) in entries.iter().enumerate().take(XDES_ENTRIES_PER_PAGE) {
        let off = crate::innodb::fsp::xdes_entry_offset(i);
        entry.encode(&mut data[off..off + XDES_ENTRY_SIZE]);
    }
}

/// Inverse of [`decode_inode_array`]. Only writes the two fields
/// [`InodeSlotSummary`] models (segment_id, n_used); a page written this way
/// is not a valid INODE page on its own; see [`crate::innodb::segment::InodeEntry`]
/// for the full entry codec a live segment actually writes.
fn encode_inode_array(data: &mut [u8], slots: &[InodeSlotSummary]) {
    for (i, slot) in slots.iter().enumerate().take(INODE_ENTRIES_PER_PAGE) {
        let off = INODE_ARR_OFFSET + i * INODE_ENTRY_SIZE;
        BigEndian::write_u64(&mut data[off + INODE_ENTRY_ID..], slot.segment_id);
        BigEndian::write_u32(&mut data[off + INODE_ENTRY_N_USED..], slot.n_used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fil_header_bytes(
        checksum: u32,
        page_num: u32,
        prev: u32,
        next: u32,
        lsn: u64,
        page_type: u16,
        flush_lsn: u64,
        space_id: u32,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; SIZE_FIL_HEAD];
        BigEndian::write_u32(&mut buf[FIL_PAGE_SPACE_OR_CHKSUM..], checksum);
        BigEndian::write_u32(&mut buf[FIL_PAGE_OFFSET..], page_num);
        BigEndian::write_u32(&mut buf[FIL_PAGE_PREV..], prev);
        BigEndian::write_u32(&mut buf[FIL_PAGE_NEXT..], next);
        BigEndian::write_u64(&mut buf[FIL_PAGE_LSN..], lsn);
        BigEndian::write_u16(&mut buf[FIL_PAGE_TYPE..], page_type);
        BigEndian::write_u64(&mut buf[FIL_PAGE_FILE_FLUSH_LSN..], flush_lsn);
        BigEndian::write_u32(&mut buf[FIL_PAGE_SPACE_ID..], space_id);
        buf
    }

    #[test]
    fn test_fil_header_parse() {
        let data = make_fil_header_bytes(
            0x12345678, // checksum
            42,         // page number
            41,         // prev page
            43,         // next page
            1000,       // lsn
            17855,      // INDEX page type
            2000,       // flush lsn
            5,          // space id
        );
        let hdr = FilHeader::parse(&data).unwrap();
        assert_eq!(hdr.checksum, 0x12345678);
        assert_eq!(hdr.page_number, 42);
        assert_eq!(hdr.prev_page, 41);
        assert_eq!(hdr.next_page, 43);
        assert_eq!(hdr.lsn, 1000);
        assert_eq!(hdr.page_type, PageType::Index);
        assert_eq!(hdr.flush_lsn, 2000);
        assert_eq!(hdr.space_id, 5);
        assert!(hdr.has_prev());
        assert!(hdr.has_next());
    }

    #[test]
    fn test_fil_header_null_pages() {
        let data = make_fil_header_bytes(0, 0, FIL_NULL, FIL_NULL, 0, 0, 0, 0);
        let hdr = FilHeader::parse(&data).unwrap();
        assert!(!hdr.has_prev());
        assert!(!hdr.has_next());
    }

    #[test]
    fn test_fil_header_too_short() {
        let data = vec![0u8; 10];
        assert!(FilHeader::parse(&data).is_none());
    }

    #[test]
    fn test_fil_trailer_parse() {
        let mut data = vec![0u8; 8];
        BigEndian::write_u32(&mut data[0..], 0xAABBCCDD);
        BigEndian::write_u32(&mut data[4..], 0x11223344);
        let trl = FilTrailer::parse(&data).unwrap();
        assert_eq!(trl.checksum, 0xAABBCCDD);
        assert_eq!(trl.lsn_low32, 0x11223344);
    }

    /// Pad `header` (as produced by `make_fil_header_bytes`) out to a full
    /// page, so offset-based body decoders (FSP header, XDES array, INODE
    /// array, INDEX header) have somewhere to read from.
    fn full_page(header: &[u8]) -> Vec<u8> {
        let mut page = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        page[..header.len()].copy_from_slice(header);
        page
    }

    #[test]
    fn decode_dispatches_on_page_type() {
        let header = make_fil_header_bytes(0, 7, FIL_NULL, FIL_NULL, 100, 17855, 0, 1);
        let page = full_page(&header);
        match Page::decode(&page, None).unwrap() {
            Page::Index(hdr) => assert_eq!(hdr.index_id, 0),
            other => panic!("expected Page::Index, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_type_mismatch() {
        let header = make_fil_header_bytes(0, 7, FIL_NULL, FIL_NULL, 100, 17855, 0, 1);
        let page = full_page(&header);
        let err = Page::decode(&page, Some(PageType::FspHdr)).unwrap_err();
        assert!(matches!(err, EngineError::PageCorrupted(7)));
    }

    #[test]
    fn decode_xdes_page_lists_every_entry() {
        let header = make_fil_header_bytes(0, 1, FIL_NULL, FIL_NULL, 0, 17855 /* overwritten below */, 0, 1);
        let mut page = full_page(&header);
        BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], 9); // XDES
        match Page::decode(&page, None).unwrap() {
            Page::Xdes(entries) => assert_eq!(entries.len(), XDES_ENTRIES_PER_PAGE),
            other => panic!("expected Page::Xdes, got {other:?}"),
        }
    }

    #[test]
    fn decode_inode_page_lists_every_slot() {
        let header = make_fil_header_bytes(0, 1, FIL_NULL, FIL_NULL, 0, 0, 0, 1);
        let mut page = full_page(&header);
        BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], 3); // INODE
        BigEndian::write_u64(
            &mut page[INODE_ARR_OFFSET + INODE_ENTRY_ID..],
            99,
        );
        match Page::decode(&page, None).unwrap() {
            Page::Inode(slots) => {
                assert_eq!(slots.len(), INODE_ENTRIES_PER_PAGE);
                assert_eq!(slots[0].segment_id, 99);
            }
            other => panic!("expected Page::Inode, got {other:?}"),
        }
    }

    #[test]
    fn encode_then_decode_round_trips_fsp_hdr() {
        let page = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        let want = Page::FspHdr(FspHeader {
            space_id: 3,
            size: 1024,
            free_limit: 64,
            flags: 0,
            frag_n_used: 2,
        });
        let mut buf = page.clone();
        want.encode(&mut buf);
        assert_eq!(Page::decode(&buf, None).unwrap(), want);
    }

    #[test]
    fn encode_then_decode_round_trips_index() {
        let mut buf = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        let want = Page::Index(IndexHeader::new_leaf(7));
        want.encode(&mut buf);
        assert_eq!(Page::decode(&buf, None).unwrap(), want);
    }

    #[test]
    fn encode_then_decode_round_trips_xdes() {
        let mut buf = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        let mut entries: Vec<XdesEntry> = (0..XDES_ENTRIES_PER_PAGE).map(|_| XdesEntry::new_free()).collect();
        entries[5].segment_id = 42;
        let want = Page::Xdes(entries);
        want.encode(&mut buf);
        assert_eq!(Page::decode(&buf, None).unwrap(), want);
    }

    #[test]
    fn encode_then_decode_round_trips_inode() {
        let mut buf = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        let mut slots = vec![InodeSlotSummary { segment_id: 0, n_used: 0 }; INODE_ENTRIES_PER_PAGE];
        slots[0] = InodeSlotSummary { segment_id: 99, n_used: 12 };
        let want = Page::Inode(slots);
        want.encode(&mut buf);
        assert_eq!(Page::decode(&buf, None).unwrap(), want);
    }

    #[test]
    fn test_fsp_header_page_size() {
        let fsp = FspHeader {
            space_id: 0,
            size: 100,
            free_limit: 64,
            flags: 0, // ssize=0 => default 16K
            frag_n_used: 0,
        };
        assert_eq!(fsp.page_size_from_flags(), SIZE_PAGE_DEFAULT);

        // ssize=5 => 16384
        let fsp_16k = FspHeader {
            flags: 5 << FSP_FLAGS_POS_PAGE_SSIZE,
            ..fsp
        };
        assert_eq!(fsp_16k.page_size_from_flags(), 16384);

        // ssize=3 => 4096
        let fsp_4k = FspHeader {
            flags: 3 << FSP_FLAGS_POS_PAGE_SSIZE,
            ..fsp
        };
        assert_eq!(fsp_4k.page_size_from_flags(), 4096);
    }
}
