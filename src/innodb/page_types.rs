//! InnoDB page type definitions.
//!
//! Maps the 2-byte page type field (bytes 24-25 of the FIL header) to a
//! [`PageType`] enum, restricted to the types the storage kernel actually
//! produces and consumes: `FSP_HDR`, `IBUF_BITMAP`, `INODE`, `INDEX`, `XDES`,
//! `ALLOCATED`, `SYS`, and `UNDO_LOG`. Any other on-disk value decodes to
//! [`PageType::Unknown`] rather than failing — a page codec that cannot name
//! a type should not refuse to hand back the header.

use serde::Serialize;
use std::fmt;

/// Page types recognized by this crate's codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageType {
    /// Freshly allocated, type field not initialized (FIL_PAGE_TYPE_ALLOCATED = 0)
    Allocated,
    /// Undo log page (FIL_PAGE_UNDO_LOG = 2)
    UndoLog,
    /// File segment inode (FIL_PAGE_INODE = 3)
    Inode,
    /// Insert buffer bitmap (FIL_PAGE_IBUF_BITMAP = 5)
    IbufBitmap,
    /// System internal page (FIL_PAGE_TYPE_SYS = 6)
    Sys,
    /// File space header, page 0 of each tablespace (FIL_PAGE_TYPE_FSP_HDR = 8)
    FspHdr,
    /// Extent descriptor (FIL_PAGE_TYPE_XDES = 9)
    Xdes,
    /// B+Tree node: internal or leaf (FIL_PAGE_INDEX = 17855)
    Index,
    /// Any on-disk value not in the set above.
    Unknown(u16),
}

impl PageType {
    /// Map a raw 2-byte page type value to a `PageType`.
    pub fn from_u16(val: u16) -> Self {
        match val {
            0 => PageType::Allocated,
            2 => PageType::UndoLog,
            3 => PageType::Inode,
            5 => PageType::IbufBitmap,
            6 => PageType::Sys,
            8 => PageType::FspHdr,
            9 => PageType::Xdes,
            17855 => PageType::Index,
            other => PageType::Unknown(other),
        }
    }

    /// The raw 2-byte value this variant encodes to.
    pub fn as_u16(self) -> u16 {
        match self {
            PageType::Allocated => 0,
            PageType::UndoLog => 2,
            PageType::Inode => 3,
            PageType::IbufBitmap => 5,
            PageType::Sys => 6,
            PageType::FspHdr => 8,
            PageType::Xdes => 9,
            PageType::Index => 17855,
            PageType::Unknown(v) => v,
        }
    }

    /// MySQL source constant name.
    pub fn source_name(&self) -> &'static str {
        match self {
            PageType::Allocated => "FIL_PAGE_TYPE_ALLOCATED",
            PageType::UndoLog => "FIL_PAGE_UNDO_LOG",
            PageType::Inode => "FIL_PAGE_INODE",
            PageType::IbufBitmap => "FIL_PAGE_IBUF_BITMAP",
            PageType::Sys => "FIL_PAGE_TYPE_SYS",
            PageType::FspHdr => "FIL_PAGE_TYPE_FSP_HDR",
            PageType::Xdes => "FIL_PAGE_TYPE_XDES",
            PageType::Index => "FIL_PAGE_INDEX",
            PageType::Unknown(_) => "FIL_PAGE_TYPE_UNKNOWN",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageType::Unknown(v) => write!(f, "Unknown({v})"),
            other => write!(f, "{}", other.source_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_types() {
        for pt in [
            PageType::Allocated,
            PageType::UndoLog,
            PageType::Inode,
            PageType::IbufBitmap,
            PageType::Sys,
            PageType::FspHdr,
            PageType::Xdes,
            PageType::Index,
        ] {
            assert_eq!(PageType::from_u16(pt.as_u16()), pt);
        }
    }

    #[test]
    fn unrecognized_value_is_unknown() {
        assert_eq!(PageType::from_u16(9999), PageType::Unknown(9999));
    }
}
