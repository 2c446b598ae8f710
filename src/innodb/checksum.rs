//! InnoDB page checksum computation and validation.
//!
//! - **CRC-32C** (MySQL 5.7.7+ default, and the only algorithm this crate
//!   ever *writes*): XOR of two independent CRC32c values computed over
//!   bytes `[4..26)` and `[38..page_size-8)`. These are NOT chained — each
//!   range is checksummed separately and the results XORed.
//!
//! - **Legacy InnoDB** (MySQL < 5.7.7): `ut_fold_ulint_pair` with wrapping
//!   `u32` arithmetic, processing bytes one at a time over the same two
//!   ranges. Readable for backward compatibility; never written.
//!
//! Use [`validate_checksum`] to check a page, [`recalculate_checksum`] to
//! (re)compute and write one after modifying a page's body.

use crate::innodb::constants::*;
use byteorder::{BigEndian, ByteOrder};

/// Checksum algorithms recognized by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// CRC-32C (hardware accelerated, MySQL 5.7.7+ default). The only
    /// algorithm [`recalculate_checksum`] produces.
    Crc32c,
    /// Legacy InnoDB checksum (buf_calc_page_new_checksum equivalent).
    InnoDB,
    /// No checksum (innodb_checksum_algorithm=none, or an untouched
    /// all-zero page).
    None,
}

/// Validate a page's checksum, trying CRC-32C first, then the legacy fold.
pub fn validate_checksum(page_data: &[u8], page_size: u32) -> ChecksumResult {
    let ps = page_size as usize;
    if page_data.len() < ps {
        return ChecksumResult {
            algorithm: ChecksumAlgorithm::None,
            valid: false,
            stored_checksum: 0,
            calculated_checksum: 0,
        };
    }

    let first_u32 = BigEndian::read_u32(&page_data[FIL_PAGE_SPACE_OR_CHKSUM..]);
    if first_u32 == 0 && page_data[..ps].iter().all(|&b| b == 0) {
        return ChecksumResult {
            algorithm: ChecksumAlgorithm::None,
            valid: true,
            stored_checksum: 0,
            calculated_checksum: 0,
        };
    }

    let stored_checksum = first_u32;
    if stored_checksum == 0xDEADBEEF {
        return ChecksumResult {
            algorithm: ChecksumAlgorithm::None,
            valid: true,
            stored_checksum,
            calculated_checksum: 0xDEADBEEF,
        };
    }

    let crc_checksum = calculate_crc32c(page_data, ps);
    if stored_checksum == crc_checksum {
        return ChecksumResult {
            algorithm: ChecksumAlgorithm::Crc32c,
            valid: true,
            stored_checksum,
            calculated_checksum: crc_checksum,
        };
    }

    let innodb_checksum = calculate_innodb_checksum(page_data, ps);
    if stored_checksum == innodb_checksum {
        return ChecksumResult {
            algorithm: ChecksumAlgorithm::InnoDB,
            valid: true,
            stored_checksum,
            calculated_checksum: innodb_checksum,
        };
    }

    ChecksumResult {
        algorithm: ChecksumAlgorithm::Crc32c,
        valid: false,
        stored_checksum,
        calculated_checksum: crc_checksum,
    }
}

/// Result of a checksum validation.
#[derive(Debug, Clone)]
pub struct ChecksumResult {
    /// The checksum algorithm that was detected or attempted.
    pub algorithm: ChecksumAlgorithm,
    /// Whether the stored checksum matches the calculated value.
    pub valid: bool,
    /// The checksum value stored in the page's FIL header (bytes 0-3).
    pub stored_checksum: u32,
    /// The checksum value calculated from the page data.
    pub calculated_checksum: u32,
}

/// Recompute and write a page's CRC-32C checksum and trailer LSN mirror.
///
/// Call this after mutating a page's body (and its header LSN) and before
/// handing the page to the block file for a write. The checksum is written
/// into header bytes `0..4`; the low 32 bits of the header LSN are mirrored
/// into the trailer at `page_size-4..page_size`.
pub fn recalculate_checksum(page_data: &mut [u8], page_size: u32) {
    let ps = page_size as usize;
    debug_assert!(page_data.len() >= ps);

    let header_lsn = BigEndian::read_u64(&page_data[FIL_PAGE_LSN..]);
    let lsn_low32 = (header_lsn & 0xFFFF_FFFF) as u32;
    let trailer_offset = ps - SIZE_FIL_TRAILER;
    BigEndian::write_u32(&mut page_data[trailer_offset + 4..], lsn_low32);

    let checksum = calculate_crc32c(page_data, ps);
    BigEndian::write_u32(&mut page_data[FIL_PAGE_SPACE_OR_CHKSUM..], checksum);
    BigEndian::write_u32(&mut page_data[trailer_offset..], checksum);
}

/// Calculate CRC-32C checksum for an InnoDB page.
///
/// MySQL computes CRC-32C independently over two disjoint ranges and XORs
/// the results (see buf_calc_page_crc32 in buf0checksum.cc). Skipped regions:
/// - bytes 0-3 (stored checksum)
/// - bytes 26-37 (flush LSN + space ID, written outside buffer pool)
/// - last 8 bytes (trailer)
fn calculate_crc32c(page_data: &[u8], page_size: usize) -> u32 {
    let end = page_size - SIZE_FIL_TRAILER;
    let crc1 = crc32c::crc32c(&page_data[FIL_PAGE_OFFSET..FIL_PAGE_FILE_FLUSH_LSN]);
    let crc2 = crc32c::crc32c(&page_data[FIL_PAGE_DATA..end]);
    crc1 ^ crc2
}

/// InnoDB's ut_fold_ulint_pair — the core folding function.
#[inline]
fn ut_fold_ulint_pair(n1: u32, n2: u32) -> u32 {
    let step = n1 ^ n2 ^ UT_HASH_RANDOM_MASK2;
    let step = (step << 8).wrapping_add(n1);
    let step = step ^ UT_HASH_RANDOM_MASK;
    step.wrapping_add(n2)
}

/// Fold a byte sequence using ut_fold_ulint_pair, one byte at a time.
fn ut_fold_binary(data: &[u8]) -> u32 {
    let mut fold: u32 = 0;
    for &byte in data {
        fold = ut_fold_ulint_pair(fold, byte as u32);
    }
    fold
}

/// Calculate the legacy InnoDB checksum (buf_calc_page_new_checksum).
fn calculate_innodb_checksum(page_data: &[u8], page_size: usize) -> u32 {
    let end = page_size - SIZE_FIL_TRAILER;
    let fold1 = ut_fold_binary(&page_data[FIL_PAGE_OFFSET..FIL_PAGE_FILE_FLUSH_LSN]);
    let fold2 = ut_fold_binary(&page_data[FIL_PAGE_DATA..end]);
    fold1.wrapping_add(fold2)
}

/// Validate the LSN consistency between header and trailer.
pub fn validate_lsn(page_data: &[u8], page_size: u32) -> bool {
    let ps = page_size as usize;
    if page_data.len() < ps {
        return false;
    }
    let header_lsn = BigEndian::read_u64(&page_data[FIL_PAGE_LSN..]);
    let header_lsn_low32 = (header_lsn & 0xFFFFFFFF) as u32;

    let trailer_offset = ps - SIZE_FIL_TRAILER;
    let trailer_lsn_low32 = BigEndian::read_u32(&page_data[trailer_offset + 4..]);

    header_lsn_low32 == trailer_lsn_low32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_page_is_valid() {
        let page = vec![0u8; 16384];
        let result = validate_checksum(&page, 16384);
        assert!(result.valid);
    }

    #[test]
    fn no_checksum_magic() {
        let mut page = vec![0u8; 16384];
        BigEndian::write_u32(&mut page[0..], 0xDEADBEEF);
        let result = validate_checksum(&page, 16384);
        assert!(result.valid);
        assert_eq!(result.algorithm, ChecksumAlgorithm::None);
    }

    #[test]
    fn recalculate_then_validate_round_trips() {
        let mut page = vec![0xABu8; 16384];
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], 7);
        BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], 17855);
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], 0x1234_5678_9abc);

        recalculate_checksum(&mut page, 16384);

        let result = validate_checksum(&page, 16384);
        assert!(result.valid);
        assert_eq!(result.algorithm, ChecksumAlgorithm::Crc32c);
        assert!(validate_lsn(&page, 16384));
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let mut page = vec![0xCDu8; 16384];
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], 3);
        recalculate_checksum(&mut page, 16384);
        page[100] ^= 0xFF;
        let result = validate_checksum(&page, 16384);
        assert!(!result.valid);
    }

    #[test]
    fn lsn_validation_matching() {
        let mut page = vec![0u8; 16384];
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], 0x12345678);
        BigEndian::write_u32(&mut page[16380..], 0x12345678);
        assert!(validate_lsn(&page, 16384));
    }

    #[test]
    fn lsn_validation_mismatch() {
        let mut page = vec![0u8; 16384];
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], 0x12345678);
        BigEndian::write_u32(&mut page[16380..], 0xAAAAAAAA);
        assert!(!validate_lsn(&page, 16384));
    }
}
