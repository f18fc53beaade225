//! MFT record headers and update sequence (fixup) restoration.

use binread::{BinRead, BinReaderExt};
use getset::CopyGetters;
use std::io;

use crate::filesystem::fs_error::FsError;
use crate::utils::{slice_at, u16_at};

/// Distance between two protected positions of a multi-sector record.
pub const FIXUP_STRIDE: usize = 512;

/// Magic of an MFT record.
pub const FILE_MAGIC: &[u8; 4] = b"FILE";
/// Magic of an index allocation block.
pub const INDX_MAGIC: &[u8; 4] = b"INDX";

/// Record flag set when the record describes a directory.
pub const RECORD_IS_DIRECTORY: u16 = 0x0002;

/// Header of an MFT record.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
pub struct RecordHeader {
    #[get_copy = "pub"]
    magic: [u8; 4],
    #[get_copy = "pub"]
    usa_ofs: u16,
    #[get_copy = "pub"]
    usa_count: u16,
    _lsn: u64,
    #[get_copy = "pub"]
    sequence_number: u16,
    #[get_copy = "pub"]
    link_count: u16,
    /// Offset of the first attribute
    #[get_copy = "pub"]
    attrs_offset: u16,
    #[get_copy = "pub"]
    flags: u16,
    #[get_copy = "pub"]
    bytes_in_use: u32,
    #[get_copy = "pub"]
    bytes_allocated: u32,
    /// Reference to the base record, 0 for a base record
    #[get_copy = "pub"]
    base_mft_record: u64,
    _next_attr_instance: u16,
    _reserved: u16,
    #[get_copy = "pub"]
    mft_record_number: u32,
}

impl RecordHeader {
    pub fn parse(record: &[u8]) -> Result<Self, FsError> {
        let mut reader = io::Cursor::new(record);
        Ok(reader.read_le()?)
    }

    pub fn is_directory(&self) -> bool {
        self.flags & RECORD_IS_DIRECTORY != 0
    }

    /// End of the attribute area, bounded by the record length.
    pub fn used_len(&self, record_len: usize) -> usize {
        match self.bytes_in_use as usize {
            0 => record_len,
            n => n.min(record_len),
        }
    }
}

/// Record number part of a 64-bit file reference.
pub fn reference_index(reference: u64) -> u64 {
    reference & 0x0000_FFFF_FFFF_FFFF
}

/// Checks the magic of a multi-sector structure and restores its fixups.
///
/// The update sequence array starts at the offsets stored at bytes 4 and 6.
///
/// # Errors
/// - `FsError::CorruptStructure` on a wrong magic or a failed fixup
pub fn check_and_fix(buf: &mut [u8], magic: &[u8; 4]) -> Result<(), FsError> {
    let found = slice_at(buf, 0, 4)?;
    if found != magic {
        return Err(FsError::CorruptStructure(format!(
            "expected magic {:?}, found {:02X?}",
            String::from_utf8_lossy(magic),
            found
        )));
    }

    let usa_ofs = u16_at(buf, 4)?;
    let usa_count = u16_at(buf, 6)?;
    apply_fixups(buf, usa_ofs, usa_count)
}

/// Restores the last two bytes of every 512-byte stride of `buf`.
///
/// The first array element is the update sequence number written at the end of
/// each stride; the following elements are the original bytes.
///
/// # Errors
/// - `FsError::CorruptStructure` if the array does not fit, covers more than the
///   buffer, or a stride does not end with the update sequence number
pub fn apply_fixups(buf: &mut [u8], usa_ofs: u16, usa_count: u16) -> Result<(), FsError> {
    let count = usa_count as usize;
    if count == 0 {
        return Err(FsError::CorruptStructure(String::from(
            "empty update sequence array",
        )));
    }

    let usa = slice_at(buf, usa_ofs as usize, count * 2)?.to_vec();
    if (count - 1) * FIXUP_STRIDE > buf.len() {
        return Err(FsError::CorruptStructure(format!(
            "update sequence array covers {} strides of a {}-byte buffer",
            count - 1,
            buf.len()
        )));
    }

    let usn = &usa[0..2];
    for i in 1..count {
        let end = i * FIXUP_STRIDE;
        let tail = &mut buf[end - 2..end];
        if tail != usn {
            return Err(FsError::CorruptStructure(format!(
                "update sequence mismatch at stride {}",
                i - 1
            )));
        }
        tail.copy_from_slice(&usa[i * 2..i * 2 + 2]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-stride buffer protected with sequence number 0x0007.
    fn protected() -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(FILE_MAGIC);
        buf[4..6].copy_from_slice(&0x30u16.to_le_bytes());
        buf[6..8].copy_from_slice(&3u16.to_le_bytes());
        buf[0x30..0x36].copy_from_slice(&[0x07, 0x00, 0xAB, 0xCD, 0xEF, 0x01]);
        buf[510..512].copy_from_slice(&[0x07, 0x00]);
        buf[1022..1024].copy_from_slice(&[0x07, 0x00]);
        buf
    }

    #[test]
    fn restores_sector_tails() {
        let mut buf = protected();
        check_and_fix(&mut buf, FILE_MAGIC).unwrap();
        assert_eq!(&buf[510..512], &[0xAB, 0xCD]);
        assert_eq!(&buf[1022..1024], &[0xEF, 0x01]);
    }

    #[test]
    fn detects_torn_write() {
        let mut buf = protected();
        buf[1022] = 0x08;
        assert!(matches!(
            check_and_fix(&mut buf, FILE_MAGIC),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = protected();
        assert!(matches!(
            check_and_fix(&mut buf, INDX_MAGIC),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn rejects_oversized_array() {
        let mut buf = protected();
        buf[6..8].copy_from_slice(&5u16.to_le_bytes());
        assert!(matches!(
            check_and_fix(&mut buf, FILE_MAGIC),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn masks_sequence_from_reference() {
        assert_eq!(reference_index(0x0005_0000_0000_002A), 42);
    }
}
