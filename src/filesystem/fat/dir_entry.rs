//! FAT directory slots and their decoding.
//!
//! Each slot is 32 bytes and is either a short (8.3) entry holding the metadata
//! of a file or directory, or a long-name fragment holding 13 UTF-16 code units
//! of the name of the short entry that follows it.

use binread::{BinRead, BinReaderExt};
use getset::CopyGetters;
use std::io;

use crate::filesystem::entry::{Attributes, Entry, EntryKind};
use crate::filesystem::fs_error::FsError;
use crate::filesystem::timestamp::fat_datetime_to_unix;

/// Size of a directory slot in bytes.
pub const SLOT_SIZE: usize = 32;

/// First byte of a slot marking the end of the directory.
const END_OF_DIR: u8 = 0x00;
/// First byte of a deleted slot.
const DELETED: u8 = 0xE5;
/// First byte standing for a real 0xE5 character in the short name.
const KANJI_E5: u8 = 0x05;
/// Attribute byte of a long-name fragment.
const ATTR_LONG_NAME: u8 = 0x0F;
const ATTR_DIRECTORY: u8 = 0x10;

/// FAT short directory entry.
///
/// # Fields
/// - `name`: 8.3 format filename (8 characters for name, 3 for extension)
/// - `attr`: File attributes (read-only, hidden, system, volume label, directory, archive)
/// - `fst_clus_hi`/`fst_clus_lo`: High and low 16 bits of the first cluster number
/// - `wrt_time`/`wrt_date`: Last write time and date
/// - `file_size`: Size of the file in bytes (0 for directories)
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
pub struct DirEntry {
    /// Filename in 8.3 format (8 characters name + 3 characters extension)
    #[get_copy = "pub"]
    name: [u8; 11],
    /// File attributes byte
    #[get_copy = "pub"]
    attr: u8,
    /// NT reserved (unused)
    _n_t_res: u8,
    /// Creation time in 10ms units
    _ctr_time_tenth: u8,
    /// Creation time
    _crt_time: u16,
    /// Creation date
    _crt_date: u16,
    /// Last access date
    _lst_acc_date: u16,
    /// High 16 bits of first cluster number
    fst_clus_hi: u16,
    /// Last write time
    #[get_copy = "pub"]
    wrt_time: u16,
    /// Last write date
    #[get_copy = "pub"]
    wrt_date: u16,
    /// Low 16 bits of first cluster number
    fst_clus_lo: u16,
    /// File size in bytes (0 for directories)
    #[get_copy = "pub"]
    file_size: u32,
}

/// Long-name fragment slot.
///
/// Fragments are stored in reverse order right before their short entry; the
/// ordinal (low 5 bits of `ord`) numbers them from 1, and bit 0x40 flags the
/// last fragment.
#[derive(BinRead, Debug, Clone, CopyGetters)]
#[br(little)]
pub struct LongNameSlot {
    #[get_copy = "pub"]
    ord: u8,
    name1: [u16; 5],
    _attr: u8,
    _lfn_type: u8,
    #[get_copy = "pub"]
    checksum: u8,
    name2: [u16; 6],
    _fst_clus_lo: u16,
    name3: [u16; 2],
}

impl LongNameSlot {
    /// Sequence number of this fragment within the long name.
    pub fn ordinal(&self) -> u8 {
        self.ord & 0x1F
    }

    /// The 13 UTF-16 code units carried by the fragment.
    pub fn units(&self) -> [u16; 13] {
        let mut units = [0; 13];
        units[..5].copy_from_slice(&self.name1);
        units[5..11].copy_from_slice(&self.name2);
        units[11..].copy_from_slice(&self.name3);
        units
    }
}

/// A decoded 32-byte directory slot.
#[derive(Debug)]
pub enum Slot {
    /// No further slots are in use in this directory.
    End,
    Deleted,
    LongName(LongNameSlot),
    Short(DirEntry),
}

impl Slot {
    /// Decodes the slot at the start of `buf`.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if fewer than 32 bytes are available
    pub fn from_slice(buf: &[u8]) -> Result<Self, FsError> {
        let raw = buf.get(..SLOT_SIZE).ok_or_else(|| {
            FsError::CorruptStructure(format!(
                "directory slot truncated to {} bytes",
                buf.len()
            ))
        })?;

        match raw[0] {
            END_OF_DIR => return Ok(Slot::End),
            DELETED => return Ok(Slot::Deleted),
            _ => {}
        }

        let mut reader = io::Cursor::new(raw);
        if raw[11] == ATTR_LONG_NAME {
            Ok(Slot::LongName(reader.read_le()?))
        } else {
            Ok(Slot::Short(reader.read_le()?))
        }
    }
}

impl DirEntry {
    /// Returns the complete first cluster number for this entry.
    ///
    /// Combines `fst_clus_hi` and `fst_clus_lo`: `(fst_clus_hi << 16) | fst_clus_lo`
    pub fn cluster_number(&self) -> u32 {
        ((self.fst_clus_hi as u32) << 16) | self.fst_clus_lo as u32
    }

    /// Checks if the directory attribute bit (0x10) is set.
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// Whether the 3-byte extension is `TXT`.
    pub fn has_txt_extension(&self) -> bool {
        self.name[8..11].eq_ignore_ascii_case(b"TXT")
    }

    /// Synthesizes a lower-case name from the 8.3 fields.
    ///
    /// Trailing spaces are trimmed from both parts; the extension is only
    /// appended when it starts with an alphanumeric character.
    pub fn short_name(&self) -> String {
        let mut base = self.name[0..8].to_vec();
        if base[0] == KANJI_E5 {
            base[0] = DELETED;
        }

        let trim = |raw: &[u8]| -> String {
            raw.iter()
                .map(|&b| b as char)
                .collect::<String>()
                .trim_end_matches([' ', '\0'])
                .to_string()
        };

        let mut name = trim(&base);
        if self.name[8].is_ascii_alphanumeric() {
            name.push('.');
            name.push_str(&trim(&self.name[8..11]));
        }

        name.to_lowercase()
    }

    /// Last write time as Unix seconds.
    pub fn last_modified(&self) -> i64 {
        fat_datetime_to_unix(self.wrt_date, self.wrt_time)
    }

    /// Builds the volume-agnostic entry for this slot.
    ///
    /// # Parameters
    /// - `long_name`: the accumulated long name, if fragments preceded the slot
    /// - `root_clus`: cluster substituted for a zero first cluster
    pub fn to_entry(&self, long_name: Option<String>, root_clus: u32) -> Entry {
        let kind = if self.is_dir() {
            EntryKind::folder()
        } else if self.has_txt_extension() {
            EntryKind::text_file()
        } else {
            EntryKind::file()
        };

        let position = match self.cluster_number() {
            0 => root_clus,
            cluster => cluster,
        };

        Entry::new(
            kind,
            long_name.unwrap_or_else(|| self.short_name()),
            Attributes::from_bits(self.attr),
            position as u64,
            0,
            self.file_size as u64,
            self.last_modified(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a raw short entry slot.
    pub(crate) fn short_slot(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut slot = [0u8; 32];
        slot[0..11].copy_from_slice(name);
        slot[11] = attr;
        slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        slot[28..32].copy_from_slice(&size.to_le_bytes());
        slot
    }

    /// Builds a raw long-name fragment slot holding up to 13 characters.
    pub(crate) fn long_slot(ord: u8, text: &str) -> [u8; 32] {
        let mut units: Vec<u16> = text.encode_utf16().collect();
        if units.len() < 13 {
            units.push(0);
        }
        units.resize(13, 0xFFFF);

        let mut slot = [0u8; 32];
        slot[0] = ord;
        slot[11] = ATTR_LONG_NAME;
        let offsets = (0..5)
            .map(|i| 1 + 2 * i)
            .chain((0..6).map(|i| 14 + 2 * i))
            .chain((0..2).map(|i| 28 + 2 * i));
        for (unit, off) in units.iter().zip(offsets) {
            slot[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        slot
    }

    #[test]
    fn decodes_short_entry() {
        let raw = short_slot(b"README  TXT", 0x20, 0x0001_0005, 1234);
        let Slot::Short(entry) = Slot::from_slice(&raw).unwrap() else {
            panic!("expected a short entry");
        };
        assert_eq!(entry.cluster_number(), 0x0001_0005);
        assert_eq!(entry.short_name(), "readme.txt");

        let e = entry.to_entry(None, 2);
        assert!(e.is_text());
        assert_eq!(e.size(), 1234);
        assert_eq!(e.position(), 0x0001_0005);
    }

    #[test]
    fn zero_cluster_maps_to_root() {
        let raw = short_slot(b"..         ", 0x10, 0, 0);
        let Slot::Short(entry) = Slot::from_slice(&raw).unwrap() else {
            panic!("expected a short entry");
        };
        let e = entry.to_entry(None, 2);
        assert!(e.is_dir());
        assert!(!e.is_regular_dir());
        assert_eq!(e.name(), "..");
        assert_eq!(e.position(), 2);
    }

    #[test]
    fn extension_needs_alphanumeric_start() {
        let raw = short_slot(b"MAKEFILE   ", 0x20, 3, 1);
        let Slot::Short(entry) = Slot::from_slice(&raw).unwrap() else {
            panic!("expected a short entry");
        };
        assert_eq!(entry.short_name(), "makefile");
    }

    #[test]
    fn classifies_special_slots() {
        assert!(matches!(Slot::from_slice(&[0u8; 32]).unwrap(), Slot::End));

        let mut deleted = short_slot(b"GONE    BIN", 0x20, 3, 1);
        deleted[0] = 0xE5;
        assert!(matches!(Slot::from_slice(&deleted).unwrap(), Slot::Deleted));

        let lfn = long_slot(0x41, "hello");
        let Slot::LongName(slot) = Slot::from_slice(&lfn).unwrap() else {
            panic!("expected a long-name fragment");
        };
        assert_eq!(slot.ordinal(), 1);
        assert_eq!(slot.units()[0], 'h' as u16);
        assert_eq!(slot.units()[5], 0);
    }

    #[test]
    fn truncated_slot_is_corrupt() {
        assert!(matches!(
            Slot::from_slice(&[0x41; 16]),
            Err(FsError::CorruptStructure(_))
        ));
    }
}
