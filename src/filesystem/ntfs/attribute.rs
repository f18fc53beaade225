//! MFT attribute headers, values and the attribute types the driver interprets.

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use std::io;

use super::data_run::{DataRun, decode_runs};
use super::record::{RecordHeader, reference_index};
use crate::filesystem::entry::{Attributes, Entry, EntryKind};
use crate::filesystem::fs_error::FsError;
use crate::filesystem::timestamp::filetime_to_unix;
use crate::utils::{slice_at, u32_at, utf16_at};

pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_DATA: u32 = 0x80;
pub const ATTR_INDEX_ROOT: u32 = 0x90;
pub const ATTR_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_BITMAP: u32 = 0xB0;
pub const ATTR_END: u32 = 0xFFFF_FFFF;

/// Name of the directory index streams.
pub const I30: &str = "$I30";

/// `$FILE_NAME` flag marking a directory.
pub const FILE_NAME_IS_DIRECTORY: u32 = 0x1000_0000;

const ATTR_HEADER_MIN_LEN: usize = 16;

#[derive(BinRead, Debug)]
#[br(little)]
struct ResidentHeader {
    value_length: u32,
    value_offset: u16,
    _indexed_flag: u8,
    _padding: u8,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct NonResidentHeader {
    lowest_vcn: u64,
    highest_vcn: u64,
    mapping_pairs_offset: u16,
    _compression_unit: u8,
    _padding: [u8; 5],
    allocated_size: u64,
    data_size: u64,
    initialized_size: u64,
}

/// Common attribute header followed by its form-specific part.
#[derive(BinRead, Debug)]
#[br(little)]
struct AttributeHeader {
    type_code: u32,
    length: u32,
    non_resident: u8,
    name_length: u8,
    name_offset: u16,
    flags: u16,
    instance: u16,
    #[br(if(non_resident == 0))]
    resident: Option<ResidentHeader>,
    #[br(if(non_resident != 0))]
    non_resident_part: Option<NonResidentHeader>,
}

/// Value of an attribute, either stored in the record or described by runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Resident(Vec<u8>),
    NonResident {
        lowest_vcn: u64,
        highest_vcn: u64,
        allocated_size: u64,
        data_size: u64,
        initialized_size: u64,
        runs: Vec<DataRun>,
    },
}

/// A decoded attribute of an MFT record.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Attribute {
    #[getset(get_copy = "pub")]
    type_code: u32,
    #[getset(get = "pub")]
    name: String,
    #[getset(get_copy = "pub")]
    flags: u16,
    #[getset(get_copy = "pub")]
    instance: u16,
    /// Index of the MFT record holding this attribute
    #[getset(get_copy = "pub")]
    record: u64,
    #[getset(get = "pub")]
    value: AttributeValue,
}

impl Attribute {
    /// Decodes one attribute from `bytes`, which spans exactly its declared length.
    fn from_bytes(header: AttributeHeader, bytes: &[u8], record: u64) -> Result<Self, FsError> {
        let name = match header.name_length {
            0 => String::new(),
            n => utf16_at(bytes, header.name_offset as usize, n as usize)?,
        };

        let value = match (header.resident, header.non_resident_part) {
            (Some(res), _) => AttributeValue::Resident(
                slice_at(bytes, res.value_offset as usize, res.value_length as usize)?.to_vec(),
            ),
            (None, Some(nr)) => {
                let pairs = bytes.get(nr.mapping_pairs_offset as usize..).ok_or_else(|| {
                    FsError::CorruptStructure(format!(
                        "mapping pairs offset {} past the attribute end",
                        nr.mapping_pairs_offset
                    ))
                })?;
                AttributeValue::NonResident {
                    lowest_vcn: nr.lowest_vcn,
                    highest_vcn: nr.highest_vcn,
                    allocated_size: nr.allocated_size,
                    data_size: nr.data_size,
                    initialized_size: nr.initialized_size,
                    runs: decode_runs(pairs)?,
                }
            }
            (None, None) => {
                return Err(FsError::CorruptStructure(format!(
                    "attribute {:#x} has no value header",
                    header.type_code
                )));
            }
        };

        Ok(Attribute {
            type_code: header.type_code,
            name,
            flags: header.flags,
            instance: header.instance,
            record,
            value,
        })
    }

    /// True for a non-resident header describing a later part of a value.
    pub fn is_extension(&self) -> bool {
        matches!(self.value, AttributeValue::NonResident { lowest_vcn, .. } if lowest_vcn > 0)
    }

    /// True if `self` extends the value started by `first`.
    pub fn continues(&self, first: &Attribute) -> bool {
        self.is_extension() && self.type_code == first.type_code && self.name == first.name
    }
}

/// Decodes the attributes of a fixed-up MFT record, in on-disk order.
///
/// # Errors
/// - `FsError::CorruptStructure` if a header is shorter than 16 bytes, has a zero
///   length, runs past the record, or the end marker is missing
pub fn parse_attributes(record: &[u8], index: u64) -> Result<Vec<Attribute>, FsError> {
    let header = RecordHeader::parse(record)?;
    let used = &record[..header.used_len(record.len())];

    let mut attributes = vec![];
    let mut pos = header.attrs_offset() as usize;
    loop {
        let type_code = u32_at(used, pos)?;
        if type_code == ATTR_END {
            break;
        }

        let mut reader = io::Cursor::new(&used[pos..]);
        let attr_header: AttributeHeader = reader.read_le()?;
        let length = attr_header.length as usize;
        if length < ATTR_HEADER_MIN_LEN || pos + length > used.len() {
            return Err(FsError::CorruptStructure(format!(
                "record {index}: attribute {type_code:#x} at {pos} has length {length}"
            )));
        }

        let bytes = &used[pos..pos + length];
        attributes.push(Attribute::from_bytes(attr_header, bytes, index)?);
        pos += length;
    }

    Ok(attributes)
}

/// Groups consecutive attributes whose successors are extension headers of
/// the same type and name.
pub fn group_chains(attributes: Vec<Attribute>) -> Vec<Vec<Attribute>> {
    let mut chains: Vec<Vec<Attribute>> = vec![];
    for attr in attributes {
        match chains.last_mut() {
            Some(chain) if attr.continues(&chain[0]) => chain.push(attr),
            _ => chains.push(vec![attr]),
        }
    }
    chains
}

/// One entry of an `$ATTRIBUTE_LIST` value.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct AttributeListEntry {
    type_code: u32,
    length: u16,
    name_length: u8,
    name_offset: u8,
    lowest_vcn: u64,
    mft_reference: u64,
    instance: u16,
}

impl AttributeListEntry {
    const MIN_LEN: usize = 26;

    /// Index of the record holding the attribute.
    pub fn record_index(&self) -> u64 {
        reference_index(self.mft_reference)
    }
}

/// Decodes an `$ATTRIBUTE_LIST` value.
///
/// # Errors
/// - `FsError::CorruptStructure` on an entry shorter than its fixed part or
///   running past the value
pub fn parse_attribute_list(value: &[u8]) -> Result<Vec<AttributeListEntry>, FsError> {
    let mut entries = vec![];
    let mut pos = 0;
    while pos + AttributeListEntry::MIN_LEN <= value.len() {
        let mut reader = io::Cursor::new(&value[pos..]);
        let entry: AttributeListEntry = reader.read_le()?;
        let length = entry.length as usize;
        if length < AttributeListEntry::MIN_LEN || pos + length > value.len() {
            return Err(FsError::CorruptStructure(format!(
                "attribute list entry at {pos} has length {length}"
            )));
        }
        pos += length;
        entries.push(entry);
    }
    Ok(entries)
}

/// Resident `$STANDARD_INFORMATION` value.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct StandardInformation {
    creation_time: u64,
    modification_time: u64,
    mft_change_time: u64,
    access_time: u64,
    file_attributes: u32,
}

impl StandardInformation {
    pub fn parse(value: &[u8]) -> Result<Self, FsError> {
        Ok(io::Cursor::new(value).read_le()?)
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits(self.file_attributes as u8)
    }

    pub fn last_modified(&self) -> i64 {
        filetime_to_unix(self.modification_time)
    }
}

/// Namespaces of a `$FILE_NAME`.
pub mod namespace {
    pub const POSIX: u8 = 0;
    pub const WIN32: u8 = 1;
    pub const DOS: u8 = 2;
    pub const WIN32_AND_DOS: u8 = 3;
}

/// `$FILE_NAME` value, also used as the key of directory index entries.
#[derive(BinRead, Debug, Clone, Getters, CopyGetters)]
#[br(little)]
pub struct FileName {
    #[getset(get_copy = "pub")]
    parent_reference: u64,
    #[getset(get_copy = "pub")]
    creation_time: u64,
    #[getset(get_copy = "pub")]
    modification_time: u64,
    #[getset(get_copy = "pub")]
    mft_change_time: u64,
    #[getset(get_copy = "pub")]
    access_time: u64,
    #[getset(get_copy = "pub")]
    allocated_size: u64,
    #[getset(get_copy = "pub")]
    data_size: u64,
    #[getset(get_copy = "pub")]
    file_flags: u32,
    _reparse: u32,
    name_length: u8,
    #[getset(get_copy = "pub")]
    namespace: u8,
    #[br(count = name_length as usize)]
    name_units: Vec<u16>,
}

impl FileName {
    pub fn parse(value: &[u8]) -> Result<Self, FsError> {
        Ok(io::Cursor::new(value).read_le()?)
    }

    pub fn name(&self) -> String {
        String::from_utf16_lossy(&self.name_units)
    }

    pub fn parent_index(&self) -> u64 {
        reference_index(self.parent_reference)
    }

    pub fn is_directory(&self) -> bool {
        self.file_flags & FILE_NAME_IS_DIRECTORY != 0
    }

    /// Preference of this name when a record carries several.
    pub fn namespace_rank(&self) -> u8 {
        match self.namespace {
            namespace::WIN32 | namespace::WIN32_AND_DOS => 3,
            namespace::POSIX => 2,
            _ => 1,
        }
    }

    /// Builds the entry of the file referenced by `reference`.
    pub fn to_entry(&self, reference: u64) -> Entry {
        let name = self.name();
        let mut attributes = self.file_flags as u8;
        let kind = if self.is_directory() {
            attributes |= Attributes::DIRECTORY;
            EntryKind::folder()
        } else {
            EntryKind::for_file_name(&name)
        };

        Entry::new(
            kind,
            name,
            Attributes::from_bits(attributes),
            reference_index(reference),
            self.parent_index(),
            self.data_size,
            filetime_to_unix(self.modification_time),
        )
    }
}
