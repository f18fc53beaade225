//! Directory index (`$I30`) traversal.
//!
//! A directory's entries live in a B+ tree whose root node is stored in the
//! `$INDEX_ROOT` attribute. Deeper nodes are `INDX` blocks of the
//! `$INDEX_ALLOCATION` stream, addressed by VCN. Entries are returned in
//! collation order: the subtree left of an entry comes before the entry.

use binread::{BinRead, BinReaderExt};
use getset::CopyGetters;
use log::debug;
use std::collections::HashSet;
use std::io;

use super::attribute::{ATTR_FILE_NAME, FileName};
use super::record::{INDX_MAGIC, check_and_fix};
use crate::filesystem::entry::{Entry, dedup_entries};
use crate::filesystem::fs_error::FsError;
use crate::utils::{slice_at, u64_at};

/// Offset of the node header inside an `$INDEX_ROOT` value.
const ROOT_NODE_OFFSET: usize = 0x10;
/// Offset of the node header inside an `INDX` block.
const BLOCK_NODE_OFFSET: usize = 0x18;

/// Index entry flag: a child node precedes this entry.
pub const ENTRY_HAS_CHILD: u16 = 0x01;
/// Index entry flag: last entry of the node, carries no key.
pub const ENTRY_LAST: u16 = 0x02;

const ENTRY_HEADER_LEN: usize = 16;

/// Deepest chain of `INDX` blocks followed below the root.
pub const MAX_INDEX_DEPTH: usize = 64;

/// Header shared by the root node and the `INDX` blocks.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct IndexNodeHeader {
    /// Offset of the first entry, relative to this header
    entries_offset: u32,
    /// End of the last entry, relative to this header
    index_length: u32,
    allocated_size: u32,
    flags: u8,
    #[getset(skip)]
    _reserved: [u8; 3],
}

/// Resident `$INDEX_ROOT` value.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
#[getset(get_copy = "pub")]
pub struct IndexRoot {
    /// Type of the indexed attribute, `$FILE_NAME` for directories
    attr_type: u32,
    collation_rule: u32,
    block_size: u32,
    clusters_per_block: u8,
    #[getset(skip)]
    _reserved: [u8; 3],
    #[getset(skip)]
    node: IndexNodeHeader,
}

impl IndexRoot {
    pub fn parse(value: &[u8]) -> Result<Self, FsError> {
        Ok(io::Cursor::new(value).read_le()?)
    }

    pub fn node(&self) -> &IndexNodeHeader {
        &self.node
    }
}

#[derive(BinRead, Debug)]
#[br(little)]
struct IndexEntryHeader {
    file_reference: u64,
    length: u16,
    key_length: u16,
    flags: u16,
    _padding: u16,
}

/// Walks the nodes of one directory index.
pub struct IndexReader<'a> {
    allocation: Option<&'a [u8]>,
    block_size: usize,
    /// Bytes addressed by one VCN of the allocation stream
    vcn_size: u64,
    visited: HashSet<u64>,
    /// Blocks currently open between the root and the node being read
    depth: usize,
}

impl<'a> IndexReader<'a> {
    pub fn new(root: &IndexRoot, allocation: Option<&'a [u8]>, cluster_size: u64) -> Self {
        let block_size = root.block_size() as u64;
        let vcn_size = if block_size >= cluster_size {
            cluster_size
        } else {
            512
        };

        IndexReader {
            allocation,
            block_size: block_size as usize,
            vcn_size,
            visited: HashSet::new(),
            depth: 0,
        }
    }

    /// Decodes the entries of a node and of the subtrees it points to.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if an entry is shorter than its header or
    ///   runs past the node, or a child block is missing, malformed, revisited
    ///   or nested deeper than [`MAX_INDEX_DEPTH`]
    pub fn read_node(&mut self, node: &[u8]) -> Result<Vec<Entry>, FsError> {
        let header: IndexNodeHeader = io::Cursor::new(node).read_le()?;
        let end = header.index_length as usize;
        if end > node.len() {
            return Err(FsError::CorruptStructure(format!(
                "index node length {end} exceeds its {}-byte buffer",
                node.len()
            )));
        }

        let mut entries = vec![];
        let mut pos = header.entries_offset as usize;
        while pos < end {
            let bytes = slice_at(node, pos, ENTRY_HEADER_LEN)?;
            let entry: IndexEntryHeader = io::Cursor::new(bytes).read_le()?;
            let len = entry.length as usize;
            let min_len = if entry.flags & ENTRY_HAS_CHILD != 0 {
                ENTRY_HEADER_LEN + 8
            } else {
                ENTRY_HEADER_LEN
            };
            if len < min_len || pos + len > end {
                return Err(FsError::CorruptStructure(format!(
                    "index entry at {pos} has length {len}, node ends at {end}"
                )));
            }
            let raw = &node[pos..pos + len];

            if entry.flags & ENTRY_HAS_CHILD != 0 {
                let vcn = u64_at(raw, len - 8)?;
                entries.extend(self.read_block(vcn)?);
            }
            if entry.flags & ENTRY_LAST != 0 {
                break;
            }

            if entry.key_length > 0 {
                let key = slice_at(raw, ENTRY_HEADER_LEN, entry.key_length as usize)?;
                entries.push(FileName::parse(key)?.to_entry(entry.file_reference));
            }
            pos += len;
        }

        Ok(dedup_entries(entries))
    }

    /// Reads the `INDX` block at `vcn` and decodes its node.
    fn read_block(&mut self, vcn: u64) -> Result<Vec<Entry>, FsError> {
        let allocation = self.allocation.ok_or_else(|| {
            FsError::CorruptStructure(format!(
                "index entry points to block {vcn} but there is no allocation stream"
            ))
        })?;
        if !self.visited.insert(vcn) {
            return Err(FsError::CorruptStructure(format!(
                "index block {vcn} is referenced twice"
            )));
        }
        if self.depth >= MAX_INDEX_DEPTH {
            return Err(FsError::CorruptStructure(format!(
                "index block {vcn} is nested more than {MAX_INDEX_DEPTH} levels deep"
            )));
        }

        let offset = vcn
            .checked_mul(self.vcn_size)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(|| FsError::CorruptStructure(format!("index block {vcn} out of range")))?;
        let mut block = slice_at(allocation, offset, self.block_size)?.to_vec();
        check_and_fix(&mut block, INDX_MAGIC)?;

        let node = block.get(BLOCK_NODE_OFFSET..).ok_or_else(|| {
            FsError::CorruptStructure(format!("index block size {} is too small", self.block_size))
        })?;
        self.depth += 1;
        let entries = self.read_node(node);
        self.depth -= 1;
        entries
    }
}

/// Lists a directory from its `$I30` index root value and, for large
/// directories, its allocation stream.
///
/// # Errors
/// - `FsError::CorruptStructure` if the index does not key on file names or a
///   node is malformed
pub fn read_directory_index(
    root_value: &[u8],
    allocation: Option<&[u8]>,
    cluster_size: u64,
) -> Result<Vec<Entry>, FsError> {
    let root = IndexRoot::parse(root_value)?;
    if root.attr_type() != ATTR_FILE_NAME {
        return Err(FsError::CorruptStructure(format!(
            "directory index keys on attribute {:#x}",
            root.attr_type()
        )));
    }

    let mut reader = IndexReader::new(&root, allocation, cluster_size);
    let entries = reader.read_node(&root_value[ROOT_NODE_OFFSET..])?;
    debug!(
        "index: {} entries, {} blocks visited",
        entries.len(),
        reader.visited.len()
    );

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::attribute::namespace;
    use super::super::attribute::tests::file_name_value;
    use super::super::record::FIXUP_STRIDE;
    use super::*;

    /// Encodes an index entry keyed by a `$FILE_NAME`.
    pub(crate) fn index_entry(reference: u64, name: &str, namespace: u8, flags: u32) -> Vec<u8> {
        let key = file_name_value(5, name, namespace, flags, name.len() as u64, 0);
        let len = (ENTRY_HEADER_LEN + key.len() + 7) & !7;
        let mut out = vec![0u8; len];
        out[0..8].copy_from_slice(&reference.to_le_bytes());
        out[8..10].copy_from_slice(&(len as u16).to_le_bytes());
        out[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
        out[16..16 + key.len()].copy_from_slice(&key);
        out
    }

    /// Encodes the terminating entry of a node.
    pub(crate) fn last_entry() -> Vec<u8> {
        let mut out = vec![0u8; ENTRY_HEADER_LEN];
        out[8..10].copy_from_slice(&(ENTRY_HEADER_LEN as u16).to_le_bytes());
        out[12..14].copy_from_slice(&ENTRY_LAST.to_le_bytes());
        out
    }

    /// Adds a child pointer to an encoded entry.
    pub(crate) fn with_child(mut entry: Vec<u8>, vcn: u64) -> Vec<u8> {
        entry.extend_from_slice(&vcn.to_le_bytes());
        let len = entry.len() as u16;
        entry[8..10].copy_from_slice(&len.to_le_bytes());
        let flags = u16::from_le_bytes([entry[12], entry[13]]) | ENTRY_HAS_CHILD;
        entry[12..14].copy_from_slice(&flags.to_le_bytes());
        entry
    }

    /// Node header followed by `entries`, which start `entries_offset` bytes in.
    fn node(entries_offset: usize, entries: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0u8; entries_offset];
        for e in entries {
            out.extend_from_slice(e);
        }
        let len = out.len() as u32;
        out[0..4].copy_from_slice(&(entries_offset as u32).to_le_bytes());
        out[4..8].copy_from_slice(&len.to_le_bytes());
        out[8..12].copy_from_slice(&len.to_le_bytes());
        out
    }

    /// Encodes an `$INDEX_ROOT` value over file names.
    pub(crate) fn index_root_value(block_size: u32, entries: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0u8; ROOT_NODE_OFFSET];
        out[0..4].copy_from_slice(&ATTR_FILE_NAME.to_le_bytes());
        out[4..8].copy_from_slice(&1u32.to_le_bytes());
        out[8..12].copy_from_slice(&block_size.to_le_bytes());
        out[12] = 1;
        out.extend(node(0x10, entries));
        out
    }

    /// Encodes a fixup-protected `INDX` block.
    pub(crate) fn indx_block(block_size: usize, vcn: u64, entries: &[Vec<u8>]) -> Vec<u8> {
        let strides = block_size / FIXUP_STRIDE;
        let usa_ofs = 0x28;
        let usa_end = usa_ofs + 2 * (strides + 1);
        let entries_start = (usa_end + 7) & !7;

        let mut block = vec![0u8; block_size];
        block[0..4].copy_from_slice(INDX_MAGIC);
        block[4..6].copy_from_slice(&(usa_ofs as u16).to_le_bytes());
        block[6..8].copy_from_slice(&((strides + 1) as u16).to_le_bytes());
        block[16..24].copy_from_slice(&vcn.to_le_bytes());
        let node = node(entries_start - BLOCK_NODE_OFFSET, entries);
        block[BLOCK_NODE_OFFSET..BLOCK_NODE_OFFSET + node.len()].copy_from_slice(&node);

        let usn = [0x01, 0x00];
        block[usa_ofs..usa_ofs + 2].copy_from_slice(&usn);
        for i in 1..=strides {
            let end = i * FIXUP_STRIDE;
            let saved = [block[end - 2], block[end - 1]];
            block[usa_ofs + 2 * i..usa_ofs + 2 * i + 2].copy_from_slice(&saved);
            block[end - 2..end].copy_from_slice(&usn);
        }
        block
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name().as_str()).collect()
    }

    #[test]
    fn reads_resident_root() {
        let root = index_root_value(
            4096,
            &[
                index_entry(0x0001_0000_0000_0004, "$AttrDef", namespace::WIN32_AND_DOS, 0x06),
                index_entry(40, "alpha.txt", namespace::WIN32_AND_DOS, 0x20),
                index_entry(41, "beta", namespace::WIN32, 0x1000_0000),
                last_entry(),
            ],
        );
        let entries = read_directory_index(&root, None, 4096).unwrap();

        assert_eq!(names(&entries), vec!["alpha.txt", "beta"]);
        assert!(entries[0].is_text());
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].position(), 41);
    }

    #[test]
    fn collapses_short_and_long_names() {
        let root = index_root_value(
            4096,
            &[
                index_entry(42, "LONGN~1.TXT", namespace::DOS, 0x20),
                index_entry(42, "LONGNAME.TXT", namespace::WIN32, 0x20),
                last_entry(),
            ],
        );
        let entries = read_directory_index(&root, None, 4096).unwrap();
        assert_eq!(names(&entries), vec!["LONGNAME.TXT"]);
    }

    #[test]
    fn descends_into_blocks_in_order() {
        let block_size = 1024;
        let mut allocation = indx_block(
            block_size,
            0,
            &[
                index_entry(50, "a.bin", namespace::WIN32, 0),
                index_entry(51, "c.txt", namespace::WIN32, 0),
                last_entry(),
            ],
        );
        allocation.extend(indx_block(
            block_size,
            1,
            &[index_entry(53, "z.dat", namespace::WIN32, 0), last_entry()],
        ));
        let root = index_root_value(
            block_size as u32,
            &[
                with_child(index_entry(52, "m.txt", namespace::WIN32, 0), 0),
                with_child(last_entry(), 1),
            ],
        );

        let entries = read_directory_index(&root, Some(&allocation), 1024).unwrap();
        assert_eq!(names(&entries), vec!["a.bin", "c.txt", "m.txt", "z.dat"]);
    }

    #[test]
    fn small_blocks_are_addressed_by_sector() {
        let block_size = 512;
        let mut allocation = vec![0u8; 3 * 512];
        allocation.extend(indx_block(
            block_size,
            3,
            &[index_entry(60, "deep.txt", namespace::WIN32, 0), last_entry()],
        ));
        let root = index_root_value(block_size as u32, &[with_child(last_entry(), 3)]);

        let entries = read_directory_index(&root, Some(&allocation), 4096).unwrap();
        assert_eq!(names(&entries), vec!["deep.txt"]);
    }

    #[test]
    fn revisited_block_is_corrupt() {
        let allocation = indx_block(1024, 0, &[with_child(last_entry(), 0)]);
        let root = index_root_value(1024, &[with_child(last_entry(), 0)]);
        assert!(matches!(
            read_directory_index(&root, Some(&allocation), 1024),
            Err(FsError::CorruptStructure(_))
        ));
    }

    /// Allocation stream of `blocks` 512-byte blocks, each the only child of
    /// the previous one, the last holding `leaf.txt`.
    fn block_chain(blocks: u64) -> Vec<u8> {
        let mut allocation = vec![];
        for vcn in 0..blocks {
            let entries = if vcn + 1 == blocks {
                vec![index_entry(70, "leaf.txt", namespace::WIN32, 0), last_entry()]
            } else {
                vec![with_child(last_entry(), vcn + 1)]
            };
            allocation.extend(indx_block(512, vcn, &entries));
        }
        allocation
    }

    #[test]
    fn follows_chain_up_to_depth_limit() {
        let allocation = block_chain(MAX_INDEX_DEPTH as u64);
        let root = index_root_value(512, &[with_child(last_entry(), 0)]);

        let entries = read_directory_index(&root, Some(&allocation), 4096).unwrap();
        assert_eq!(names(&entries), vec!["leaf.txt"]);
    }

    #[test]
    fn chain_past_depth_limit_is_corrupt() {
        let allocation = block_chain(MAX_INDEX_DEPTH as u64 + 1);
        let root = index_root_value(512, &[with_child(last_entry(), 0)]);
        assert!(matches!(
            read_directory_index(&root, Some(&allocation), 4096),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn child_without_allocation_is_corrupt() {
        let root = index_root_value(4096, &[with_child(last_entry(), 0)]);
        assert!(matches!(
            read_directory_index(&root, None, 4096),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn short_entry_is_corrupt() {
        let mut short = last_entry();
        short[8..10].copy_from_slice(&8u16.to_le_bytes());
        let root = index_root_value(4096, &[short]);
        assert!(matches!(
            read_directory_index(&root, None, 4096),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn torn_block_is_corrupt() {
        let mut allocation = indx_block(1024, 0, &[last_entry()]);
        allocation[1022] ^= 0xFF;
        let root = index_root_value(1024, &[with_child(last_entry(), 0)]);
        assert!(matches!(
            read_directory_index(&root, Some(&allocation), 1024),
            Err(FsError::CorruptStructure(_))
        ));
    }
}
