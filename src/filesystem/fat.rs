//! FAT32 volume structure and operations.
//!
//! This module implements the core functions to interact with a FAT32 volume:
//! - Loading the file allocation table
//! - Walking cluster chains
//! - Decoding directories, including long file names
//! - Reading file content
//! - Displaying the volume layout

pub mod dir_entry;
pub mod long_name;

use log::{debug, warn};
use std::fmt::Write as FmtWrite;

use super::bpb::Fat32BootSector;
use super::entry::{Attributes, Entry, EntryKind};
use super::fs_error::FsError;
use crate::disk::BlockReader;
use crate::traits::LayoutDisplay;
use dir_entry::{SLOT_SIZE, Slot};
use long_name::LongNameBuffer;

/// Mask of the meaningful bits of a FAT32 table entry.
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// A mounted FAT32 volume.
///
/// Owns the device reader and the in-memory copy of the first FAT.
pub struct Fat32Vol<R: BlockReader> {
    reader: R,
    boot: Fat32BootSector,
    fat: Vec<u32>,
}

impl<R: BlockReader> Fat32Vol<R> {
    /// Mounts a FAT32 volume from its already read first sector.
    ///
    /// # Errors
    /// - `FsError::IOError` if the allocation table cannot be read
    /// - Various validation variants if `validate` is true and the boot sector is invalid
    pub fn mount(mut reader: R, sector: &[u8], validate: bool) -> Result<Self, FsError> {
        let boot = Fat32BootSector::from_sector(sector, validate)?;
        if boot.bpb().sec_per_clus() == 0 || boot.bpb().bytes_per_sec() == 0 {
            return Err(FsError::InvalidBootSector(String::from(
                "cluster geometry fields are zero",
            )));
        }

        let fat = Self::load_allocation_table(&mut reader, &boot)?;
        debug!(
            "mounted FAT32 volume: {} FAT entries, {} clusters, root cluster {}",
            fat.len(),
            boot.cluster_count(),
            boot.root_clus()
        );

        Ok(Self { reader, boot, fat })
    }

    pub fn boot_sector(&self) -> &Fat32BootSector {
        &self.boot
    }

    /// Reads the first FAT, located right after the reserved sectors.
    ///
    /// Only the entries of addressable clusters are loaded, whatever size the
    /// boot sector claims for the table.
    fn load_allocation_table(reader: &mut R, boot: &Fat32BootSector) -> Result<Vec<u32>, FsError> {
        let bps = boot.bpb().bytes_per_sec() as u64;
        let offset = boot.bpb().rsvd_sec_cnt() as u64 * bps;
        let len = (boot.fat_sz_32() as u64 * bps).min((boot.cluster_count() as u64 + 2) * 4);

        let raw = reader.read_vec(offset, len as usize)?;
        Ok(raw
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) & FAT32_ENTRY_MASK)
            .collect())
    }

    /// Returns the starting sector of the first FAT.
    fn fat_start(&self) -> u64 {
        self.boot.bpb().rsvd_sec_cnt() as u64
    }

    /// Returns the starting sector of the data region.
    fn data_start(&self) -> u64 {
        self.fat_start() + self.boot.bpb().num_fat() as u64 * self.boot.fat_sz_32() as u64
    }

    /// Returns the ending sector of the data region.
    fn data_end(&self) -> u64 {
        self.data_start()
            + self.data_cluster_count() as u64 * self.boot.bpb().sec_per_clus() as u64
    }

    fn data_cluster_count(&self) -> u32 {
        let total = self.boot.bpb().tot_sec_32() as u64;
        let data = total.saturating_sub(self.data_start());
        (data / self.boot.bpb().sec_per_clus() as u64) as u32
    }

    /// Converts a cluster number to the byte offset of its first sector.
    fn cluster_offset(&self, cluster: u32) -> u64 {
        let sector = self.data_start()
            + (cluster as u64 - 2) * self.boot.bpb().sec_per_clus() as u64;
        sector * self.boot.bpb().bytes_per_sec() as u64
    }

    /// Exclusive upper bound of the cluster numbers that can be followed.
    fn cluster_limit(&self) -> u32 {
        self.boot.cluster_count().min(self.fat.len() as u32)
    }

    /// Reads the raw bytes of one cluster.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` for the reserved clusters 0 and 1
    /// - `FsError::IOError` if the read fails
    pub fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>, FsError> {
        if cluster < 2 {
            return Err(FsError::CorruptStructure(format!(
                "cluster {cluster} is reserved"
            )));
        }

        let offset = self.cluster_offset(cluster);
        let len = self.boot.cluster_size() as usize;
        Ok(self.reader.read_vec(offset, len)?)
    }

    /// Lists the clusters of the chain starting at `start`, in link order.
    ///
    /// The walk stops on a zero link or on a link at or beyond the cluster
    /// count. End-of-chain markers terminate the walk through that bound.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if `start` is outside the data region or the chain loops
    pub fn cluster_chain(&self, start: u32) -> Result<Vec<u32>, FsError> {
        let limit = self.cluster_limit();
        if start < 2 || start >= limit {
            return Err(FsError::CorruptStructure(format!(
                "cluster {start} is outside the data region (limit {limit})"
            )));
        }

        let mut chain = vec![start];
        let mut cluster = start;
        loop {
            let next = self.fat[cluster as usize];
            if next < 2 || next >= limit {
                break;
            }
            if chain.len() >= limit as usize {
                return Err(FsError::CorruptStructure(format!(
                    "cluster chain starting at {start} loops"
                )));
            }
            chain.push(next);
            cluster = next;
        }

        Ok(chain)
    }

    /// Decodes the directory whose first cluster is `start`.
    ///
    /// Deleted slots are skipped, long-name fragments are accumulated and
    /// attached to the short entry that closes them.
    pub fn decode_directory(&mut self, start: u32) -> Result<Vec<Entry>, FsError> {
        let root_clus = self.boot.root_clus();
        let mut entries = vec![];
        let mut long_name = LongNameBuffer::new();

        'chain: for cluster in self.cluster_chain(start)? {
            let buf = self.read_cluster(cluster)?;

            for slot in buf.chunks_exact(SLOT_SIZE) {
                match Slot::from_slice(slot)? {
                    Slot::End => break 'chain,
                    Slot::Deleted => long_name.clear(),
                    Slot::LongName(fragment) => long_name.push(&fragment),
                    Slot::Short(dir_entry) => {
                        entries.push(dir_entry.to_entry(long_name.take(), root_clus));
                    }
                }
            }
        }

        if !long_name.is_empty() {
            warn!("directory at cluster {start} ends with orphan long-name fragments");
        }
        debug!("decoded {} entries at cluster {start}", entries.len());

        Ok(entries)
    }

    /// Reads the content of a file by following its cluster chain.
    ///
    /// The result is truncated to the size recorded in the directory entry.
    ///
    /// # Errors
    /// - `FsError::IsDirectory` if the entry is a folder
    pub fn read_file_data(&mut self, entry: &Entry) -> Result<Vec<u8>, FsError> {
        if entry.is_dir() {
            return Err(FsError::IsDirectory(entry.name().clone()));
        }
        if entry.size() == 0 {
            return Ok(vec![]);
        }

        let start = u32::try_from(entry.position()).map_err(|_| {
            FsError::CorruptStructure(format!("cluster {} out of range", entry.position()))
        })?;

        let mut data = Vec::with_capacity(entry.size() as usize);
        for cluster in self.cluster_chain(start)? {
            data.extend_from_slice(&self.read_cluster(cluster)?);
            if data.len() as u64 >= entry.size() {
                break;
            }
        }

        if (data.len() as u64) < entry.size() {
            warn!(
                "`{}`: cluster chain holds {} of {} bytes",
                entry.name(),
                data.len(),
                entry.size()
            );
        }
        data.truncate(entry.size() as usize);

        Ok(data)
    }

    /// Builds the root folder and decodes its children.
    pub fn root_entry(&mut self) -> Result<Entry, FsError> {
        let root_clus = self.boot.root_clus();
        let root = Entry::new(
            EntryKind::folder(),
            String::new(),
            Attributes::from_bits(Attributes::DIRECTORY),
            root_clus as u64,
            0,
            0,
            0,
        );
        root.attach_children(self.decode_directory(root_clus)?)?;

        Ok(root)
    }
}

/// Implements the LayoutDisplay trait for a FAT32 volume
impl<R: BlockReader> LayoutDisplay for Fat32Vol<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());

        writeln!(out, "{}┌{:─^55}┐", indent, " FAT32 Volume Layout ")?;
        writeln!(
            out,
            "{}├{:^12}┬{:^12}┬{:^12}┬{:^16}┤",
            indent, "Region", "Start", "End", "Description"
        )?;
        writeln!(
            out,
            "{}├{:─<12}┼{:─<12}┼{:─<12}┼{:─<16}┤",
            indent, "", "", "", ""
        )?;

        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Reserved",
            0,
            self.fat_start(),
            "Boot + Reserved"
        )?;
        for i in 0..self.boot.bpb().num_fat() {
            let fat_i_start = self.fat_start() + i as u64 * self.boot.fat_sz_32() as u64;
            let fat_i_end = fat_i_start + self.boot.fat_sz_32() as u64;
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent,
                format!("FAT #{}", i),
                fat_i_start,
                fat_i_end,
                "FAT Tables"
            )?;
        }
        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Data",
            self.data_start(),
            self.data_end(),
            "Cluster Data"
        )?;
        let end = self.boot.bpb().tot_sec_32() as u64;
        if self.data_end() < end {
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent,
                "",
                self.data_end(),
                end,
                "Volume Slack"
            )?;
        }

        writeln!(
            out,
            "{}└{:─<12}┴{:─<12}┴{:─<12}┴{:─<16}┘",
            indent, "", "", "", ""
        )?;

        Ok(out)
    }
}
