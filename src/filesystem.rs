//! Filesystem detection and format-agnostic access to a mounted volume.
//!
//! [`VolumeHandle`] reads the boot sector, picks the FAT32 or NTFS driver and
//! exposes the volume as a tree of [`Entry`] values. Directory listings and
//! file contents are decoded from the device on every call.

pub mod bpb;
pub mod entry;
pub mod fat;
pub mod fs_error;
pub mod ntfs;
pub mod timestamp;

use log::{debug, warn};
use std::collections::HashSet;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::path::Path;

use crate::disk::{BlockReader, open_device};
use crate::traits::{LayoutDisplay, TreeDisplay};
use bpb::{FsKind, MftRecordSize, read_boot_sector};
use entry::Entry;
use fat::Fat32Vol;
use fs_error::FsError;
use ntfs::NtfsVol;

/// Deepest folder level rendered by the tree display.
const MAX_TREE_DEPTH: usize = 64;

/// A mounted volume of one of the supported formats.
pub enum Volume<R: BlockReader> {
    Fat32(Fat32Vol<R>),
    Ntfs(NtfsVol<R>),
}

/// Boot sector summary of a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeInfo {
    Fat32 {
        bytes_per_sector: u16,
        sectors_per_cluster: u8,
        reserved_sectors: u16,
        hidden_sectors: u32,
        media: u8,
        total_sectors: u64,
        fat_count: u8,
        fat_size: u32,
        root_cluster: u32,
        volume_id: u32,
        volume_label: String,
    },
    Ntfs {
        bytes_per_sector: u16,
        sectors_per_cluster: u64,
        reserved_sectors: u16,
        hidden_sectors: u32,
        media: u8,
        total_sectors: u64,
        mft_lcn: u64,
        mft_mirror_lcn: u64,
        mft_record_size: MftRecordSize,
        index_block_size: MftRecordSize,
        serial_number: u64,
    },
}

impl LayoutDisplay for VolumeInfo {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());

        let rows: Vec<(&str, String)> = match self {
            VolumeInfo::Fat32 {
                bytes_per_sector,
                sectors_per_cluster,
                reserved_sectors,
                hidden_sectors,
                media,
                total_sectors,
                fat_count,
                fat_size,
                root_cluster,
                volume_id,
                volume_label,
            } => vec![
                ("Filesystem", FsKind::Fat32.to_string()),
                ("Bytes/sector", bytes_per_sector.to_string()),
                ("Sectors/cluster", sectors_per_cluster.to_string()),
                ("Reserved sectors", reserved_sectors.to_string()),
                ("Hidden sectors", hidden_sectors.to_string()),
                ("Media", format!("0x{media:02X}")),
                ("Total sectors", total_sectors.to_string()),
                ("FAT count", fat_count.to_string()),
                ("FAT size", fat_size.to_string()),
                ("Root cluster", root_cluster.to_string()),
                ("Volume ID", format!("0x{volume_id:08X}")),
                ("Volume label", volume_label.clone()),
            ],
            VolumeInfo::Ntfs {
                bytes_per_sector,
                sectors_per_cluster,
                reserved_sectors,
                hidden_sectors,
                media,
                total_sectors,
                mft_lcn,
                mft_mirror_lcn,
                mft_record_size,
                index_block_size,
                serial_number,
            } => vec![
                ("Filesystem", FsKind::Ntfs.to_string()),
                ("Bytes/sector", bytes_per_sector.to_string()),
                ("Sectors/cluster", sectors_per_cluster.to_string()),
                ("Reserved sectors", reserved_sectors.to_string()),
                ("Hidden sectors", hidden_sectors.to_string()),
                ("Media", format!("0x{media:02X}")),
                ("Total sectors", total_sectors.to_string()),
                ("MFT LCN", mft_lcn.to_string()),
                ("MFT mirror LCN", mft_mirror_lcn.to_string()),
                ("MFT record size", mft_record_size.to_string()),
                ("Index block size", index_block_size.to_string()),
                ("Serial number", format!("0x{serial_number:016X}")),
            ],
        };

        writeln!(out, "{}┌{:─^43}┐", indent, " Volume Information ")?;
        for (name, value) in rows {
            writeln!(out, "{}│ {:<18}│ {:<22}│", indent, name, value)?;
        }
        writeln!(out, "{}└{:─<19}┴{:─<23}┘", indent, "", "")?;

        Ok(out)
    }
}

/// Format-agnostic handle over a mounted volume.
///
/// The root folder is decoded at mount time; every other listing or file read
/// goes back to the device.
pub struct VolumeHandle<R: BlockReader> {
    volume: Volume<R>,
    root: Entry,
}

impl VolumeHandle<File> {
    /// Opens a device or image file read-only and mounts it.
    ///
    /// # Errors
    /// - `FsError::IOError` if the file cannot be opened or read
    /// - `FsError::UnsupportedFilesystem` if no known signature is found
    /// - Validation variants if `validate` is true and the boot sector is invalid
    pub fn mount(path: &Path, validate: bool) -> Result<Self, FsError> {
        let device = open_device(path)?;
        Self::from_reader(device, validate)
    }
}

impl<R: BlockReader> VolumeHandle<R> {
    /// Mounts the volume starting at offset 0 of `reader`.
    pub fn from_reader(mut reader: R, validate: bool) -> Result<Self, FsError> {
        let sector = read_boot_sector(&mut reader)?;
        let kind = FsKind::detect(&sector)?;
        debug!("boot sector signature: {kind}");

        let mut volume = match kind {
            FsKind::Fat32 => Volume::Fat32(Fat32Vol::mount(reader, &sector, validate)?),
            FsKind::Ntfs => Volume::Ntfs(NtfsVol::mount(reader, &sector, validate)?),
        };
        let root = match &mut volume {
            Volume::Fat32(vol) => vol.root_entry()?,
            Volume::Ntfs(vol) => vol.root_entry()?,
        };

        Ok(VolumeHandle { volume, root })
    }

    pub fn kind(&self) -> FsKind {
        match self.volume {
            Volume::Fat32(_) => FsKind::Fat32,
            Volume::Ntfs(_) => FsKind::Ntfs,
        }
    }

    pub fn volume(&self) -> &Volume<R> {
        &self.volume
    }

    /// The root folder, children attached.
    pub fn root(&self) -> &Entry {
        &self.root
    }

    /// Summarizes the boot sector of the mounted volume.
    pub fn volume_info(&self) -> Result<VolumeInfo, FsError> {
        Ok(match &self.volume {
            Volume::Fat32(vol) => {
                let bs = vol.boot_sector();
                VolumeInfo::Fat32 {
                    bytes_per_sector: bs.bpb().bytes_per_sec(),
                    sectors_per_cluster: bs.bpb().sec_per_clus(),
                    reserved_sectors: bs.bpb().rsvd_sec_cnt(),
                    hidden_sectors: bs.bpb().hidd_sec(),
                    media: bs.bpb().media(),
                    total_sectors: bs.bpb().tot_sec_32() as u64,
                    fat_count: bs.bpb().num_fat(),
                    fat_size: bs.fat_sz_32(),
                    root_cluster: bs.root_clus(),
                    volume_id: bs.vol_id(),
                    volume_label: String::from_utf8_lossy(&bs.vol_lab()).trim_end().to_string(),
                }
            }
            Volume::Ntfs(vol) => {
                let bs = vol.boot_sector();
                VolumeInfo::Ntfs {
                    bytes_per_sector: bs.bpb().bytes_per_sec(),
                    sectors_per_cluster: bs.sectors_per_cluster()?,
                    reserved_sectors: bs.bpb().rsvd_sec_cnt(),
                    hidden_sectors: bs.bpb().hidd_sec(),
                    media: bs.bpb().media(),
                    total_sectors: u64::try_from(bs.number_of_sectors()).unwrap_or(0),
                    mft_lcn: bs.mft_lcn(),
                    mft_mirror_lcn: bs.mftmirr_lcn(),
                    mft_record_size: bs.mft_record_size()?,
                    index_block_size: bs.index_record_size()?,
                    serial_number: bs.volume_serial_number(),
                }
            }
        })
    }

    /// Decodes the children of a folder.
    ///
    /// # Errors
    /// - `FsError::NotADirectory` if `folder` is a file
    pub fn list_directory(&mut self, folder: &Entry) -> Result<Vec<Entry>, FsError> {
        if !folder.is_dir() {
            return Err(FsError::NotADirectory(folder.name().clone()));
        }

        match &mut self.volume {
            Volume::Fat32(vol) => {
                let start = u32::try_from(folder.position()).map_err(|_| {
                    FsError::CorruptStructure(format!("cluster {} out of range", folder.position()))
                })?;
                vol.decode_directory(start)
            }
            Volume::Ntfs(vol) => vol.list_directory(folder),
        }
    }

    /// Finds the child of `folder` called `name`.
    ///
    /// An exact match is preferred over an ASCII case-insensitive one.
    ///
    /// # Errors
    /// - `FsError::NotFound` if no child has that name
    pub fn open_path(&mut self, folder: &Entry, name: &str) -> Result<Entry, FsError> {
        let mut children = self.list_directory(folder)?;
        let pos = children
            .iter()
            .position(|e| e.name() == name)
            .or_else(|| children.iter().position(|e| e.name().eq_ignore_ascii_case(name)))
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        Ok(children.swap_remove(pos))
    }

    /// Reads the content of a file.
    ///
    /// # Errors
    /// - `FsError::IsDirectory` if `entry` is a folder
    pub fn read_file_content(&mut self, entry: &Entry) -> Result<Vec<u8>, FsError> {
        if entry.is_dir() {
            return Err(FsError::IsDirectory(entry.name().clone()));
        }

        match &mut self.volume {
            Volume::Fat32(vol) => vol.read_file_data(entry),
            Volume::Ntfs(vol) => vol.read_file_data(entry),
        }
    }

    /// Returns a copy of `entry` with its children or content attached.
    ///
    /// A file whose size is unknown takes the length of its content.
    pub fn load(&mut self, entry: &Entry) -> Result<Entry, FsError> {
        let mut loaded = entry.detached();
        if loaded.is_dir() {
            loaded.attach_children(self.list_directory(entry)?)?;
        } else {
            let content = self.read_file_content(entry)?;
            if loaded.size() == 0 {
                loaded.set_size(content.len() as u64);
            }
            loaded.attach_content(content)?;
        }

        Ok(loaded)
    }

    fn write_tree(
        &mut self,
        out: &mut String,
        folder: &Entry,
        depth: usize,
        path: &mut HashSet<u64>,
    ) -> Result<(), FsError> {
        let indent = " ".repeat(depth * 3);
        let children = match folder.children() {
            Some(children) => children.to_vec(),
            None => self.list_directory(folder)?,
        };

        for entry in children {
            writeln!(out, "{indent} {entry}")
                .map_err(|e| FsError::CorruptStructure(e.to_string()))?;
            if !entry.is_regular_dir() {
                continue;
            }
            if depth + 1 >= MAX_TREE_DEPTH || !path.insert(entry.position()) {
                warn!("`{}`: not descending, folder nesting too deep or cyclic", entry.name());
                continue;
            }

            if let Err(err) = self.write_tree(out, &entry, depth + 1, path) {
                warn!("`{}`: {err}", entry.name());
            }
            path.remove(&entry.position());
        }

        Ok(())
    }
}

impl<R: BlockReader> TreeDisplay for VolumeHandle<R> {
    fn display_tree(&mut self) -> Result<String, FsError> {
        let mut out = String::new();
        let root = self.root.clone();
        let mut path = HashSet::from([root.position()]);
        self.write_tree(&mut out, &root, 0, &mut path)?;

        Ok(out)
    }
}

impl<R: BlockReader> LayoutDisplay for VolumeHandle<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        match &self.volume {
            Volume::Fat32(vol) => vol.display_layout(indent),
            Volume::Ntfs(vol) => vol.display_layout(indent),
        }
    }
}
