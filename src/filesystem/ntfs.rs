//! NTFS volume structure and operations.
//!
//! This module implements the core functions to interact with an NTFS volume:
//! - Locating MFT records, including on a fragmented MFT
//! - Decoding record attributes, attribute lists and run lists
//! - Listing directories through their `$I30` index
//! - Reading the unnamed data stream of files
//! - Displaying the volume layout

pub mod attribute;
pub mod data_run;
pub mod index;
pub mod record;

use log::{debug, warn};
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::fmt::Write as FmtWrite;

use super::bpb::NtfsBootSector;
use super::entry::{Attributes, Entry, EntryKind};
use super::fs_error::FsError;
use super::timestamp::filetime_to_unix;
use crate::disk::BlockReader;
use crate::traits::LayoutDisplay;
use attribute::{
    ATTR_ATTRIBUTE_LIST, ATTR_DATA, ATTR_FILE_NAME, ATTR_INDEX_ALLOCATION, ATTR_INDEX_ROOT,
    ATTR_STANDARD_INFORMATION, Attribute, AttributeValue, FileName, I30, StandardInformation,
    group_chains, parse_attribute_list, parse_attributes,
};
use data_run::{DataRun, total_clusters};
use index::read_directory_index;
use record::{FILE_MAGIC, RecordHeader, check_and_fix};

/// MFT record of the root directory.
pub const ROOT_RECORD: u64 = 5;

/// Attribute flags of values the driver returns as stored.
const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;

/// Where the MFT records are.
#[derive(Debug)]
enum MftLayout {
    /// Records follow each other from this byte offset
    Contiguous(u64),
    /// Records are spread over the runs of the `$MFT` data stream
    Mapped(Vec<DataRun>),
}

/// Attribute values worth materializing for one decode call.
#[derive(Debug, Clone, Copy)]
struct Wanted {
    data: bool,
    index: bool,
}

impl Wanted {
    const DATA: Wanted = Wanted {
        data: true,
        index: false,
    };
    const INDEX: Wanted = Wanted {
        data: false,
        index: true,
    };
}

/// What the driver keeps from a decoded record.
#[derive(Debug, Default)]
struct RecordContents {
    is_directory: bool,
    standard_information: Option<StandardInformation>,
    file_name: Option<FileName>,
    data: Option<Vec<u8>>,
    index_root: Option<Vec<u8>>,
    index_allocation: Option<Vec<u8>>,
}

/// A mounted NTFS volume.
pub struct NtfsVol<R: BlockReader> {
    reader: R,
    boot: NtfsBootSector,
    cluster_size: u64,
    record_len: u64,
    total_clusters: u64,
    record_count: u64,
    mft: MftLayout,
}

/// Fills `buf` with the bytes found at `pos` of a stream described by `runs`.
fn read_mapped<R: BlockReader>(
    reader: &mut R,
    runs: &[DataRun],
    cluster_size: u64,
    mut pos: u64,
    buf: &mut [u8],
) -> Result<(), FsError> {
    let mut filled = 0;
    let mut run_start = 0u64;
    for run in runs {
        if filled == buf.len() {
            return Ok(());
        }

        let run_end = run_start.saturating_add(run.length.saturating_mul(cluster_size));
        if pos >= run_start && pos < run_end {
            let n = (run_end - pos).min((buf.len() - filled) as u64) as usize;
            let chunk = &mut buf[filled..filled + n];
            match run.lcn {
                Some(lcn) => reader.read_at(lcn * cluster_size + (pos - run_start), chunk)?,
                None => chunk.fill(0),
            }
            filled += n;
            pos += n as u64;
        }
        run_start = run_end;
    }

    if filled == buf.len() {
        Ok(())
    } else {
        Err(FsError::CorruptStructure(format!(
            "stream offset {pos} is not covered by its run list"
        )))
    }
}

impl<R: BlockReader> NtfsVol<R> {
    /// Mounts an NTFS volume from its already read first sector.
    ///
    /// # Errors
    /// - `FsError::InvalidBootSector` if the geometry cannot describe a volume
    /// - `FsError::CorruptStructure` if the `$MFT` record cannot be decoded
    /// - Various validation variants if `validate` is true and the boot sector is invalid
    pub fn mount(reader: R, sector: &[u8], validate: bool) -> Result<Self, FsError> {
        let boot = NtfsBootSector::from_sector(sector, validate)?;
        let cluster_size = boot.cluster_size()?;
        if cluster_size == 0 {
            return Err(FsError::InvalidBootSector(String::from(
                "bytes per sector is zero",
            )));
        }

        let record_len = boot.mft_record_size()?.byte_len(cluster_size);
        if !(512..=65536).contains(&record_len) || record_len % 512 != 0 {
            return Err(FsError::InvalidBootSector(format!(
                "unusable MFT record size of {record_len} bytes"
            )));
        }

        let total_sectors = u64::try_from(boot.number_of_sectors()).unwrap_or(0);
        let total_clusters = total_sectors / boot.sectors_per_cluster()?;
        let mft_lcn = boot.mft_lcn();
        if mft_lcn >= total_clusters {
            return Err(FsError::InvalidBootSector(format!(
                "MFT LCN {mft_lcn} is outside the volume of {total_clusters} clusters"
            )));
        }

        // Every LCN below `total_clusters` maps to a byte offset that fits in u64.
        if total_clusters.checked_mul(cluster_size).is_none() {
            return Err(FsError::InvalidBootSector(format!(
                "{total_clusters} clusters of {cluster_size} bytes overflow a byte offset"
            )));
        }

        let mut vol = NtfsVol {
            reader,
            boot,
            cluster_size,
            record_len,
            total_clusters,
            record_count: (total_clusters - mft_lcn) * cluster_size / record_len,
            mft: MftLayout::Contiguous(mft_lcn * cluster_size),
        };
        vol.map_mft()?;
        debug!(
            "mounted NTFS volume: cluster size {}, record size {}, {} MFT records",
            vol.cluster_size, vol.record_len, vol.record_count
        );

        Ok(vol)
    }

    pub fn boot_sector(&self) -> &NtfsBootSector {
        &self.boot
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    pub fn record_len(&self) -> u64 {
        self.record_len
    }

    /// Replaces the contiguous MFT assumption by the run list of `$MFT` itself.
    fn map_mft(&mut self) -> Result<(), FsError> {
        let record = self.read_mft_record(0)?;
        let attributes = parse_attributes(&record, 0)?;
        let data = attributes
            .iter()
            .find(|a| a.type_code() == ATTR_DATA && a.name().is_empty())
            .map(Attribute::value);

        match data {
            Some(AttributeValue::NonResident {
                runs,
                data_size,
                highest_vcn,
                ..
            }) => {
                let mapped = self.check_runs(runs)?;
                if highest_vcn.saturating_add(1) > mapped {
                    warn!(
                        "$MFT data continues in extension records, only {mapped} clusters are mapped"
                    );
                }
                let bytes = (*data_size).min(mapped.saturating_mul(self.cluster_size));
                self.record_count = bytes / self.record_len;
                self.mft = MftLayout::Mapped(runs.clone());
                debug!("$MFT mapped over {} runs", runs.len());
            }
            _ => warn!("$MFT has no non-resident data stream, assuming a contiguous MFT"),
        }

        Ok(())
    }

    /// Reads MFT record `index` and restores its fixups.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if the index is beyond the MFT, the magic is
    ///   not `FILE`, or the update sequence does not match
    pub fn read_mft_record(&mut self, index: u64) -> Result<Vec<u8>, FsError> {
        if index >= self.record_count {
            return Err(FsError::CorruptStructure(format!(
                "MFT record {index} is beyond the {} known records",
                self.record_count
            )));
        }

        let mut record = vec![0u8; self.record_len as usize];
        let pos = index * self.record_len;
        match &self.mft {
            MftLayout::Contiguous(start) => self.reader.read_at(start + pos, &mut record)?,
            MftLayout::Mapped(runs) => {
                read_mapped(&mut self.reader, runs, self.cluster_size, pos, &mut record)?
            }
        }

        check_and_fix(&mut record, FILE_MAGIC).map_err(|err| match err {
            FsError::CorruptStructure(msg) => {
                FsError::CorruptStructure(format!("MFT record {index}: {msg}"))
            }
            other => other,
        })?;

        Ok(record)
    }

    /// Checks that a run list stays inside the volume and returns its length
    /// in clusters.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if the runs add up to more clusters than
    ///   the volume holds, or one run ends past the last cluster
    fn check_runs(&self, runs: &[DataRun]) -> Result<u64, FsError> {
        let clusters = total_clusters(runs)?;
        if clusters > self.total_clusters {
            return Err(FsError::CorruptStructure(format!(
                "run list of {clusters} clusters exceeds the volume"
            )));
        }
        for run in runs {
            if let Some(lcn) = run.lcn {
                if lcn.saturating_add(run.length) > self.total_clusters {
                    return Err(FsError::CorruptStructure(format!(
                        "run at LCN {lcn} of {} clusters exceeds the volume",
                        run.length
                    )));
                }
            }
        }

        Ok(clusters)
    }

    /// Reads every cluster of a run list, sparse runs as zeros.
    fn read_runs(&mut self, runs: &[DataRun]) -> Result<Vec<u8>, FsError> {
        let clusters = self.check_runs(runs)?;
        let mut buf = vec![0u8; (clusters * self.cluster_size) as usize];
        read_mapped(&mut self.reader, runs, self.cluster_size, 0, &mut buf)?;
        Ok(buf)
    }

    /// Concatenates the values of a chain of attribute headers.
    ///
    /// A non-resident value is cut to the data size of its first header, and
    /// bytes past the initialized size read as zeros.
    fn chain_value(&mut self, chain: &[Attribute]) -> Result<Vec<u8>, FsError> {
        let mut value = vec![];
        for attr in chain {
            match attr.value() {
                AttributeValue::Resident(bytes) => value.extend_from_slice(bytes),
                AttributeValue::NonResident { runs, .. } => value.extend(self.read_runs(runs)?),
            }
        }

        if let Some(AttributeValue::NonResident {
            data_size,
            initialized_size,
            ..
        }) = chain.first().map(Attribute::value)
        {
            value.truncate(*data_size as usize);
            let initialized = (*initialized_size as usize).min(value.len());
            value[initialized..].fill(0);
        }

        Ok(value)
    }

    /// Returns the attributes of record `index` in order, following its
    /// attribute list into extension records when there is one.
    fn collect_attributes(&mut self, index: u64, record: &[u8]) -> Result<Vec<Attribute>, FsError> {
        let attributes = parse_attributes(record, index)?;
        let Some(list_attr) = attributes
            .iter()
            .find(|a| a.type_code() == ATTR_ATTRIBUTE_LIST)
        else {
            return Ok(attributes);
        };

        let list = parse_attribute_list(&self.chain_value(std::slice::from_ref(list_attr))?)?;
        let mut records: HashMap<u64, Vec<Attribute>> = HashMap::new();
        records.insert(index, attributes);

        let mut ordered = Vec::with_capacity(list.len());
        for item in &list {
            let held = match records.entry(item.record_index()) {
                MapEntry::Occupied(held) => held.into_mut(),
                MapEntry::Vacant(slot) => {
                    let raw = self.read_mft_record(item.record_index())?;
                    slot.insert(parse_attributes(&raw, item.record_index())?)
                }
            };

            let pos = held
                .iter()
                .position(|a| a.type_code() == item.type_code() && a.instance() == item.instance())
                .ok_or_else(|| {
                    FsError::CorruptStructure(format!(
                        "record {index}: listed attribute {:#x} instance {} not found in record {}",
                        item.type_code(),
                        item.instance(),
                        item.record_index()
                    ))
                })?;
            ordered.push(held.swap_remove(pos));
        }
        debug!(
            "record {index}: {} listed attributes across {} records",
            ordered.len(),
            records.len()
        );

        Ok(ordered)
    }

    /// Decodes record `index`, materializing only the wanted streams.
    fn decode_record(&mut self, index: u64, wanted: Wanted) -> Result<RecordContents, FsError> {
        let record = self.read_mft_record(index)?;
        let header = RecordHeader::parse(&record)?;
        let attributes = self.collect_attributes(index, &record)?;

        let mut contents = RecordContents {
            is_directory: header.is_directory(),
            ..Default::default()
        };

        for chain in group_chains(attributes) {
            let first = &chain[0];
            match first.type_code() {
                ATTR_STANDARD_INFORMATION => {
                    let value = self.chain_value(&chain)?;
                    contents.standard_information = Some(StandardInformation::parse(&value)?);
                }
                ATTR_FILE_NAME => {
                    let name = FileName::parse(&self.chain_value(&chain)?)?;
                    let better = contents
                        .file_name
                        .as_ref()
                        .is_none_or(|kept| name.namespace_rank() >= kept.namespace_rank());
                    if better {
                        contents.file_name = Some(name);
                    }
                }
                ATTR_DATA if wanted.data && first.name().is_empty() => {
                    if first.flags() & (ATTR_FLAG_COMPRESSED | ATTR_FLAG_ENCRYPTED) != 0 {
                        warn!("record {index}: data stream is compressed or encrypted, returned as stored");
                    }
                    contents.data = Some(self.chain_value(&chain)?);
                }
                ATTR_INDEX_ROOT if wanted.index && first.name() == I30 => {
                    contents.index_root = Some(self.chain_value(&chain)?);
                }
                ATTR_INDEX_ALLOCATION if wanted.index && first.name() == I30 => {
                    contents.index_allocation = Some(self.chain_value(&chain)?);
                }
                _ => {}
            }
        }

        Ok(contents)
    }

    /// Builds the entry of a record from its own attributes.
    fn record_entry(index: u64, contents: &RecordContents) -> Entry {
        let name = contents
            .file_name
            .as_ref()
            .map(FileName::name)
            .unwrap_or_default();

        let mut attributes = contents
            .standard_information
            .as_ref()
            .map(|si| si.attributes().bits())
            .unwrap_or_default();
        let kind = if contents.is_directory {
            attributes |= Attributes::DIRECTORY;
            EntryKind::folder()
        } else {
            EntryKind::for_file_name(&name)
        };

        let size = match (&contents.data, &contents.file_name) {
            (Some(data), _) => data.len() as u64,
            (None, Some(file_name)) => file_name.data_size(),
            (None, None) => 0,
        };
        let last_modified = match (&contents.standard_information, &contents.file_name) {
            (Some(si), _) => si.last_modified(),
            (None, Some(file_name)) => filetime_to_unix(file_name.modification_time()),
            (None, None) => 0,
        };

        Entry::new(
            kind,
            name,
            Attributes::from_bits(attributes),
            index,
            contents
                .file_name
                .as_ref()
                .map(FileName::parent_index)
                .unwrap_or_default(),
            size,
            last_modified,
        )
    }

    fn directory_entries(
        &self,
        name: &str,
        index: u64,
        contents: RecordContents,
    ) -> Result<Vec<Entry>, FsError> {
        if !contents.is_directory {
            return Err(FsError::NotADirectory(name.to_string()));
        }

        let Some(root) = contents.index_root else {
            warn!("record {index}: directory without a $I30 index root");
            return Ok(vec![]);
        };
        let entries = read_directory_index(
            &root,
            contents.index_allocation.as_deref(),
            self.cluster_size,
        )?;
        debug!("record {index}: {} directory entries", entries.len());

        Ok(entries)
    }

    /// Lists the folder whose MFT record is `folder.position()`.
    ///
    /// # Errors
    /// - `FsError::NotADirectory` if the record is not a directory
    /// - `FsError::CorruptStructure` if the record or its index is malformed
    pub fn list_directory(&mut self, folder: &Entry) -> Result<Vec<Entry>, FsError> {
        let contents = self.decode_record(folder.position(), Wanted::INDEX)?;
        self.directory_entries(folder.name(), folder.position(), contents)
    }

    /// Reads the unnamed data stream of a file.
    ///
    /// # Errors
    /// - `FsError::IsDirectory` if the entry is a folder
    /// - `FsError::CorruptStructure` if the record or its run list is malformed
    pub fn read_file_data(&mut self, entry: &Entry) -> Result<Vec<u8>, FsError> {
        if entry.is_dir() {
            return Err(FsError::IsDirectory(entry.name().clone()));
        }

        let contents = self.decode_record(entry.position(), Wanted::DATA)?;
        match contents.data {
            Some(data) => Ok(data),
            None => {
                warn!("record {}: no unnamed data stream", entry.position());
                Ok(vec![])
            }
        }
    }

    /// Builds the root folder and decodes its children.
    pub fn root_entry(&mut self) -> Result<Entry, FsError> {
        let contents = self.decode_record(ROOT_RECORD, Wanted::INDEX)?;
        let mut root = Self::record_entry(ROOT_RECORD, &contents);
        if !root.is_dir() {
            return Err(FsError::CorruptStructure(String::from(
                "root record is not a directory",
            )));
        }
        root.set_name(String::new());

        let children = self.directory_entries("", ROOT_RECORD, contents)?;
        root.attach_children(children)?;

        Ok(root)
    }
}

/// Implements the LayoutDisplay trait for an NTFS volume
impl<R: BlockReader> LayoutDisplay for NtfsVol<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());
        let spc = self.cluster_size / self.boot.bpb().bytes_per_sec() as u64;

        writeln!(out, "{}┌{:─^55}┐", indent, " NTFS Volume Layout ")?;
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
            indent, "Boot", 0, 1, "Boot Sector"
        )?;
        match &self.mft {
            MftLayout::Contiguous(start) => {
                let first = start / self.boot.bpb().bytes_per_sec() as u64;
                let len = self.record_count * self.record_len / self.boot.bpb().bytes_per_sec() as u64;
                writeln!(
                    out,
                    "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                    indent,
                    "$MFT",
                    first,
                    first + len,
                    "Contiguous MFT"
                )?;
            }
            MftLayout::Mapped(runs) => {
                for (i, run) in runs.iter().enumerate() {
                    let Some(lcn) = run.lcn else { continue };
                    writeln!(
                        out,
                        "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                        indent,
                        format!("$MFT #{}", i),
                        lcn * spc,
                        (lcn + run.length) * spc,
                        "MFT Records"
                    )?;
                }
            }
        }
        let mirror = self.boot.mftmirr_lcn() * spc;
        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "$MFTMirr",
            mirror,
            mirror + (4 * self.record_len).div_ceil(self.boot.bpb().bytes_per_sec() as u64),
            "MFT Mirror"
        )?;
        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Volume",
            0,
            self.total_clusters * spc,
            "Clusters"
        )?;

        writeln!(
            out,
            "{}└{:─<12}┴{:─<12}┴{:─<12}┴{:─<16}┘",
            indent, "", "", "", ""
        )?;

        Ok(out)
    }
}
