//! Boot sector structures for FAT32 and NTFS volumes.
//!
//! This module implements:
//! - The common BIOS Parameter Block (Bpb) shared by both formats
//! - The FAT32 and NTFS extended boot sectors
//! - Filesystem detection from the signatures of the first sector
//! - Validation of the fields the drivers rely on

use binread::{BinRead, BinReaderExt};
use getset::CopyGetters;
use std::fmt;
use std::io;

use super::fs_error::FsError;
use crate::disk::BlockReader;

/// Size of the boot sector read at mount time.
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Offset of the `"FAT32"` file system type label.
const FAT32_SIG_OFFSET: usize = 0x52;
/// Offset of the `"NTFS"` OEM identifier.
const NTFS_SIG_OFFSET: usize = 0x03;

/// The filesystems recognized by their boot sector signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Fat32,
    Ntfs,
}

impl FsKind {
    /// Detects the filesystem of a volume from its first sector.
    ///
    /// # Errors
    /// - `FsError::UnsupportedFilesystem` if neither signature is present
    pub fn detect(sector: &[u8]) -> Result<FsKind, FsError> {
        let has_sig = |offset: usize, sig: &[u8]| {
            sector
                .get(offset..offset + sig.len())
                .is_some_and(|bytes| bytes == sig)
        };

        if has_sig(FAT32_SIG_OFFSET, b"FAT32") {
            Ok(FsKind::Fat32)
        } else if has_sig(NTFS_SIG_OFFSET, b"NTFS") {
            Ok(FsKind::Ntfs)
        } else {
            Err(FsError::UnsupportedFilesystem)
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsKind::Fat32 => "FAT32",
            FsKind::Ntfs => "NTFS",
        };
        write!(f, "{s}")
    }
}

/// Reads the first sector of a device.
pub fn read_boot_sector<R: BlockReader>(reader: &mut R) -> Result<Vec<u8>, FsError> {
    Ok(reader.read_vec(0, BOOT_SECTOR_SIZE)?)
}

/// BIOS Parameter Block common to FAT32 and NTFS.
///
/// Covers the jump instruction, the OEM name and the 25-byte parameter block
/// from offset 0x0B to 0x24.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
pub struct Bpb {
    /// Jump instruction to boot code (0xEB ?? 0x90 or 0xE9 ?? ??)
    #[get_copy = "pub"]
    jmp: [u8; 3],
    /// OEM identifier ("MSWIN4.1", "NTFS    ", ...)
    #[get_copy = "pub"]
    oem_name: [u8; 8],
    /// Number of bytes per sector
    #[get_copy = "pub"]
    bytes_per_sec: u16,
    /// Number of sectors per cluster (NTFS may use the signed power-of-two form)
    #[get_copy = "pub"]
    sec_per_clus: u8,
    /// Number of reserved sectors from start of volume
    #[get_copy = "pub"]
    rsvd_sec_cnt: u16,
    /// Number of FAT copies (0 on NTFS)
    #[get_copy = "pub"]
    num_fat: u8,
    /// Maximum number of root directory entries (0 for FAT32 and NTFS)
    #[get_copy = "pub"]
    root_ent_cnt: u16,
    /// Total sectors for small volumes (0 for FAT32 and NTFS)
    #[get_copy = "pub"]
    tot_sec_16: u16,
    /// Media descriptor (0xF8 for fixed disk)
    #[get_copy = "pub"]
    media: u8,
    /// Sectors per FAT for FAT12/FAT16 (0 for FAT32 and NTFS)
    #[get_copy = "pub"]
    fat_sz_16: u16,
    /// Sectors per track
    #[get_copy = "pub"]
    sec_per_trk: u16,
    /// Number of heads
    #[get_copy = "pub"]
    num_heads: u16,
    /// Number of hidden sectors preceding the partition
    #[get_copy = "pub"]
    hidd_sec: u32,
    /// Total sectors on FAT32 (unused on NTFS)
    #[get_copy = "pub"]
    tot_sec_32: u32,
}

impl Bpb {
    fn validate_common(&self) -> Result<(), FsError> {
        const VALID_BYTES_PER_SEC: [u16; 4] = [512, 1024, 2048, 4096];
        if !VALID_BYTES_PER_SEC.contains(&self.bytes_per_sec) {
            return Err(FsError::InvalidBytesPerSec(self.bytes_per_sec));
        }
        Ok(())
    }

    fn write_fields(&self, f: &mut fmt::Formatter<'_>, offset: &mut usize) -> fmt::Result {
        macro_rules! field {
            ($name:expr, $val:expr, $size:expr) => {{
                writeln!(f, "  {:<20} 0x{:>04X}: {}", $name, *offset, $val)?;
                *offset += $size;
            }};
        }

        field!("jmp", format!("{:02X?}", self.jmp), 3);
        field!("oem_name", String::from_utf8_lossy(&self.oem_name), 8);
        field!("bytes_per_sec", self.bytes_per_sec, 2);
        field!("sec_per_clus", self.sec_per_clus, 1);
        field!("rsvd_sec_cnt", self.rsvd_sec_cnt, 2);
        field!("num_fat", self.num_fat, 1);
        field!("root_ent_cnt", self.root_ent_cnt, 2);
        field!("tot_sec_16", self.tot_sec_16, 2);
        field!("media", format!("0x{:X}", self.media), 1);
        field!("fat_sz_16", self.fat_sz_16, 2);
        field!("sec_per_trk", self.sec_per_trk, 2);
        field!("num_heads", self.num_heads, 2);
        field!("hidd_sec", self.hidd_sec, 4);
        field!("tot_sec_32", self.tot_sec_32, 4);

        Ok(())
    }
}

fn check_signature(sig: [u8; 2]) -> Result<(), FsError> {
    const SIG: [u8; 2] = [0x55, 0xAA];
    if sig != SIG {
        return Err(FsError::InvalidSignature(format!(
            "0x{:02X}{:02X}",
            sig[0], sig[1]
        )));
    }
    Ok(())
}

/// FAT32 boot sector: the common Bpb followed by the FAT32 extension.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
pub struct Fat32BootSector {
    bpb: Bpb,
    /// Sectors per FAT
    #[get_copy = "pub"]
    fat_sz_32: u32,
    /// FAT flags (mirroring, active FAT)
    ext_flags: u16,
    /// Filesystem version (should be 0:0)
    fs_ver: u16,
    /// First cluster of root directory (typically 2)
    #[get_copy = "pub"]
    root_clus: u32,
    /// Sector number of FSINFO structure
    fs_info: u16,
    /// Sector number of backup boot sector
    bk_boot_sec: u16,
    /// Reserved for future expansion
    reserved: [u8; 12],
    /// Drive number (0x80 for hard disk)
    drv_num: u8,
    /// Reserved (used by Windows NT)
    reserved_1: u8,
    /// Extended boot signature (0x29)
    boot_sig: u8,
    /// Volume serial number
    #[get_copy = "pub"]
    vol_id: u32,
    /// Volume label (11 bytes)
    #[get_copy = "pub"]
    vol_lab: [u8; 11],
    /// Filesystem type label ("FAT32   ")
    fil_sys_type: [u8; 8],
    /// Boot code
    #[br(count = 420)]
    boot_code: Vec<u8>,
    /// Boot sector signature (0x55 0xAA)
    sig: [u8; 2],
}

impl Fat32BootSector {
    /// Decodes a FAT32 boot sector and optionally validates it.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if the sector is truncated
    /// - Various validation variants if `validate` is true and a field is invalid
    pub fn from_sector(sector: &[u8], validate: bool) -> Result<Self, FsError> {
        let mut reader = io::Cursor::new(sector);
        let bs: Fat32BootSector = reader.read_le()?;

        if validate { bs.validate() } else { Ok(bs) }
    }

    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    /// Number of clusters addressable on the volume, used to bound chain walks.
    pub fn cluster_count(&self) -> u32 {
        match self.bpb.sec_per_clus {
            0 => 0,
            spc => self.bpb.tot_sec_32 / spc as u32,
        }
    }

    pub fn cluster_size(&self) -> u32 {
        self.bpb.bytes_per_sec as u32 * self.bpb.sec_per_clus as u32
    }

    /// Validates the boot sector according to the FAT32 specification.
    ///
    /// # Errors
    /// - `FsError::InvalidJmp`: If the jump instruction is invalid
    /// - `FsError::InvalidBytesPerSec`: If bytes per sector is not a valid value
    /// - `FsError::InvalidSecPerClus`: If sectors per cluster is not a valid value
    /// - `FsError::InvalidClusSz`: If cluster size exceeds 32 KiB
    /// - `FsError::InvalidSignature`: If boot sector signature is not 0x55AA
    /// - `FsError::InvalidBootSector`: If a FAT32-specific field is inconsistent
    fn validate(self) -> Result<Self, FsError> {
        let jmp = self.bpb.jmp;
        if !((jmp[0] == 0xEB && jmp[2] == 0x90) || jmp[0] == 0xE9) {
            return Err(FsError::InvalidJmp(format!(
                "0x{:02X}{:02X}{:02X}",
                jmp[0], jmp[1], jmp[2],
            )));
        }

        self.bpb.validate_common()?;

        const VALID_SEC_PER_CLUS: [u8; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
        if !VALID_SEC_PER_CLUS.contains(&self.bpb.sec_per_clus) {
            return Err(FsError::InvalidSecPerClus(self.bpb.sec_per_clus));
        }

        if self.cluster_size() > 32 * 1024 {
            return Err(FsError::InvalidClusSz(self.cluster_size()));
        }

        check_signature(self.sig)?;

        let invalid = |msg: &str| -> Result<Self, FsError> {
            Err(FsError::InvalidBootSector(msg.to_string()))
        };
        if self.bpb.rsvd_sec_cnt == 0 {
            return invalid("BPB_RsvdSecCnt should be greater than 0.");
        }
        if self.bpb.num_fat == 0 {
            return invalid("BPB_NumFATs should be greater than 0.");
        }
        if self.bpb.root_ent_cnt != 0 {
            return invalid("BPB_RootEntCnt should be 0 for a FAT32 volume.");
        }
        if self.bpb.tot_sec_16 != 0 {
            return invalid("BPB_TotSec16 should be 0 for a FAT32 volume.");
        }
        if self.bpb.tot_sec_32 == 0 {
            return invalid("BPB_TotSec32 should be greater than 0 for a FAT32 volume.");
        }
        if self.bpb.fat_sz_16 != 0 {
            return invalid("BPB_FATSz16 should be 0 for a FAT32 volume.");
        }
        if self.fat_sz_32 == 0 {
            return invalid("BPB_FATSz32 should be greater than 0 for a FAT32 volume.");
        }
        if self.root_clus < 2 {
            return invalid("BPB_RootClus should be at least 2.");
        }
        let fat_end = self.bpb.rsvd_sec_cnt as u64 + self.bpb.num_fat as u64 * self.fat_sz_32 as u64;
        if fat_end > self.bpb.tot_sec_32 as u64 {
            return invalid("The FATs extend past BPB_TotSec32.");
        }

        Ok(self)
    }
}

/// Implements the Display trait for the FAT32 boot sector.
impl fmt::Display for Fat32BootSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;

        writeln!(f, "FAT32 Boot Sector:")?;
        self.bpb.write_fields(f, &mut offset)?;

        macro_rules! field {
            ($name:expr, $val:expr, $size:expr) => {{
                writeln!(f, "  {:<20} 0x{:>04X}: {}", $name, offset, $val)?;
                offset += $size;
            }};
        }

        field!("fat_sz_32", self.fat_sz_32, 4);
        field!("ext_flags", self.ext_flags, 2);
        field!("fs_ver", self.fs_ver, 2);
        field!("root_clus", self.root_clus, 4);
        field!("fs_info", self.fs_info, 2);
        field!("bk_boot_sec", self.bk_boot_sec, 2);
        field!("reserved", format!("{:02X?}", &self.reserved[..]), 12);
        field!("drv_num", format!("0x{:X}", self.drv_num), 1);
        field!("reserved_1", self.reserved_1, 1);
        field!("boot_sig", format!("0x{:X}", self.boot_sig), 1);
        field!("vol_id", format!("0x{:X}", self.vol_id), 4);
        field!("vol_lab", String::from_utf8_lossy(&self.vol_lab), 11);
        field!(
            "fil_sys_type",
            String::from_utf8_lossy(&self.fil_sys_type),
            8
        );
        offset += self.boot_code.len();

        writeln!(f, "  {:<20} 0x{:>04X}: {:02X?}", "sig", offset, self.sig)
    }
}

/// Decodes the signed power-of-two size convention of NTFS boot fields.
///
/// A value above 127, read as a signed byte, stands for `2^(256 - value)`;
/// any other value is taken literally.
///
/// # Errors
/// - `FsError::InvalidBootSector` if the exponent does not fit in 64 bits
pub fn decode_size_field(value: u8) -> Result<u64, FsError> {
    if value > 127 {
        1u64.checked_shl(256 - value as u32).ok_or_else(|| {
            FsError::InvalidBootSector(format!("size exponent of 0x{value:02X} is too large"))
        })
    } else {
        Ok(value as u64)
    }
}

/// Size of an MFT record or index block, remembering which branch of the size
/// convention produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MftRecordSize {
    /// The record size is given directly in bytes.
    Bytes(u64),
    /// The record size is a count of clusters.
    Clusters(u64),
}

impl MftRecordSize {
    pub fn from_field(value: u8) -> Result<Self, FsError> {
        let size = decode_size_field(value)?;
        Ok(if value > 127 {
            MftRecordSize::Bytes(size)
        } else {
            MftRecordSize::Clusters(size)
        })
    }

    /// Size of one record in bytes.
    pub fn byte_len(&self, cluster_size: u64) -> u64 {
        match *self {
            MftRecordSize::Bytes(n) => n,
            MftRecordSize::Clusters(n) => n * cluster_size,
        }
    }
}

impl fmt::Display for MftRecordSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MftRecordSize::Bytes(n) => write!(f, "{n} (bytes)"),
            MftRecordSize::Clusters(n) => write!(f, "{n} (clusters)"),
        }
    }
}

/// NTFS boot sector: the common Bpb followed by the NTFS extension.
#[derive(BinRead, Debug, CopyGetters)]
#[br(little)]
pub struct NtfsBootSector {
    bpb: Bpb,
    /// 0x00 floppy, 0x80 hard disk
    physical_drive: u8,
    current_head: u8,
    /// Extended boot signature (0x80)
    ext_boot_sig: u8,
    reserved2: u8,
    /// Total sectors of the volume
    #[get_copy = "pub"]
    number_of_sectors: i64,
    /// Cluster location of the MFT
    #[get_copy = "pub"]
    mft_lcn: u64,
    /// Cluster location of the MFT mirror
    #[get_copy = "pub"]
    mftmirr_lcn: u64,
    /// MFT record size, in the signed power-of-two convention
    #[get_copy = "pub"]
    clusters_per_mft_record: u8,
    reserved0: [u8; 3],
    /// Index block size, in the signed power-of-two convention
    #[get_copy = "pub"]
    clusters_per_index_record: u8,
    reserved1: [u8; 3],
    #[get_copy = "pub"]
    volume_serial_number: u64,
    checksum: u32,
    #[br(count = 426)]
    bootstrap: Vec<u8>,
    sig: [u8; 2],
}

impl NtfsBootSector {
    /// Decodes an NTFS boot sector and optionally validates it.
    ///
    /// # Errors
    /// - `FsError::CorruptStructure` if the sector is truncated
    /// - Various validation variants if `validate` is true and a field is invalid
    pub fn from_sector(sector: &[u8], validate: bool) -> Result<Self, FsError> {
        let mut reader = io::Cursor::new(sector);
        let bs: NtfsBootSector = reader.read_le()?;

        if validate { bs.validate() } else { Ok(bs) }
    }

    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    /// Sectors per cluster, with values from 244 up read as negative exponents.
    pub fn sectors_per_cluster(&self) -> Result<u64, FsError> {
        match self.bpb.sec_per_clus {
            0 => Err(FsError::InvalidSecPerClus(0)),
            spc if spc >= 244 => decode_size_field(spc),
            spc => Ok(spc as u64),
        }
    }

    pub fn cluster_size(&self) -> Result<u64, FsError> {
        Ok(self.sectors_per_cluster()? * self.bpb.bytes_per_sec as u64)
    }

    pub fn mft_record_size(&self) -> Result<MftRecordSize, FsError> {
        MftRecordSize::from_field(self.clusters_per_mft_record)
    }

    /// Index block size as decoded from the boot sector.
    pub fn index_record_size(&self) -> Result<MftRecordSize, FsError> {
        MftRecordSize::from_field(self.clusters_per_index_record)
    }

    fn validate(self) -> Result<Self, FsError> {
        self.bpb.validate_common()?;
        check_signature(self.sig)?;

        let cluster_size = self.cluster_size()?;
        let record_len = self.mft_record_size()?.byte_len(cluster_size);
        if record_len < 512 {
            return Err(FsError::InvalidBootSector(format!(
                "MFT record size of {record_len} bytes is smaller than a sector"
            )));
        }
        if self.number_of_sectors <= 0 {
            return Err(FsError::InvalidBootSector(String::from(
                "the total count of sectors should be greater than 0",
            )));
        }

        Ok(self)
    }
}

/// Implements the Display trait for the NTFS boot sector.
impl fmt::Display for NtfsBootSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;

        writeln!(f, "NTFS Boot Sector:")?;
        self.bpb.write_fields(f, &mut offset)?;

        macro_rules! field {
            ($name:expr, $val:expr, $size:expr) => {{
                writeln!(f, "  {:<26} 0x{:>04X}: {}", $name, offset, $val)?;
                offset += $size;
            }};
        }

        field!("physical_drive", format!("0x{:X}", self.physical_drive), 1);
        field!("current_head", self.current_head, 1);
        field!("ext_boot_sig", format!("0x{:X}", self.ext_boot_sig), 1);
        field!("reserved2", self.reserved2, 1);
        field!("number_of_sectors", self.number_of_sectors, 8);
        field!("mft_lcn", self.mft_lcn, 8);
        field!("mftmirr_lcn", self.mftmirr_lcn, 8);
        field!(
            "clusters_per_mft_record",
            format!("0x{:02X}", self.clusters_per_mft_record),
            4
        );
        field!(
            "clusters_per_index_record",
            format!("0x{:02X}", self.clusters_per_index_record),
            4
        );
        field!(
            "volume_serial_number",
            format!("0x{:X}", self.volume_serial_number),
            8
        );
        field!("checksum", format!("0x{:X}", self.checksum), 4);
        offset += self.bootstrap.len();

        writeln!(f, "  {:<26} 0x{:>04X}: {:02X?}", "sig", offset, self.sig)
    }
}
