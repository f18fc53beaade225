//! Error types for volume mounting and on-disk structure decoding.
//!
//! Errors fall in two groups: failures to mount (unrecognized or invalid boot
//! sector) and failures while decoding a directory, a file or an MFT record.
//! A decoding error aborts only the entry being decoded.

use std::io;
use thiserror::Error;

/// Errors that can occur while mounting or reading a FAT32 or NTFS volume.
#[derive(Error, Debug)]
pub enum FsError {
    /// The device read failed or returned fewer bytes than requested.
    #[error("IO Error: `{0}`")]
    IOError(io::Error),

    /// Neither the FAT32 nor the NTFS signature was found in the boot sector.
    #[error("Unsupported filesystem: no FAT32 or NTFS signature in the boot sector")]
    UnsupportedFilesystem,

    /// No entry with that name in the directory.
    #[error("`{0}` not found")]
    NotFound(String),

    /// A file operation was requested on a folder.
    #[error("`{0}` is a directory")]
    IsDirectory(String),

    /// A directory operation was requested on a file.
    #[error("`{0}` is not a directory")]
    NotADirectory(String),

    /// Declared lengths or offsets point outside a record or buffer, or a
    /// chain loops back on itself.
    #[error("Corrupt structure: {0}")]
    CorruptStructure(String),

    /// The first three bytes of a FAT volume must contain a valid x86 jump instruction.
    #[error("Invalid jump instruction `{0}`")]
    InvalidJmp(String),

    /// Bytes per sector must be 512, 1024, 2048 or 4096.
    #[error("Invalid count of bytes per sector: `{0}`. Legal values: 512, 1024, 2048 or 4096")]
    InvalidBytesPerSec(u16),

    /// Sectors per cluster must be a power of 2.
    #[error(
        "Invalid number of sector per cluster: `{0}`. Legal values: 1, 2, 4, 8, 16, 32, 64, 128"
    )]
    InvalidSecPerClus(u8),

    /// Cluster size must not exceed 32 KiB on FAT32.
    #[error("Invalid cluster size: `{0}`. Any value greater than 32K is invalid.")]
    InvalidClusSz(u32),

    /// The boot sector signature must be 0x55AA.
    #[error("Invalid boot sector signature: `{0}`. Expected signature: 0x55AA")]
    InvalidSignature(String),

    /// A boot sector field is inconsistent with the detected filesystem.
    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    /// Parsing error occured during structure initialization
    #[error("BinRead Error: `{0}`")]
    BinReadError(binread::Error),
}

/// Converts standard I/O errors into FsError.
impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        FsError::IOError(err)
    }
}

/// Converts BinRead errors into FsError.
///
/// Running out of bytes while decoding a structure means the declared layout
/// does not fit the buffer, which is reported as a corrupt structure.
impl From<binread::Error> for FsError {
    fn from(err: binread::Error) -> Self {
        match err {
            binread::Error::Io(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
                FsError::CorruptStructure(format!("structure truncated: {io_err}"))
            }
            other => FsError::BinReadError(other),
        }
    }
}
