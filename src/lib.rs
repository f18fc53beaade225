//!
//! volume_forensics: A library and CLI for browsing FAT32 and NTFS volumes read-only.
//!
//! This crate provides tools for:
//! - Detecting the filesystem of a device or disk image from its boot sector
//! - Walking FAT32 allocation tables, cluster chains and long-name directories
//! - Decoding NTFS MFT records, run lists, attribute lists and `$I30` indexes
//! - Handling user commands to navigate the directory tree and read files
//! - Printing volume layouts and directory trees
//!
//! Nothing is ever written to the device.
//!
//! # Re-exports
//! - [`VolumeHandle`]: format-agnostic handle over a mounted volume
//! - [`Entry`]: a file or folder of the mounted volume
//! - [`FsError`]: errors raised while mounting or decoding

pub mod commands;
pub mod disk;
pub mod filesystem;
pub mod traits;
pub mod utils;

/// Format-agnostic handle over a mounted volume (see [`filesystem::VolumeHandle`]).
pub use crate::filesystem::VolumeHandle;
/// File or folder of a mounted volume (see [`filesystem::entry::Entry`]).
pub use crate::filesystem::entry::Entry;
/// Mount and decoding errors (see [`filesystem::fs_error::FsError`]).
pub use crate::filesystem::fs_error::FsError;
