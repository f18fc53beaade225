//! Raw access to the device or disk image holding a volume.
//!
//! The core only ever needs random-access reads of byte ranges, exposed by the
//! [`BlockReader`] trait.

pub mod block_reader;

pub use block_reader::BlockReader;

use std::fs::File;
use std::io;
use std::path::Path;

/// Opens a block device or disk image read-only.
///
/// # Errors
/// - Returns the underlying `io::Error` if the path cannot be opened.
pub fn open_device(path: &Path) -> io::Result<File> {
    File::options().read(true).open(path).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("Failed to open {}: {err}", path.display()),
        )
    })
}
