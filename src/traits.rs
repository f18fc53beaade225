//! Declaration of traits reused across the code.

use crate::filesystem::fs_error::FsError;

/// Implementation of the LayoutDisplay trait.
/// It is used to display the layout of a given structure such as a volume.
pub trait LayoutDisplay {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error>;
}

/// Renders the directory tree of a volume.
///
/// Decoding the tree needs device reads, hence `&mut self`.
pub trait TreeDisplay {
    fn display_tree(&mut self) -> Result<String, FsError>;
}
