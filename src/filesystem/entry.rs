//! Format-agnostic tree of files and folders.
//!
//! Both volume drivers produce [`Entry`] values. A folder's children and a
//! file's content are attached lazily, at most once, when the caller asks for
//! them.

use getset::{CopyGetters, Getters};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;

use super::fs_error::FsError;
use super::timestamp::format_unix;

/// File attribute bits shared by FAT directory slots and NTFS file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes(u8);

impl Attributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_LABEL: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    pub const DEVICE: u8 = 0x40;
    pub const NORMAL: u8 = 0x80;

    pub fn from_bits(bits: u8) -> Self {
        Attributes(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LETTERS: [(u8, char); 7] = [
            (Attributes::READ_ONLY, 'R'),
            (Attributes::HIDDEN, 'H'),
            (Attributes::SYSTEM, 'S'),
            (Attributes::VOLUME_LABEL, 'V'),
            (Attributes::DIRECTORY, 'D'),
            (Attributes::ARCHIVE, 'A'),
            (Attributes::DEVICE, 'X'),
        ];

        for (flag, letter) in LETTERS {
            write!(f, "{}", if self.contains(flag) { letter } else { '-' })?;
        }
        Ok(())
    }
}

/// What an entry is, together with its lazily attached payload.
#[derive(Debug, Clone)]
pub enum EntryKind {
    Folder(OnceCell<Vec<Entry>>),
    File(OnceCell<Vec<u8>>),
    TextFile(OnceCell<Vec<u8>>),
}

impl EntryKind {
    pub fn folder() -> Self {
        EntryKind::Folder(OnceCell::new())
    }

    pub fn file() -> Self {
        EntryKind::File(OnceCell::new())
    }

    pub fn text_file() -> Self {
        EntryKind::TextFile(OnceCell::new())
    }

    /// Picks File or TextFile from a file name.
    pub fn for_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".txt") {
            EntryKind::text_file()
        } else {
            EntryKind::file()
        }
    }
}

/// A file or folder found on a volume.
///
/// `position` is format specific: the first cluster on FAT32, the MFT record
/// index on NTFS. `parent_position` is only meaningful on NTFS.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Entry {
    #[get = "pub"]
    kind: EntryKind,
    #[get = "pub"]
    name: String,
    #[get_copy = "pub"]
    attributes: Attributes,
    #[get_copy = "pub"]
    position: u64,
    #[get_copy = "pub"]
    parent_position: u64,
    #[get_copy = "pub"]
    size: u64,
    /// Seconds since the Unix epoch.
    #[get_copy = "pub"]
    last_modified: i64,
}

impl Entry {
    pub fn new(
        kind: EntryKind,
        name: String,
        attributes: Attributes,
        position: u64,
        parent_position: u64,
        size: u64,
        last_modified: i64,
    ) -> Self {
        Entry {
            kind,
            name,
            attributes,
            position,
            parent_position,
            size,
            last_modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Folder(_))
    }

    /// Folders other than the `.` and `..` links.
    pub fn is_regular_dir(&self) -> bool {
        self.is_dir() && self.name != "." && self.name != ".."
    }

    /// Whether the content is expected to be readable text.
    pub fn is_text(&self) -> bool {
        matches!(self.kind, EntryKind::TextFile(_))
    }

    /// Children attached by a previous load, if any.
    pub fn children(&self) -> Option<&[Entry]> {
        match &self.kind {
            EntryKind::Folder(children) => children.get().map(Vec::as_slice),
            _ => None,
        }
    }

    /// Content attached by a previous load, if any.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.kind {
            EntryKind::File(data) | EntryKind::TextFile(data) => data.get().map(Vec::as_slice),
            EntryKind::Folder(_) => None,
        }
    }

    /// Attaches the decoded children of a folder.
    ///
    /// # Errors
    /// - `FsError::NotADirectory` if the entry is a file
    /// - `FsError::CorruptStructure` if children were already attached
    pub fn attach_children(&self, children: Vec<Entry>) -> Result<(), FsError> {
        match &self.kind {
            EntryKind::Folder(cell) => cell.set(children).map_err(|_| {
                FsError::CorruptStructure(format!("children of `{}` attached twice", self.name))
            }),
            _ => Err(FsError::NotADirectory(self.name.clone())),
        }
    }

    /// Attaches the content of a file.
    ///
    /// # Errors
    /// - `FsError::IsDirectory` if the entry is a folder
    /// - `FsError::CorruptStructure` if content was already attached
    pub fn attach_content(&self, content: Vec<u8>) -> Result<(), FsError> {
        match &self.kind {
            EntryKind::File(cell) | EntryKind::TextFile(cell) => {
                cell.set(content).map_err(|_| {
                    FsError::CorruptStructure(format!("content of `{}` attached twice", self.name))
                })
            }
            EntryKind::Folder(_) => Err(FsError::IsDirectory(self.name.clone())),
        }
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Copy of the entry without its attached payload.
    pub fn detached(&self) -> Entry {
        let kind = match self.kind {
            EntryKind::Folder(_) => EntryKind::folder(),
            EntryKind::File(_) => EntryKind::file(),
            EntryKind::TextFile(_) => EntryKind::text_file(),
        };
        Entry {
            kind,
            name: self.name.clone(),
            ..*self
        }
    }
}

impl fmt::Display for Entry {
    /// One listing line: kind, attributes, name, size, position, timestamp.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::Folder(_) => "Folder",
            EntryKind::File(_) => "File",
            EntryKind::TextFile(_) => "TXT",
        };
        write!(
            f,
            "{:<8}{} {:<40} {:>12} {:>10}  {}",
            kind,
            self.attributes,
            self.name,
            self.size,
            self.position,
            format_unix(self.last_modified)
        )
    }
}

/// Collapses entries pointing at the same position to the one with the longest
/// name, and drops `$`-prefixed metadata names.
///
/// The survivor takes the place of the first occurrence; on equal name lengths
/// the later entry wins. Running it twice changes nothing.
pub fn dedup_entries(entries: Vec<Entry>) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut slots: HashMap<u64, usize> = HashMap::new();

    for entry in entries {
        if entry.name.starts_with('$') {
            continue;
        }

        match slots.get(&entry.position) {
            Some(&slot) => {
                if entry.name.chars().count() >= out[slot].name.chars().count() {
                    out[slot] = entry;
                }
            }
            None => {
                slots.insert(entry.position, out.len());
                out.push(entry);
            }
        }
    }

    out
}
