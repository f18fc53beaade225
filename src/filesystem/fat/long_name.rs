//! Reassembly of VFAT long file names.

use super::dir_entry::LongNameSlot;

/// Accumulates long-name fragments until their short entry is reached.
///
/// On disk the fragment with the highest ordinal comes first, so each new
/// fragment is placed in front of the fragments with a higher ordinal; for a
/// well-formed directory this is a plain prepend.
#[derive(Debug, Default)]
pub struct LongNameBuffer {
    fragments: Vec<(u8, [u16; 13])>,
}

impl LongNameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn push(&mut self, slot: &LongNameSlot) {
        let ordinal = slot.ordinal();
        let at = self.fragments.partition_point(|(ord, _)| *ord < ordinal);
        self.fragments.insert(at, (ordinal, slot.units()));
    }

    /// Returns the assembled name and empties the buffer.
    ///
    /// The name stops at the first NUL unit; trailing spaces and 0xFFFF padding
    /// are trimmed. Returns `None` when nothing usable was accumulated.
    pub fn take(&mut self) -> Option<String> {
        let units: Vec<u16> = self
            .fragments
            .drain(..)
            .flat_map(|(_, units)| units)
            .take_while(|&u| u != 0x0000)
            .collect();

        let name = String::from_utf16_lossy(&units);
        let name = name.trim_end_matches([' ', '\u{FFFF}']);

        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::fat::dir_entry::Slot;
    use crate::filesystem::fat::dir_entry::tests::long_slot;

    fn fragment(ord: u8, text: &str) -> LongNameSlot {
        match Slot::from_slice(&long_slot(ord, text)).unwrap() {
            Slot::LongName(slot) => slot,
            other => panic!("unexpected slot {other:?}"),
        }
    }

    #[test]
    fn assembles_in_on_disk_order() {
        let mut buf = LongNameBuffer::new();
        buf.push(&fragment(0x43, "name.txt"));
        buf.push(&fragment(0x02, "ngly long fil"));
        buf.push(&fragment(0x01, "A very very l"));

        assert_eq!(
            buf.take().as_deref(),
            Some("A very very lngly long filname.txt")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn order_of_fragments_does_not_matter() {
        let parts = [(0x01, "0123456789abc"), (0x02, "defghijklmnop"), (0x43, "qrs")];

        let mut forward = LongNameBuffer::new();
        for (ord, text) in parts {
            forward.push(&fragment(ord, text));
        }
        let mut backward = LongNameBuffer::new();
        for (ord, text) in parts.iter().rev() {
            backward.push(&fragment(*ord, text));
        }

        let expected = "0123456789abcdefghijklmnopqrs";
        assert_eq!(forward.take().as_deref(), Some(expected));
        assert_eq!(backward.take().as_deref(), Some(expected));
    }

    #[test]
    fn empty_buffer_has_no_name() {
        let mut buf = LongNameBuffer::new();
        assert_eq!(buf.take(), None);
    }
}
