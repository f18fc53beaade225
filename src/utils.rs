//! Bounds-checked little-endian field access over raw on-disk buffers.
//!
//! Every accessor fails with [`FsError::CorruptStructure`] instead of panicking
//! when the requested range does not fit in the buffer.

use crate::filesystem::fs_error::FsError;

/// Returns the `len` bytes of `buffer` starting at `offset`.
///
/// # Errors
/// - `FsError::CorruptStructure` if the range exceeds the buffer.
pub fn slice_at(buffer: &[u8], offset: usize, len: usize) -> Result<&[u8], FsError> {
    offset
        .checked_add(len)
        .and_then(|end| buffer.get(offset..end))
        .ok_or_else(|| {
            FsError::CorruptStructure(format!(
                "{len}-byte field at offset {offset} overruns a {}-byte buffer",
                buffer.len()
            ))
        })
}

fn array_at<const N: usize>(buffer: &[u8], offset: usize) -> Result<[u8; N], FsError> {
    let mut out = [0; N];
    out.copy_from_slice(slice_at(buffer, offset, N)?);
    Ok(out)
}

/// Extracts a 64-bit unsigned integer from a buffer at a given offset.
pub fn u64_at(buffer: &[u8], offset: usize) -> Result<u64, FsError> {
    array_at(buffer, offset).map(u64::from_le_bytes)
}

/// Extracts a 32-bit unsigned integer from a buffer at a given offset.
pub fn u32_at(buffer: &[u8], offset: usize) -> Result<u32, FsError> {
    array_at(buffer, offset).map(u32::from_le_bytes)
}

/// Extracts a 16-bit unsigned integer from a buffer at a given offset.
pub fn u16_at(buffer: &[u8], offset: usize) -> Result<u16, FsError> {
    array_at(buffer, offset).map(u16::from_le_bytes)
}

/// Decodes `count` UTF-16LE code units starting at `offset`.
///
/// Unpaired surrogates are replaced rather than rejected.
pub fn utf16_at(buffer: &[u8], offset: usize, count: usize) -> Result<String, FsError> {
    let raw = slice_at(buffer, offset, count * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(String::from_utf16_lossy(&units))
}

/// Formats bytes as a classic offset / hex / ASCII dump.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("0x{:08X}: ", i * 16));
        for byte in chunk {
            out.push_str(&format!("{byte:02X} "));
        }
        out.push_str(&"   ".repeat(16 - chunk.len()));
        for byte in chunk {
            out.push(if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let buf = [0x78, 0x56, 0x34, 0x12, 0xAA];
        assert_eq!(u32_at(&buf, 0).unwrap(), 0x1234_5678);
        assert_eq!(u16_at(&buf, 1).unwrap(), 0x3456);
    }

    #[test]
    fn out_of_bounds_is_corrupt_structure() {
        let buf = [0u8; 6];
        assert!(matches!(u32_at(&buf, 4), Err(FsError::CorruptStructure(_))));
        assert!(matches!(
            slice_at(&buf, usize::MAX, 2),
            Err(FsError::CorruptStructure(_))
        ));
    }

    #[test]
    fn decodes_utf16_names() {
        let buf: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(utf16_at(&buf, 0, 5).unwrap(), "héllo");
    }

    #[test]
    fn hex_dump_pads_last_line() {
        let dump = hex_dump(b"AB");
        assert!(dump.starts_with("0x00000000: 41 42 "));
        assert!(dump.trim_end().ends_with("AB"));
    }
}
