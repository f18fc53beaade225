//! Random-access reads over a mounted device.

use log::trace;
use std::io::{self, Read, Seek, SeekFrom};

/// Capability to read an arbitrary byte range of a device.
///
/// Offsets are absolute from the start of the device. A short read is an error:
/// the whole buffer is filled or the call fails.
pub trait BlockReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Size of the device in bytes.
    fn device_len(&mut self) -> io::Result<u64>;

    /// Reads `len` bytes at `offset` into a freshly allocated buffer.
    ///
    /// The range is checked against the device size before allocating.
    fn read_vec(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let device_len = self.device_len()?;
        if offset.checked_add(len as u64).is_none_or(|end| end > device_len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{len} bytes at offset {offset} run past the {device_len}-byte device"),
            ));
        }

        let mut buf = vec![0; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<T: Read + Seek> BlockReader for T {
    fn device_len(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        trace!("read {} bytes at offset 0x{offset:X}", buf.len());

        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!(
                    "Failed to read {} bytes at offset {offset}: {err}",
                    buf.len()
                ),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_requested_range() {
        let mut dev = Cursor::new((0u8..=255).collect::<Vec<u8>>());
        let buf = dev.read_vec(16, 4).unwrap();
        assert_eq!(buf, vec![16, 17, 18, 19]);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut dev = Cursor::new(vec![0u8; 8]);
        let err = dev.read_vec(4, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_range_fails_before_reading() {
        let mut dev = Cursor::new(vec![0u8; 8]);
        let err = dev.read_vec(0, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(dev.device_len().unwrap(), 8);
    }
}
