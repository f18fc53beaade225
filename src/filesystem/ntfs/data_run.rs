//! Run list (mapping pairs) decoding.

use crate::filesystem::fs_error::FsError;
use crate::utils::slice_at;

/// A contiguous extent of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    /// Number of clusters in the run
    pub length: u64,
    /// First logical cluster, `None` for a sparse run
    pub lcn: Option<u64>,
}

/// Reads a little-endian signed integer of 0 to 8 bytes.
fn signed_le(raw: &[u8]) -> i64 {
    let fill = match raw.last() {
        Some(b) if b & 0x80 != 0 => 0xFF,
        _ => 0x00,
    };
    let mut bytes = [fill; 8];
    bytes[..raw.len()].copy_from_slice(raw);
    i64::from_le_bytes(bytes)
}

/// Decodes a run list.
///
/// Each run starts with a header byte whose low nibble is the width of the
/// cluster count and whose high nibble is the width of the LCN delta. Deltas
/// are relative to the previous non-sparse run.
///
/// # Errors
/// - `FsError::CorruptStructure` on a field wider than 8 bytes, a truncated run,
///   a negative cluster count, or an LCN before the volume start
pub fn decode_runs(bytes: &[u8]) -> Result<Vec<DataRun>, FsError> {
    let mut runs = vec![];
    let mut pos = 0;
    let mut lcn: i64 = 0;

    while pos < bytes.len() {
        let header = bytes[pos];
        if header == 0 {
            break;
        }

        let count_len = (header & 0x0F) as usize;
        let offset_len = (header >> 4) as usize;
        if count_len > 8 || offset_len > 8 {
            return Err(FsError::CorruptStructure(format!(
                "run header {header:#04x} at {pos} has an oversized field"
            )));
        }

        let count = signed_le(slice_at(bytes, pos + 1, count_len)?);
        let delta = signed_le(slice_at(bytes, pos + 1 + count_len, offset_len)?);
        pos += 1 + count_len + offset_len;

        if count == 0 {
            break;
        }
        if count < 0 {
            return Err(FsError::CorruptStructure(format!(
                "negative run length {count}"
            )));
        }

        let run_lcn = if offset_len == 0 {
            None
        } else {
            lcn = lcn.checked_add(delta).filter(|l| *l >= 0).ok_or_else(|| {
                FsError::CorruptStructure(format!("run LCN {lcn} + {delta} is out of range"))
            })?;
            Some(lcn as u64)
        };

        runs.push(DataRun {
            length: count as u64,
            lcn: run_lcn,
        });
    }

    Ok(runs)
}

/// Sum of the run lengths, in clusters.
pub fn total_clusters(runs: &[DataRun]) -> Result<u64, FsError> {
    runs.iter().try_fold(0u64, |acc, run| {
        acc.checked_add(run.length)
            .ok_or_else(|| FsError::CorruptStructure(String::from("run list length overflows")))
    })
}
