//! Conversions from on-disk timestamps to Unix seconds.
//!
//! FAT stores local MS-DOS date/time bit-fields, NTFS stores FILETIME values
//! (100 ns ticks since 1601-01-01). Both are reported as seconds since the Unix
//! epoch, interpreted as UTC.

use chrono::NaiveDate;

/// Seconds between 1601-01-01 and 1970-01-01.
pub const WINDOWS_EPOCH_DIFF: i64 = 11_644_473_600;

/// FILETIME ticks per second.
pub const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a packed FAT date/time pair to a Unix timestamp.
///
/// - date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day
/// - time: bits 15-11 hours, bits 10-5 minutes, bits 4-0 seconds / 2
///
/// Returns 0 when the fields do not form a valid calendar date.
pub fn fat_datetime_to_unix(date: u16, time: u16) -> i64 {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

/// Converts a Windows FILETIME to a Unix timestamp in seconds.
pub fn filetime_to_unix(filetime: u64) -> i64 {
    (filetime / FILETIME_TICKS_PER_SECOND as u64) as i64 - WINDOWS_EPOCH_DIFF
}

/// Formats a Unix timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_unix(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| String::from("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_filetime() {
        // 2020-03-15 00:00:00 UTC
        assert_eq!(filetime_to_unix(132_287_040_000_000_000), 1_584_230_400);
        assert_eq!(filetime_to_unix(132_877_824_000_000_000), 1_643_308_800);
        assert_eq!(filetime_to_unix(116_444_736_000_000_000), 0);
    }

    #[test]
    fn converts_fat_datetime() {
        // 2020-03-15 12:30:20
        let date = ((2020 - 1980) << 9) | (3 << 5) | 15;
        let time = (12 << 11) | (30 << 5) | 10;
        assert_eq!(fat_datetime_to_unix(date, time), 1_584_275_420);
    }

    #[test]
    fn invalid_fat_date_is_zero() {
        assert_eq!(fat_datetime_to_unix(0, 0), 0);
    }

    #[test]
    fn formats_timestamp() {
        assert_eq!(format_unix(1_584_230_400), "2020-03-15 00:00:00");
    }
}
