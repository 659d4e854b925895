//! Stateless helpers shared by the codec: checksums, checked casts,
//! MS-DOS timestamps, and entry-name/path handling.
//!
//! Nothing in here touches the file system.
//! Paths are handled lexically, so a destination can be sanitized
//! before anything exists on disk.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::result::*;

/// CRC-32 lookup table for the reflected polynomial 0xEDB88320.
///
/// [`crc32`] hands whole buffers to `crc32fast`,
/// but the stream cipher needs the single-byte step on its own.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Advances a raw (non-inverted) CRC-32 register by one byte.
pub fn crc32_update(crc: u32, byte: u8) -> u32 {
    CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
}

/// The CRC-32 of `data`, as stored in ZIP headers.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// A checked cast from u64 to usize
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// Converts MS-DOS time and date words into a timestamp.
///
/// Garbage fields (month 0, hour 31, ...) are common in the wild;
/// they map to the DOS epoch rather than failing the whole entry.
pub fn from_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds.min(59)))
        .unwrap_or_else(dos_epoch)
}

/// Converts a timestamp into MS-DOS `(time, date)` words,
/// clamping to the representable 1980-2107 range.
pub fn to_msdos(when: NaiveDateTime) -> (u16, u16) {
    let when = if when.year() < 1980 {
        dos_epoch()
    } else {
        when
    };
    let year = (when.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((when.month() as u16) << 5) | when.day() as u16;
    let time =
        ((when.hour() as u16) << 11) | ((when.minute() as u16) << 5) | (when.second() as u16 / 2);
    (time, date)
}

fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Entry names ending in a slash (either kind) are directories.
pub fn is_directory_name(name: &str) -> bool {
    name.ends_with('/') || name.ends_with('\\')
}

/// Canonicalizes an entry name into the form stored in the archive:
/// forward slashes, no `.` or `..` segments, no leading slash.
/// A trailing slash survives so directories stay directories.
///
/// `..` can never climb above the top of the archive,
/// so `../../etc/passwd` becomes `etc/passwd`.
pub fn canonical(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let name = name.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut canonical = segments.join("/");
    if name.ends_with('/') && !canonical.is_empty() {
        canonical.push('/');
    }
    canonical
}

/// The last non-empty segment of an entry name.
pub fn base_name(name: &str) -> &str {
    name.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}

/// Lexically normalizes a path, resolving `.` and `..` without
/// consulting the file system. `..` at the root is dropped.
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normalized = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => {
                normalized.push(component.as_str());
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                let climbable = matches!(
                    normalized.components().next_back(),
                    Some(Utf8Component::Normal(_))
                );
                if climbable {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Utf8Component::Normal(segment) => normalized.push(segment),
        }
    }
    normalized
}

/// Maps an entry name to a path under `root` that can't escape it.
///
/// `root` should already be absolute.
/// Starting from the whole entry name and dropping one leading segment
/// at a time, the first candidate that stays inside `root` once normalized
/// wins. If none does, the entry's base name is placed directly in `root`.
pub fn sanitize(root: &Utf8Path, name: &str) -> Utf8PathBuf {
    let root = normalize(root);
    let segments: Vec<&str> = name.split(['/', '\\']).collect();
    for start in 0..segments.len() {
        let candidate = normalize(&root.join(segments[start..].join("/")));
        if candidate.starts_with(&root) && candidate != root {
            return candidate;
        }
    }
    let base = base_name(name);
    if base.is_empty() || base == ".." || base == "." {
        root
    } else {
        root.join(base)
    }
}

/// MS-DOS directory bit in the low byte of the external attributes
pub const DOS_DIRECTORY: u32 = 0x10;

/// Builds external file attributes the way Unix zip tools do:
/// the MS-DOS directory bit in the low byte and a Unix mode
/// (file type plus permission bits) in the high 16 bits.
pub fn external_attributes(is_dir: bool, mode: Option<u32>) -> u32 {
    let dos = if is_dir { DOS_DIRECTORY } else { 0 };
    let file_type: u32 = if is_dir { 0o040000 } else { 0o100000 };
    let permissions = match mode {
        Some(m) => m & 0o7777,
        None if is_dir => 0o755,
        None => 0o644,
    };
    dos | ((file_type | permissions) << 16)
}
