//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here: magic numbers, record layouts,
//! and the functions that parse and emit each record.
//! Higher-level stuff lives in the [`directory`] and [`entry`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`directory`]: ../directory/index.html
//! [`entry`]: ../entry/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use log::*;
use memchr::memmem;

use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number (optional in the file)
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

// Fixed sizes of each record, not counting variable-length trailers

pub const LOCAL_FILE_HEADER_SIZE: usize = 30;
pub const CENTRAL_DIRECTORY_ENTRY_SIZE: usize = 46;
pub const EOCDR_SIZE: usize = 22;
pub const ZIP64_EOCDR_SIZE: usize = 56;
pub const ZIP64_EOCDR_LOCATOR_SIZE: usize = 20;

/// Names, extra fields and comments all have 16-bit lengths.
pub const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

/// 32-bit fields holding this defer to the Zip64 extra field.
pub const ZIP64_SENTINEL: u32 = u32::MAX;
/// 16-bit fields holding this defer to Zip64 records.
pub const ZIP64_SENTINEL_16: u16 = u16::MAX;

/// Header ID of the Zip64 extended information extra field
pub const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// Version needed to extract: stored files
pub const VERSION_STORED: u16 = 10;
/// Version needed to extract: deflate, folders, traditional encryption
pub const VERSION_DEFLATE: u16 = 20;
/// Version needed to extract: Zip64
pub const VERSION_ZIP64: u16 = 45;

// General purpose bit flags

/// Bit 0: If set, indicates that the file is encrypted
pub const FLAG_ENCRYPTED: u16 = 1;
/// Bit 3: CRC-32 and sizes are in a data descriptor after the file data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: Language encoding flag (EFS). Names and comments are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumped to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    flags & FLAG_UTF8 != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    flags & FLAG_ENCRYPTED != 0
}

/// Extracts the "are CRC and sizes deferred to a data descriptor?" bit.
pub fn has_data_descriptor(flags: u16) -> bool {
    flags & FLAG_DATA_DESCRIPTOR != 0
}

/// Reads `n` bytes from the front of the provided slice, shrinking it.
///
/// Running off the end is a format error instead of a panic,
/// since every length we're handed comes from the (untrusted) archive.
fn take<'a>(input: &mut &'a [u8], n: usize) -> ZipResult<&'a [u8]> {
    if input.len() < n {
        return Err(ZipError::InvalidArchive("Record truncated"));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub(crate) fn read_u64(input: &mut &[u8]) -> ZipResult<u64> {
    let b = take(input, 8)?;
    Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub(crate) fn read_u32(input: &mut &[u8]) -> ZipResult<u32> {
    let b = take(input, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub(crate) fn read_u16(input: &mut &[u8]) -> ZipResult<u16> {
    let b = take(input, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Peeks a little-endian u32 at `offset` without bounds panics.
fn peek_u32(mapping: &[u8], offset: usize) -> Option<u32> {
    let b = mapping.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Peeks a little-endian u16 at `offset` without bounds panics.
fn peek_u16(mapping: &[u8], offset: usize) -> Option<u16> {
    let b = mapping.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Checks a record's magic number, consuming it.
fn expect_magic(input: &mut &[u8], magic: [u8; 4], what: &'static str) -> ZipResult<()> {
    match input.get(..4) {
        Some(m) if m == magic => {
            *input = &input[4..];
            Ok(())
        }
        _ => Err(ZipError::Signature(what)),
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        expect_magic(&mut eocdr, EOCDR_MAGIC, "End of central directory record")?;
        let disk_number = read_u16(&mut eocdr)?;
        let disk_with_central_directory = read_u16(&mut eocdr)?;
        let entries_on_this_disk = read_u16(&mut eocdr)?;
        let entries = read_u16(&mut eocdr)?;
        let central_directory_size = read_u32(&mut eocdr)?;
        let central_directory_offset = read_u32(&mut eocdr)?;
        let comment_length = read_u16(&mut eocdr)? as usize;
        let file_comment = take(&mut eocdr, comment_length)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCDR_MAGIC);
        put_u16(out, self.disk_number);
        put_u16(out, self.disk_with_central_directory);
        put_u16(out, self.entries_on_this_disk);
        put_u16(out, self.entries);
        put_u32(out, self.central_directory_size);
        put_u32(out, self.central_directory_offset);
        put_u16(out, self.file_comment.len() as u16);
        out.extend_from_slice(self.file_comment);
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
/// The comment can be at most 64 KiB, which bounds the search,
/// unless `trailing_space` allows junk after the record.
pub fn find_eocdr(mapping: &[u8], trailing_space: bool) -> ZipResult<usize> {
    let search_start = if trailing_space {
        0
    } else {
        mapping
            .len()
            .saturating_sub(EOCDR_SIZE + MAX_FIELD_LENGTH)
    };
    let search_space = &mapping[search_start..];
    for candidate in memmem::rfind_iter(search_space, &EOCDR_MAGIC) {
        let posit = search_start + candidate;
        let comment_length = match peek_u16(mapping, posit + 20) {
            Some(l) => l as usize,
            None => continue,
        };
        // A candidate whose comment runs past the end is a stray "PK\5\6"
        // (inside a comment, say). Keep looking.
        if posit + EOCDR_SIZE + comment_length <= mapping.len() {
            return Ok(posit);
        }
        trace!("Skipping EOCDR candidate at {posit}: comment overruns the archive");
    }
    Err(ZipError::InvalidArchive("No END header found"))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    /// Returns `None` if there's no locator here (i.e., this isn't Zip64).
    pub fn parse(mut mapping: &[u8]) -> ZipResult<Option<Self>> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.get(..4) != Some(&ZIP64_EOCDR_LOCATOR_MAGIC[..]) {
            return Ok(None);
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping)?;
        let zip64_eocdr_offset = read_u64(&mut mapping)?;
        let disks = read_u32(&mut mapping)?;

        Ok(Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        }))
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCDR_LOCATOR_MAGIC);
        put_u32(out, self.disk_with_central_directory);
        put_u64(out, self.zip64_eocdr_offset);
        put_u32(out, self.disks);
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
    pub extensible_data: &'a [u8],
}

impl<'a> Zip64EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        expect_magic(
            &mut eocdr,
            ZIP64_EOCDR_MAGIC,
            "Zip64 end of central directory record",
        )?;
        let eocdr_size = read_u64(&mut eocdr)?;
        let source_version = read_u16(&mut eocdr)?;
        let minimum_extract_version = read_u16(&mut eocdr)?;
        let disk_number = read_u32(&mut eocdr)?;
        let disk_with_central_directory = read_u32(&mut eocdr)?;
        let entries_on_this_disk = read_u64(&mut eocdr)?;
        let entries = read_u64(&mut eocdr)?;
        let central_directory_size = read_u64(&mut eocdr)?;
        let central_directory_offset = read_u64(&mut eocdr)?;

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        //
        // Size = SizeOfFixedFields + SizeOfVariableData - 12.
        let extensible_data_length = eocdr_size
            .checked_add(12)
            .and_then(|n| n.checked_sub(ZIP64_EOCDR_SIZE as u64))
            .ok_or(ZipError::InvalidArchive(
                "Invalid size in Zip64 End Of Central Directory Record",
            ))?;
        let extensible_data = take(&mut eocdr, crate::util::usize(extensible_data_length)?)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            extensible_data,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCDR_MAGIC);
        put_u64(
            out,
            (ZIP64_EOCDR_SIZE - 12 + self.extensible_data.len()) as u64,
        );
        put_u16(out, self.source_version);
        put_u16(out, self.minimum_extract_version);
        put_u32(out, self.disk_number);
        put_u32(out, self.disk_with_central_directory);
        put_u64(out, self.entries_on_this_disk);
        put_u64(out, self.entries);
        put_u64(out, self.central_directory_size);
        put_u64(out, self.central_directory_offset);
        out.extend_from_slice(self.extensible_data);
    }
}

/// Finds the Zip64 end of central directory record, which must end
/// at or before `search_end` (where the locator starts).
///
/// Looks at the locator's nominal offset first,
/// then searches backward in case the archive has junk up front.
pub fn find_zip64_eocdr(mapping: &[u8], nominal: usize, search_end: usize) -> ZipResult<usize> {
    let search_end = search_end.min(mapping.len());
    let fits = |posit: usize| {
        posit
            .checked_add(ZIP64_EOCDR_SIZE)
            .is_some_and(|end| end <= search_end)
    };
    if fits(nominal) && mapping[nominal..nominal + 4] == ZIP64_EOCDR_MAGIC {
        return Ok(nominal);
    }
    // Only signatures with a whole record after them (before the locator) count.
    search_end
        .checked_sub(ZIP64_EOCDR_SIZE)
        .and_then(|last_start| memmem::rfind(&mapping[..last_start + 4], &ZIP64_EOCDR_MAGIC))
        .ok_or(ZipError::InvalidArchive(
            "Couldn't find zip64 End Of Central Directory Record",
        ))
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        expect_magic(entry, CENTRAL_DIRECTORY_MAGIC, "Central directory entry")?;
        let source_version = read_u16(entry)?;
        let minimum_extract_version = read_u16(entry)?;
        let flags = read_u16(entry)?;
        let compression_method = read_u16(entry)?;
        let last_modified_time = read_u16(entry)?;
        let last_modified_date = read_u16(entry)?;
        let crc32 = read_u32(entry)?;
        let compressed_size = read_u32(entry)?;
        let uncompressed_size = read_u32(entry)?;
        let path_length = read_u16(entry)? as usize;
        let extra_field_length = read_u16(entry)? as usize;
        let file_comment_length = read_u16(entry)? as usize;
        let disk_number = read_u16(entry)?;
        let internal_file_attributes = read_u16(entry)?;
        let external_file_attributes = read_u32(entry)?;
        let header_offset = read_u32(entry)?;
        let path = take(entry, path_length)?;
        let extra_field = take(entry, extra_field_length)?;
        let file_comment = take(entry, file_comment_length)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        put_u16(out, self.source_version);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
        put_u16(out, self.path.len() as u16);
        put_u16(out, self.extra_field.len() as u16);
        put_u16(out, self.file_comment.len() as u16);
        put_u16(out, self.disk_number);
        put_u16(out, self.internal_file_attributes);
        put_u32(out, self.external_file_attributes);
        put_u32(out, self.header_offset);
        out.extend_from_slice(self.path);
        out.extend_from_slice(self.extra_field);
        out.extend_from_slice(self.file_comment);
    }

    pub fn size_in_file(&self) -> usize {
        CENTRAL_DIRECTORY_ENTRY_SIZE
            + self.path.len()
            + self.extra_field.len()
            + self.file_comment.len()
    }
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers alllow for "streaming" decompression without
/// the use of the central directory,
/// but we only use them to find where the data starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader<'a> {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    /// Parses the local header starting at `offset` in the archive.
    pub fn parse(mapping: &'a [u8], offset: usize) -> ZipResult<Self> {
        let mut header = mapping
            .get(offset..)
            .ok_or(ZipError::InvalidArchive("Local header offset past end of archive"))?;
        Self::parse_and_consume(&mut header)
    }

    pub fn parse_and_consume(header: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        expect_magic(header, LOCAL_FILE_HEADER_MAGIC, "Local file header")?;
        let minimum_extract_version = read_u16(header)?;
        let flags = read_u16(header)?;
        let compression_method = read_u16(header)?;
        let last_modified_time = read_u16(header)?;
        let last_modified_date = read_u16(header)?;
        let crc32 = read_u32(header)?;
        let compressed_size = read_u32(header)?;
        let uncompressed_size = read_u32(header)?;
        let path_length = read_u16(header)? as usize;
        let extra_field_length = read_u16(header)? as usize;
        let path = take(header, path_length)?;
        let extra_field = take(header, extra_field_length)?;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        put_u16(out, self.minimum_extract_version);
        put_u16(out, self.flags);
        put_u16(out, self.compression_method);
        put_u16(out, self.last_modified_time);
        put_u16(out, self.last_modified_date);
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.uncompressed_size);
        put_u16(out, self.path.len() as u16);
        put_u16(out, self.extra_field.len() as u16);
        out.extend_from_slice(self.path);
        out.extend_from_slice(self.extra_field);
    }

    /// Bytes from the start of the header to the start of the file data
    pub fn size_in_file(&self) -> usize {
        LOCAL_FILE_HEADER_SIZE + self.path.len() + self.extra_field.len()
    }
}

/// Values that Zip64 can widen, as read from the 32-bit (and 16-bit) fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Values {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub header_offset: u64,
    pub disk_number: u32,
}

impl Zip64Values {
    pub fn from_cde(cde: &CentralDirectoryEntry) -> Self {
        Self {
            uncompressed_size: cde.uncompressed_size as u64,
            compressed_size: cde.compressed_size as u64,
            header_offset: cde.header_offset as u64,
            disk_number: cde.disk_number as u32,
        }
    }
}

/// Walks the "extra fields" found in central directory entries
/// and overrides sentinel values with those in the Zip64 record.
pub fn parse_zip64_extra(values: &mut Zip64Values, mut extra_field: &[u8]) -> ZipResult<()> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while !extra_field.is_empty() {
        let kind = read_u16(&mut extra_field)?;
        let field_len = read_u16(&mut extra_field)? as usize;
        let mut field = take(&mut extra_field, field_len)
            .map_err(|_| ZipError::InvalidArchive("Extra field overruns its record"))?;

        // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
        //
        // The order of the fields in the zip64 extended
        // information record is fixed, but the fields MUST
        // only appear if the corresponding Local or Central
        // directory record field is set to 0xFFFF or 0xFFFFFFFF.
        if kind == ZIP64_EXTRA_FIELD_TAG {
            let truncated = |_| ZipError::InvalidArchive("Truncated Zip64 extra field");
            if values.uncompressed_size == ZIP64_SENTINEL as u64 {
                values.uncompressed_size = read_u64(&mut field).map_err(truncated)?;
            }
            if values.compressed_size == ZIP64_SENTINEL as u64 {
                values.compressed_size = read_u64(&mut field).map_err(truncated)?;
            }
            if values.header_offset == ZIP64_SENTINEL as u64 {
                values.header_offset = read_u64(&mut field).map_err(truncated)?;
            }
            if values.disk_number == ZIP64_SENTINEL_16 as u32 {
                values.disk_number = read_u32(&mut field).map_err(truncated)?;
            }
        }
    }
    Ok(())
}

/// Copies an extra field, dropping any Zip64 record.
/// (Writers recompute that one from scratch.)
pub fn strip_zip64_extra(mut extra_field: &[u8]) -> ZipResult<Vec<u8>> {
    let mut kept = Vec::with_capacity(extra_field.len());
    while !extra_field.is_empty() {
        let record = extra_field;
        let kind = read_u16(&mut extra_field)?;
        let field_len = read_u16(&mut extra_field)? as usize;
        take(&mut extra_field, field_len)
            .map_err(|_| ZipError::InvalidArchive("Extra field overruns its record"))?;
        if kind != ZIP64_EXTRA_FIELD_TAG {
            kept.extend_from_slice(&record[..4 + field_len]);
        }
    }
    Ok(kept)
}

/// Builds a Zip64 extra record holding whichever values are given.
/// Values are written in the fixed order the spec demands.
pub fn zip64_extra(
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    header_offset: Option<u64>,
) -> Vec<u8> {
    let values: Vec<u64> = [uncompressed_size, compressed_size, header_offset]
        .into_iter()
        .flatten()
        .collect();
    let mut out = Vec::with_capacity(4 + 8 * values.len());
    put_u16(&mut out, ZIP64_EXTRA_FIELD_TAG);
    put_u16(&mut out, (8 * values.len()) as u16);
    for v in values {
        put_u64(&mut out, v);
    }
    out
}

/// How a data descriptor was laid out in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorLayout {
    /// `PK\7\8`, CRC, 32-bit sizes (16 bytes)
    Signed,
    /// `PK\7\8`, CRC, 64-bit sizes (24 bytes)
    Signed64,
    /// CRC and 32-bit sizes with no signature (12 bytes)
    Unsigned,
}

/// Data from a data descriptor
///
/// 4.3.9.1 This descriptor MUST exist if bit 3 of the general
/// purpose bit flag is set. It is byte aligned and immediately
/// follows the last byte of compressed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub layout: DescriptorLayout,
}

impl DataDescriptor {
    /// Figures out which descriptor layout follows the data ending at
    /// `data_end`, and reads it.
    ///
    /// 4.3.9.3 says the signature is optional, so this is a heuristic:
    /// a signature means a signed layout (64-bit sizes if the entry is Zip64);
    /// no signature but the next record's `PK` twelve bytes on means the
    /// signature-less layout. Anything else is unrecognized.
    pub fn sniff(mapping: &[u8], data_end: usize, zip64: bool) -> ZipResult<Self> {
        let first = peek_u32(mapping, data_end)
            .ok_or(ZipError::Descriptor("Data descriptor missing"))?;
        let first_bytes = first.to_le_bytes();
        if first_bytes == LOCAL_FILE_HEADER_MAGIC || first_bytes == CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::Descriptor("Data descriptor missing"));
        }

        let (layout, mut record) = if first_bytes == DATA_DESCRIPTOR_MAGIC {
            let layout = if zip64 {
                DescriptorLayout::Signed64
            } else {
                DescriptorLayout::Signed
            };
            (layout, &mapping[data_end + 4..])
        } else if peek_u16(mapping, data_end + 12) == Some(u16::from_le_bytes([b'P', b'K'])) {
            (DescriptorLayout::Unsigned, &mapping[data_end..])
        } else {
            return Err(ZipError::Descriptor("Unknown data descriptor"));
        };

        let short = |_| ZipError::Descriptor("Data descriptor truncated");
        let crc32 = read_u32(&mut record).map_err(short)?;
        let (compressed_size, uncompressed_size) = if layout == DescriptorLayout::Signed64 {
            (
                read_u64(&mut record).map_err(short)?,
                read_u64(&mut record).map_err(short)?,
            )
        } else {
            (
                read_u32(&mut record).map_err(short)? as u64,
                read_u32(&mut record).map_err(short)? as u64,
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
            layout,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        if self.layout != DescriptorLayout::Unsigned {
            out.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        }
        put_u32(out, self.crc32);
        if self.layout == DescriptorLayout::Signed64 {
            put_u64(out, self.compressed_size);
            put_u64(out, self.uncompressed_size);
        } else {
            put_u32(out, self.compressed_size as u32);
            put_u32(out, self.uncompressed_size as u32);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_cde() -> CentralDirectoryEntry<'static> {
        CentralDirectoryEntry {
            source_version: 0x0314,
            minimum_extract_version: 20,
            flags: FLAG_UTF8,
            compression_method: METHOD_DEFLATED,
            last_modified_time: 0x2209,
            last_modified_date: 0x4E8C,
            crc32: 0xDEAD_BEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: 0o100644 << 16,
            header_offset: 1234,
            path: b"dir/file.txt",
            extra_field: b"",
            file_comment: b"hi",
        }
    }

    #[test]
    fn central_entry_layout() {
        let cde = sample_cde();
        let mut out = Vec::new();
        cde.write_to(&mut out);
        assert_eq!(out.len(), cde.size_in_file());
        assert_eq!(&out[..4], &[0x50, 0x4b, 0x01, 0x02]);
        // Offset of the local header is the last fixed field.
        assert_eq!(&out[42..46], &1234u32.to_le_bytes());
        let mut slice = &out[..];
        assert_eq!(CentralDirectoryEntry::parse_and_consume(&mut slice).unwrap(), cde);
        assert!(slice.is_empty());
    }

    #[test]
    fn bad_magic_is_a_signature_error() {
        let mut out = Vec::new();
        sample_cde().write_to(&mut out);
        out[2] = 3;
        let mut slice = &out[..];
        assert!(matches!(
            CentralDirectoryEntry::parse_and_consume(&mut slice),
            Err(ZipError::Signature(_))
        ));
        assert!(matches!(
            LocalFileHeader::parse(&out, 0),
            Err(ZipError::Signature(_))
        ));
    }

    #[test]
    fn truncated_central_entry() {
        let mut out = Vec::new();
        sample_cde().write_to(&mut out);
        let mut slice = &out[..out.len() - 1];
        assert!(matches!(
            CentralDirectoryEntry::parse_and_consume(&mut slice),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn local_header_offsets() {
        let local = LocalFileHeader {
            minimum_extract_version: 20,
            flags: 0,
            compression_method: METHOD_STORED,
            last_modified_time: 0,
            last_modified_date: 0x21,
            crc32: 7,
            compressed_size: 3,
            uncompressed_size: 3,
            path: b"abc",
            extra_field: &[1, 2, 3, 4],
        };
        let mut out = vec![0xAA; 5];
        local.write_to(&mut out);
        assert_eq!(out.len(), 5 + 30 + 3 + 4);
        assert_eq!(&out[5 + 26..5 + 28], &3u16.to_le_bytes());
        let parsed = LocalFileHeader::parse(&out, 5).unwrap();
        assert_eq!(parsed, local);
        assert_eq!(parsed.size_in_file(), 37);
        assert!(LocalFileHeader::parse(&out, 1000).is_err());
    }

    #[test]
    fn eocdr_search_is_bounded() {
        let mut archive = vec![0u8; 100];
        let eocdr = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 0,
            entries: 0,
            central_directory_size: 0,
            central_directory_offset: 100,
            file_comment: b"comment",
        };
        eocdr.write_to(&mut archive);
        assert_eq!(find_eocdr(&archive, false).unwrap(), 100);
        assert_eq!(
            EndOfCentralDirectory::parse(&archive[100..]).unwrap(),
            eocdr
        );

        // Padding past the longest possible comment hides the record...
        archive.extend(std::iter::repeat(0).take(MAX_FIELD_LENGTH + 10));
        assert!(matches!(
            find_eocdr(&archive, false),
            Err(ZipError::InvalidArchive("No END header found"))
        ));
        // ...unless we're told to look through trailing space.
        assert_eq!(find_eocdr(&archive, true).unwrap(), 100);
    }

    #[test]
    fn eocdr_skips_candidates_in_comments() {
        let mut archive = Vec::new();
        let fake_comment = [b'P', b'K', 5, 6, 0, 0, 0, 0];
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 0,
            entries: 0,
            central_directory_size: 0,
            central_directory_offset: 0,
            file_comment: &fake_comment,
        }
        .write_to(&mut archive);
        // The fake record's comment length would be read from past the end.
        assert_eq!(find_eocdr(&archive, false).unwrap(), 0);
    }

    #[test]
    fn zip64_records() {
        let record = Zip64EndOfCentralDirectory {
            source_version: 45,
            minimum_extract_version: 45,
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 70_000,
            entries: 70_000,
            central_directory_size: 1 << 33,
            central_directory_offset: 1 << 34,
            extensible_data: b"",
        };
        let mut out = Vec::new();
        record.write_to(&mut out);
        assert_eq!(out.len(), ZIP64_EOCDR_SIZE);
        assert_eq!(Zip64EndOfCentralDirectory::parse(&out).unwrap(), record);

        // A record size near u64::MAX is an error, not an overflow.
        let mut huge = out.clone();
        huge[4..12].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            Zip64EndOfCentralDirectory::parse(&huge),
            Err(ZipError::InvalidArchive(_))
        ));
        // So is one smaller than the fixed fields.
        let mut tiny = out.clone();
        tiny[4..12].copy_from_slice(&1u64.to_le_bytes());
        assert!(matches!(
            Zip64EndOfCentralDirectory::parse(&tiny),
            Err(ZipError::InvalidArchive(_))
        ));

        let locator = Zip64EndOfCentralDirectoryLocator {
            disk_with_central_directory: 0,
            zip64_eocdr_offset: 42,
            disks: 1,
        };
        let mut out = Vec::new();
        locator.write_to(&mut out);
        assert_eq!(out.len(), ZIP64_EOCDR_LOCATOR_SIZE);
        assert_eq!(
            Zip64EndOfCentralDirectoryLocator::parse(&out).unwrap(),
            Some(locator)
        );
        assert_eq!(
            Zip64EndOfCentralDirectoryLocator::parse(&[0u8; 20]).unwrap(),
            None
        );
    }

    #[test]
    fn zip64_extra_overrides_only_sentinels() {
        let mut values = Zip64Values {
            uncompressed_size: 100,
            compressed_size: ZIP64_SENTINEL as u64,
            header_offset: 7,
            disk_number: 0,
        };
        // Some other record first, to make sure we walk the chain.
        let mut extra = vec![0x55, 0x54, 1, 0, 0xFF];
        extra.extend(zip64_extra(None, Some(5_000_000_000), None));
        parse_zip64_extra(&mut values, &extra).unwrap();
        assert_eq!(values.compressed_size, 5_000_000_000);
        assert_eq!(values.uncompressed_size, 100);
        assert_eq!(values.header_offset, 7);
    }

    #[test]
    fn zip64_extra_in_fixed_order() {
        let mut values = Zip64Values {
            uncompressed_size: ZIP64_SENTINEL as u64,
            compressed_size: ZIP64_SENTINEL as u64,
            header_offset: ZIP64_SENTINEL as u64,
            disk_number: 0,
        };
        let extra = zip64_extra(Some(1 << 32), Some(1 << 33), Some(1 << 34));
        parse_zip64_extra(&mut values, &extra).unwrap();
        assert_eq!(values.uncompressed_size, 1 << 32);
        assert_eq!(values.compressed_size, 1 << 33);
        assert_eq!(values.header_offset, 1 << 34);
    }

    #[test]
    fn truncated_zip64_extra() {
        let mut values = Zip64Values {
            uncompressed_size: ZIP64_SENTINEL as u64,
            compressed_size: ZIP64_SENTINEL as u64,
            header_offset: 0,
            disk_number: 0,
        };
        // Only one value for two sentinels
        let extra = zip64_extra(Some(1 << 32), None, None);
        assert!(parse_zip64_extra(&mut values, &extra).is_err());
        // Length runs past the end of the field
        let extra = [0x01, 0x00, 0x10, 0x00, 1, 2, 3];
        assert!(parse_zip64_extra(&mut values, &extra).is_err());
    }

    #[test]
    fn strip_keeps_other_records() {
        let mut extra = vec![0x55, 0x54, 1, 0, 0xFF];
        extra.extend(zip64_extra(Some(1), None, None));
        extra.extend([0x75, 0x78, 0, 0]);
        assert_eq!(
            strip_zip64_extra(&extra).unwrap(),
            vec![0x55, 0x54, 1, 0, 0xFF, 0x75, 0x78, 0, 0]
        );
    }

    #[test]
    fn descriptor_layouts() {
        let descriptor = DataDescriptor {
            crc32: 0x1234_5678,
            compressed_size: 3,
            uncompressed_size: 4,
            layout: DescriptorLayout::Signed,
        };
        let mut data = b"xyz".to_vec();
        descriptor.write_to(&mut data);
        data.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        assert_eq!(DataDescriptor::sniff(&data, 3, false).unwrap(), descriptor);

        let unsigned = DataDescriptor {
            layout: DescriptorLayout::Unsigned,
            ..descriptor
        };
        let mut data = b"xyz".to_vec();
        unsigned.write_to(&mut data);
        data.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        assert_eq!(DataDescriptor::sniff(&data, 3, false).unwrap(), unsigned);

        let wide = DataDescriptor {
            layout: DescriptorLayout::Signed64,
            compressed_size: 1 << 32,
            ..descriptor
        };
        let mut data = b"xyz".to_vec();
        wide.write_to(&mut data);
        assert_eq!(DataDescriptor::sniff(&data, 3, true).unwrap(), wide);
    }

    #[test]
    fn missing_or_unknown_descriptor() {
        let mut data = b"xyz".to_vec();
        data.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        data.extend_from_slice(&[0; 20]);
        assert!(matches!(
            DataDescriptor::sniff(&data, 3, false),
            Err(ZipError::Descriptor("Data descriptor missing"))
        ));
        let data = [0u8; 32];
        assert!(matches!(
            DataDescriptor::sniff(&data, 3, false),
            Err(ZipError::Descriptor("Unknown data descriptor"))
        ));
        assert!(DataDescriptor::sniff(b"xyz", 3, false).is_err());
    }
}
