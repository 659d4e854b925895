//! One file or folder in an archive: its metadata, and (lazily) its contents.
//!
//! Reading an entry goes through a few stages, none of which happen until
//! someone asks for the data:
//!
//! 1. Locate: parse the local file header and slice out the compressed data.
//! 2. Decrypt, if the entry is encrypted.
//! 3. Decompress.
//! 4. Verify the CRC-32 against the local header, or the data descriptor
//!    if the sizes and CRC were deferred there.
//!
//! The result is cached, so reading twice costs nothing.
//! Setting an entry's data makes it dirty: its uncompressed bytes become
//! the source of truth until the archive is next written.

use std::borrow::Cow;
use std::cell::OnceCell;
use std::fmt;

use chrono::NaiveDateTime;
use codepage_437::*;
use log::*;

use crate::compression::{self, CompressionMethod};
use crate::crypto::{self, SaltSource, ZipCrypto, ENCRYPTION_HEADER_SIZE};
use crate::result::*;
use crate::spec::{self, *};
use crate::util::{self, usize};

/// Turns raw name bytes from the archive into a `String`.
///
/// Swap this out (via [`OpenOptions`](crate::OpenOptions)) for archives
/// written by tools that use some other code page without saying so.
pub trait NameDecoder {
    /// `utf8_flag` is general purpose bit 11.
    fn decode(&self, raw: &[u8], utf8_flag: bool) -> ZipResult<String>;
}

/// UTF-8 when the entry says so, CP437 (the APPNOTE default) otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNameDecoder;

impl NameDecoder for DefaultNameDecoder {
    fn decode(&self, raw: &[u8], utf8_flag: bool) -> ZipResult<String> {
        if utf8_flag {
            Ok(std::str::from_utf8(raw)?.to_owned())
        } else {
            Ok(Cow::<str>::borrow_from_cp437(raw, &CP437_CONTROL).into_owned())
        }
    }
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// A record in the central directory, or something the user added
    Real,
    /// A folder implied by some other entry's path,
    /// with no central directory record of its own
    Synthesized,
}

/// How much we know about an entry's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Only the central directory metadata has been read.
    Unread,
    /// The contents were read, checked, and cached.
    Decompressed,
    /// The contents were replaced and haven't been written out yet.
    Dirty,
}

/// Header values for an entry, widened to 64 bits where Zip64 allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryHeader {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number: u32,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    /// Offset of the local header from the start of the buffer
    pub header_offset: u64,
}

/// An entry's bytes as they'll be written, and the header to go with them
pub(crate) struct Payload<'a> {
    pub data: Cow<'a, [u8]>,
    pub header: EntryHeader,
    pub descriptor: Option<DataDescriptor>,
}

/// An entry in a [`ZipArchive`](crate::ZipArchive)
pub struct ZipEntry {
    name: String,
    raw_name: Vec<u8>,
    extra: Vec<u8>,
    comment: Vec<u8>,
    pub(crate) header: EntryHeader,
    origin: EntryOrigin,
    /// Replacement contents, if the user set some
    dirty: Option<Vec<u8>>,
    /// Contents read from the archive, once verified
    cache: OnceCell<Vec<u8>>,
    /// Encrypt with this when writing
    password: Option<Vec<u8>>,
    /// Also put the second CRC byte in the encryption header
    legacy_check: bool,
}

impl fmt::Debug for ZipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipEntry")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .field("header", &self.header)
            .finish()
    }
}

/// The "version made by" we write: APPNOTE 2.0, on this OS
fn default_source_version() -> u16 {
    // 4.4.2.2: 0 - MS-DOS and OS/2, 3 - UNIX, 10 - Windows NTFS
    let host: u16 = if cfg!(windows) { 10 } else { 3 };
    (host << 8) | VERSION_DEFLATE
}

impl ZipEntry {
    /// Builds an entry from its central directory record.
    ///
    /// `archive_offset` is the number of bytes prepended to the archive,
    /// which all stored offsets are off by.
    pub(crate) fn from_cde(
        cde: &CentralDirectoryEntry,
        decoder: &dyn NameDecoder,
        archive_offset: u64,
    ) -> ZipResult<Self> {
        let mut wide = Zip64Values::from_cde(cde);
        spec::parse_zip64_extra(&mut wide, cde.extra_field)?;

        let name = decoder.decode(cde.path, spec::is_utf8(cde.flags))?;

        if wide.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                name, wide.disk_number,
            )));
        }

        let header = EntryHeader {
            source_version: cde.source_version,
            minimum_extract_version: cde.minimum_extract_version,
            flags: cde.flags,
            compression_method: cde.compression_method,
            last_modified_time: cde.last_modified_time,
            last_modified_date: cde.last_modified_date,
            crc32: cde.crc32,
            compressed_size: wide.compressed_size,
            uncompressed_size: wide.uncompressed_size,
            disk_number: wide.disk_number,
            internal_file_attributes: cde.internal_file_attributes,
            external_file_attributes: cde.external_file_attributes,
            header_offset: wide
                .header_offset
                .checked_add(archive_offset)
                .ok_or(ZipError::InvalidArchive("Local header offset overflows"))?,
        };

        Ok(Self {
            name,
            raw_name: cde.path.to_vec(),
            extra: cde.extra_field.to_vec(),
            comment: cde.file_comment.to_vec(),
            header,
            origin: EntryOrigin::Real,
            dirty: None,
            cache: OnceCell::new(),
            password: None,
            legacy_check: false,
        })
    }

    /// A new, empty entry with the given (already canonical) name,
    /// stamped with the current time.
    pub(crate) fn new(name: String) -> ZipResult<Self> {
        if name.len() > MAX_FIELD_LENGTH {
            return Err(ZipError::Capacity(format!(
                "Entry name is {} bytes; the limit is {MAX_FIELD_LENGTH}",
                name.len()
            )));
        }
        let is_dir = util::is_directory_name(&name);
        let (time, date) = util::to_msdos(chrono::Local::now().naive_local());
        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        let header = EntryHeader {
            source_version: default_source_version(),
            minimum_extract_version: if is_dir {
                VERSION_DEFLATE
            } else {
                VERSION_STORED
            },
            flags,
            compression_method: METHOD_STORED,
            last_modified_time: time,
            last_modified_date: date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: util::external_attributes(is_dir, None),
            header_offset: 0,
        };
        Ok(Self {
            raw_name: name.as_bytes().to_vec(),
            name,
            extra: Vec::new(),
            comment: Vec::new(),
            header,
            origin: EntryOrigin::Real,
            dirty: Some(Vec::new()),
            cache: OnceCell::new(),
            password: None,
            legacy_check: false,
        })
    }

    /// A folder implied by another entry's path
    pub(crate) fn synthesized(name: String) -> ZipResult<Self> {
        let mut entry = Self::new(name)?;
        entry.origin = EntryOrigin::Synthesized;
        entry.dirty = None;
        let _ = entry.cache.set(Vec::new());
        Ok(entry)
    }

    /// The entry's path inside the archive, with `/` separators
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name exactly as stored in the archive
    pub fn raw_name(&self) -> &[u8] {
        &self.raw_name
    }

    /// Names ending in a slash are folders.
    pub fn is_directory(&self) -> bool {
        util::is_directory_name(&self.name)
    }

    pub fn origin(&self) -> EntryOrigin {
        self.origin
    }

    /// True for folders that exist only because some entry's path implies them
    pub fn is_synthesized(&self) -> bool {
        self.origin == EntryOrigin::Synthesized
    }

    pub fn state(&self) -> EntryState {
        if self.dirty.is_some() {
            EntryState::Dirty
        } else if self.cache.get().is_some() {
            EntryState::Decompressed
        } else {
            EntryState::Unread
        }
    }

    /// Uncompressed size in bytes
    pub fn size(&self) -> u64 {
        match &self.dirty {
            Some(data) => data.len() as u64,
            None => self.header.uncompressed_size,
        }
    }

    /// Compressed size in bytes, as of the last time the archive was read or written.
    /// (Dirty entries aren't compressed until the archive is written.)
    pub fn compressed_size(&self) -> u64 {
        self.header.compressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.header.compression_method)
    }

    /// The CRC-32 of the uncompressed contents
    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    pub fn is_encrypted(&self) -> bool {
        spec::is_encrypted(self.header.flags)
    }

    pub fn has_data_descriptor(&self) -> bool {
        spec::has_data_descriptor(self.header.flags)
    }

    /// The date and time the file was last modified
    pub fn last_modified(&self) -> NaiveDateTime {
        util::from_msdos(self.header.last_modified_time, self.header.last_modified_date)
    }

    pub fn set_last_modified(&mut self, when: NaiveDateTime) {
        let (time, date) = util::to_msdos(when);
        self.header.last_modified_time = time;
        self.header.last_modified_date = date;
    }

    pub fn external_attributes(&self) -> u32 {
        self.header.external_file_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.header.external_file_attributes = attributes;
    }

    /// Unix permission bits, if the archive recorded any.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits, or do other cross-OS handwaving.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.header.external_file_attributes >> 16;
        if mode == 0 {
            None
        } else {
            Some(mode & 0o7777)
        }
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    pub fn set_extra(&mut self, extra: Vec<u8>) -> ZipResult<()> {
        if extra.len() > MAX_FIELD_LENGTH {
            return Err(ZipError::Capacity(format!(
                "Extra field is {} bytes; the limit is {MAX_FIELD_LENGTH}",
                extra.len()
            )));
        }
        self.extra = extra;
        Ok(())
    }

    /// The entry's comment, decoded the same way as its name.
    pub fn comment(&self) -> Cow<'_, str> {
        if spec::is_utf8(self.header.flags) {
            String::from_utf8_lossy(&self.comment)
        } else {
            Cow::borrow_from_cp437(&self.comment, &CP437_CONTROL)
        }
    }

    pub fn raw_comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: &str) -> ZipResult<()> {
        check_comment(comment)?;
        if !comment.is_ascii() {
            if !spec::is_utf8(self.header.flags) && !self.name.is_ascii() {
                // Flipping the flag would reinterpret a CP437 name as UTF-8.
                self.raw_name = self.name.as_bytes().to_vec();
            }
            self.header.flags |= FLAG_UTF8;
        }
        self.comment = comment.as_bytes().to_vec();
        Ok(())
    }

    /// Encrypt this entry with traditional PKWARE encryption
    /// the next time the archive is written. `None` stops doing so
    /// for entries that aren't encrypted yet.
    ///
    /// Entries already encrypted in the archive can't be given a new
    /// password directly; [`set_data()`](Self::set_data) them first.
    pub fn set_password(&mut self, password: Option<&[u8]>) -> ZipResult<()> {
        if password.is_some() && self.is_encrypted() && self.dirty.is_none() {
            return Err(ZipError::UnsupportedArchive(format!(
                "{} is already encrypted; set its data again to change the password",
                self.name
            )));
        }
        self.password = password.map(<[u8]>::to_vec);
        Ok(())
    }

    /// Write the encryption header the way PKZIP before 2.04g did,
    /// with the two high bytes of the CRC instead of one.
    /// Only matters for entries without a data descriptor.
    pub fn set_legacy_password_check(&mut self, legacy: bool) {
        self.legacy_check = legacy;
    }

    /// Replaces the entry's contents.
    ///
    /// The CRC is computed now; compression waits until the archive is written.
    /// Empty contents are STORED, anything else DEFLATED.
    pub fn set_data(&mut self, data: Vec<u8>) -> ZipResult<()> {
        check_folder_data(&self.name, &data)?;
        self.header.crc32 = util::crc32(&data);
        self.header.compression_method = if data.is_empty() {
            METHOD_STORED
        } else {
            METHOD_DEFLATED
        };
        self.header.uncompressed_size = data.len() as u64;
        self.header.compressed_size = data.len() as u64;
        self.header.flags &= !(FLAG_ENCRYPTED | FLAG_DATA_DESCRIPTOR);
        self.origin = EntryOrigin::Real;
        self.cache = OnceCell::new();
        self.dirty = Some(data);
        debug!("Set {} bytes of data for {}", self.size(), self.name);
        Ok(())
    }

    fn is_zip64(&self) -> bool {
        self.header.compressed_size >= ZIP64_SENTINEL as u64
            || self.header.uncompressed_size >= ZIP64_SENTINEL as u64
    }

    /// The byte checked against the decrypted encryption header:
    /// the high byte of the time if a data descriptor is in play
    /// (the CRC wasn't known when the header was written),
    /// the high byte of the CRC otherwise.
    fn password_check_byte(&self) -> u8 {
        if self.has_data_descriptor() {
            (self.header.last_modified_time >> 8) as u8
        } else {
            (self.header.crc32 >> 24) as u8
        }
    }

    fn require_password<'p>(&self, password: Option<&'p [u8]>) -> ZipResult<&'p [u8]> {
        password.ok_or_else(|| ZipError::PasswordRequired(self.name.clone()))
    }

    /// Checks `password` against the entry's encryption header
    /// without decrypting anything else.
    fn check_password(&self, mapping: &[u8], password: Option<&[u8]>) -> ZipResult<()> {
        let password = self.require_password(password)?;
        let (_, data_start, data_end) = self.locate(mapping)?;
        let header: &[u8; ENCRYPTION_HEADER_SIZE] = mapping[data_start..data_end]
            .get(..ENCRYPTION_HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(ZipError::InvalidArchive(
                "Encrypted entry shorter than its encryption header",
            ))?;
        if !ZipCrypto::new(password).check_header(header, self.password_check_byte()) {
            return Err(ZipError::WrongPassword(self.name.clone()));
        }
        Ok(())
    }

    /// Finds this entry's compressed data in the archive.
    fn locate<'m>(&self, mapping: &'m [u8]) -> ZipResult<(LocalFileHeader<'m>, usize, usize)> {
        let header_offset = usize(self.header.header_offset)?;
        let local = LocalFileHeader::parse(mapping, header_offset)?;
        trace!("{:?}", local);

        if cfg!(feature = "check-local-metadata")
            && (local.path != self.raw_name.as_slice()
                || local.compression_method != self.header.compression_method)
        {
            return Err(ZipError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }

        let data_start = header_offset + local.size_in_file();
        let data_end = data_start
            .checked_add(usize(self.header.compressed_size)?)
            .filter(|end| *end <= mapping.len())
            .ok_or(ZipError::InvalidArchive("Entry data runs past end of archive"))?;
        Ok((local, data_start, data_end))
    }

    /// Reads the data descriptor after the entry's data
    /// and makes sure it agrees with the central directory.
    fn read_descriptor(&self, mapping: &[u8], data_end: usize) -> ZipResult<DataDescriptor> {
        let descriptor = DataDescriptor::sniff(mapping, data_end, self.is_zip64())?;
        trace!("{:?}", descriptor);
        if descriptor.compressed_size != self.header.compressed_size
            || descriptor.uncompressed_size != self.header.uncompressed_size
            || descriptor.crc32 != self.header.crc32
        {
            return Err(ZipError::Descriptor(
                "Data descriptor disagrees with central directory",
            ));
        }
        Ok(descriptor)
    }

    /// Returns the entry's contents, reading them from `mapping` if needed.
    /// The result is cached, but encrypted entries still want the right
    /// password every time.
    ///
    /// Callers never see data whose CRC didn't check out.
    pub(crate) fn data(&self, mapping: &[u8], password: Option<&[u8]>) -> ZipResult<&[u8]> {
        match self.load(mapping, password)? {
            Cow::Borrowed(data) => Ok(data),
            Cow::Owned(data) => Ok(self.cache.get_or_init(move || data).as_slice()),
        }
    }

    /// Like [`data()`](Self::data), but freshly read contents aren't kept.
    /// Bulk extraction reads this way so only one entry is in memory at a time.
    pub(crate) fn load<'a>(
        &'a self,
        mapping: &[u8],
        password: Option<&[u8]>,
    ) -> ZipResult<Cow<'a, [u8]>> {
        if let Some(dirty) = &self.dirty {
            return Ok(Cow::Borrowed(dirty.as_slice()));
        }
        if let Some(cached) = self.cache.get() {
            if self.is_encrypted() {
                self.check_password(mapping, password)?;
            }
            return Ok(Cow::Borrowed(cached.as_slice()));
        }
        if self.is_directory() {
            return Ok(Cow::Borrowed(&[][..]));
        }

        let (local, data_start, data_end) = self.locate(mapping)?;
        let mut compressed = Cow::Borrowed(&mapping[data_start..data_end]);

        let expected_crc = if self.has_data_descriptor() {
            self.read_descriptor(mapping, data_end)?.crc32
        } else {
            local.crc32
        };

        if self.is_encrypted() {
            let password = self.require_password(password)?;
            if compressed.len() < ENCRYPTION_HEADER_SIZE {
                return Err(ZipError::InvalidArchive(
                    "Encrypted entry shorter than its encryption header",
                ));
            }
            let decrypted = crypto::decrypt(&compressed, self.password_check_byte(), password)
                .ok_or_else(|| ZipError::WrongPassword(self.name.clone()))?;
            compressed = Cow::Owned(decrypted);
        }

        let inflated = compression::decompress(
            self.compression_method(),
            &compressed,
            usize(self.header.uncompressed_size)?,
        )?;
        if inflated.crc32 != expected_crc {
            return Err(ZipError::Checksum {
                name: self.name.clone(),
                expected: expected_crc,
                actual: inflated.crc32,
            });
        }
        debug!("Read {} ({} bytes)", self.name, inflated.data.len());
        Ok(Cow::Owned(inflated.data))
    }

    /// Produces the bytes to write for this entry (compressing and
    /// encrypting dirty contents) and the header describing them.
    ///
    /// Entries that weren't touched are copied through as-is.
    pub(crate) fn payload<'m>(
        &'m self,
        mapping: &'m [u8],
        salt_source: &mut dyn SaltSource,
    ) -> ZipResult<Payload<'m>> {
        let mut header = self.header.clone();

        let needs_encryption = self.password.is_some() && !self.is_encrypted();
        if self.dirty.is_none() && !needs_encryption && !self.is_directory() {
            let (_, data_start, data_end) = self.locate(mapping)?;
            let descriptor = if self.has_data_descriptor() {
                let mut descriptor = self.read_descriptor(mapping, data_end)?;
                descriptor.layout = if self.is_zip64() {
                    DescriptorLayout::Signed64
                } else {
                    DescriptorLayout::Signed
                };
                Some(descriptor)
            } else {
                None
            };
            return Ok(Payload {
                data: Cow::Borrowed(&mapping[data_start..data_end]),
                header,
                descriptor,
            });
        }

        let loaded;
        let contents: &[u8] = match &self.dirty {
            Some(dirty) => dirty,
            None if self.is_directory() => &[],
            None => {
                loaded = self.load(mapping, None)?;
                &loaded
            }
        };
        if self.is_directory() {
            header.compression_method = METHOD_STORED;
        }
        let method = CompressionMethod::from_u16(header.compression_method);
        let mut data = compression::compress(method, contents)?;
        header.flags &= !(FLAG_ENCRYPTED | FLAG_DATA_DESCRIPTOR);
        if let Some(password) = &self.password {
            if !contents.is_empty() || !self.is_directory() {
                data = crypto::encrypt(
                    &data,
                    header.crc32,
                    password,
                    salt_source,
                    self.legacy_check,
                );
                header.flags |= FLAG_ENCRYPTED;
            }
        }
        header.uncompressed_size = contents.len() as u64;
        header.compressed_size = data.len() as u64;
        Ok(Payload {
            data: Cow::Owned(data),
            header,
            descriptor: None,
        })
    }

    /// Emits the local file header for a payload about to be written at
    /// `header.header_offset`.
    pub(crate) fn write_local_header(&self, header: &EntryHeader, out: &mut Vec<u8>) -> ZipResult<()> {
        let zip64 = needs_zip64_sizes(header);
        let mut extra = spec::strip_zip64_extra(&self.extra)?;
        if zip64 {
            // 4.5.3: the local header's Zip64 record MUST have both sizes.
            extra.extend(spec::zip64_extra(
                Some(header.uncompressed_size),
                Some(header.compressed_size),
                None,
            ));
        }
        check_extra_length(&extra, &self.name)?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (header.compressed_size as u32, header.uncompressed_size as u32)
        };
        LocalFileHeader {
            minimum_extract_version: header.minimum_extract_version,
            flags: header.flags,
            compression_method: header.compression_method,
            last_modified_time: header.last_modified_time,
            last_modified_date: header.last_modified_date,
            crc32: header.crc32,
            compressed_size,
            uncompressed_size,
            path: &self.raw_name,
            extra_field: &extra,
        }
        .write_to(out);
        Ok(())
    }

    /// Emits the central directory record for a written payload.
    pub(crate) fn write_central_header(
        &self,
        header: &EntryHeader,
        out: &mut Vec<u8>,
    ) -> ZipResult<()> {
        let widen = |v: u64| (v >= ZIP64_SENTINEL as u64).then_some(v);
        let uncompressed = widen(header.uncompressed_size);
        let compressed = widen(header.compressed_size);
        let offset = widen(header.header_offset);

        let mut extra = spec::strip_zip64_extra(&self.extra)?;
        if uncompressed.is_some() || compressed.is_some() || offset.is_some() {
            extra.extend(spec::zip64_extra(uncompressed, compressed, offset));
        }
        check_extra_length(&extra, &self.name)?;
        let narrow = |v: u64| v.min(ZIP64_SENTINEL as u64) as u32;
        CentralDirectoryEntry {
            source_version: header.source_version,
            minimum_extract_version: header.minimum_extract_version,
            flags: header.flags,
            compression_method: header.compression_method,
            last_modified_time: header.last_modified_time,
            last_modified_date: header.last_modified_date,
            crc32: header.crc32,
            compressed_size: narrow(header.compressed_size),
            uncompressed_size: narrow(header.uncompressed_size),
            disk_number: 0,
            internal_file_attributes: header.internal_file_attributes,
            external_file_attributes: header.external_file_attributes,
            header_offset: narrow(header.header_offset),
            path: &self.raw_name,
            extra_field: &extra,
            file_comment: &self.comment,
        }
        .write_to(out);
        Ok(())
    }

    /// Makes the entry a clean view of what was just written for it.
    pub(crate) fn commit(&mut self, header: EntryHeader) {
        let plaintext = self.dirty.take();
        self.header = header;
        if !self.is_encrypted() {
            if let Some(data) = plaintext {
                self.cache = OnceCell::new();
                let _ = self.cache.set(data);
            }
        } else {
            // Make callers prove they know the password again.
            self.cache = OnceCell::new();
            self.password = None;
        }
    }
}

fn needs_zip64_sizes(header: &EntryHeader) -> bool {
    header.compressed_size >= ZIP64_SENTINEL as u64
        || header.uncompressed_size >= ZIP64_SENTINEL as u64
}

pub(crate) fn check_comment(comment: &str) -> ZipResult<()> {
    if comment.len() > MAX_FIELD_LENGTH {
        return Err(ZipError::Capacity(format!(
            "Entry comment is {} bytes; the limit is {MAX_FIELD_LENGTH}",
            comment.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_folder_data(name: &str, data: &[u8]) -> ZipResult<()> {
    if util::is_directory_name(name) && !data.is_empty() {
        return Err(ZipError::UnsupportedArchive(format!(
            "{name} is a folder and can't hold data"
        )));
    }
    Ok(())
}

fn check_extra_length(extra: &[u8], name: &str) -> ZipResult<()> {
    if extra.len() > MAX_FIELD_LENGTH {
        return Err(ZipError::Capacity(format!(
            "Extra field of {name} grows to {} bytes",
            extra.len()
        )));
    }
    Ok(())
}

/// Fills in the version fields a header needs, given what it uses.
pub(crate) fn settle_versions(header: &mut EntryHeader, is_directory: bool) {
    let needed = if needs_zip64_sizes(header) || header.header_offset >= ZIP64_SENTINEL as u64 {
        VERSION_ZIP64
    } else if header.compression_method == METHOD_DEFLATED
        || is_directory
        || spec::is_encrypted(header.flags)
    {
        VERSION_DEFLATE
    } else {
        VERSION_STORED
    };
    header.minimum_extract_version = header.minimum_extract_version.max(needed);
    let made_by = (header.source_version & 0xff).max(header.minimum_extract_version);
    header.source_version = (header.source_version & 0xff00) | made_by;
}

#[cfg(test)]
mod test {
    use super::*;

    fn no_salt(salt: &mut [u8]) {
        salt.fill(0x5A);
    }

    /// Writes one entry as a bare local header + data, the way the directory
    /// writer would, and returns the buffer and the committed header.
    fn write_alone(entry: &ZipEntry) -> (Vec<u8>, EntryHeader) {
        let payload = entry.payload(&[], &mut no_salt).unwrap();
        let mut header = payload.header.clone();
        header.header_offset = 0;
        settle_versions(&mut header, entry.is_directory());
        let mut out = Vec::new();
        entry.write_local_header(&header, &mut out).unwrap();
        out.extend_from_slice(&payload.data);
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        (out, header)
    }

    #[test]
    fn set_data_picks_method_and_crc() {
        let mut entry = ZipEntry::new("lib/native.so".to_owned()).unwrap();
        assert_eq!(entry.state(), EntryState::Dirty);
        entry.set_data(b"ELF".to_vec()).unwrap();
        assert_eq!(entry.compression_method(), CompressionMethod::Deflated);
        assert_eq!(entry.crc32(), util::crc32(b"ELF"));
        entry.set_data(Vec::new()).unwrap();
        assert_eq!(entry.compression_method(), CompressionMethod::Stored);
        assert_eq!(entry.size(), 0);
    }

    #[test]
    fn folders_hold_no_data() {
        let mut entry = ZipEntry::new("lib/".to_owned()).unwrap();
        assert!(entry.is_directory());
        assert!(entry.set_data(b"x".to_vec()).is_err());
        assert_eq!(entry.unix_mode(), Some(0o755));
        let backslashed = ZipEntry::new("win\\".to_owned()).unwrap();
        assert!(backslashed.is_directory());
    }

    #[test]
    fn written_entry_reads_back() {
        let mut entry = ZipEntry::new("a.txt".to_owned()).unwrap();
        let text = b"hello hello hello hello".to_vec();
        entry.set_data(text.clone()).unwrap();
        let (out, header) = write_alone(&entry);
        entry.commit(header);
        // Drop the cache to force a real read.
        entry.cache = OnceCell::new();
        assert_eq!(entry.state(), EntryState::Unread);
        assert_eq!(entry.data(&out, None).unwrap(), &text[..]);
        assert_eq!(entry.state(), EntryState::Decompressed);
    }

    #[test]
    fn corrupted_data_fails_crc() {
        let mut entry = ZipEntry::new("a.txt".to_owned()).unwrap();
        entry.set_data(b"abc".to_vec()).unwrap();
        entry.header.compression_method = METHOD_STORED;
        let mut header = entry.header.clone();
        header.header_offset = 0;
        let mut out = Vec::new();
        entry.write_local_header(&header, &mut out).unwrap();
        out.extend_from_slice(b"abd");
        entry.dirty = None;
        entry.header = header;
        assert!(matches!(
            entry.data(&out, None),
            Err(ZipError::Checksum { .. })
        ));
        // Nothing got cached
        assert_eq!(entry.state(), EntryState::Unread);
    }

    #[test]
    fn encrypted_entries_need_the_right_password() {
        let mut entry = ZipEntry::new("secret.txt".to_owned()).unwrap();
        entry.set_data(b"attack at dawn".to_vec()).unwrap();
        entry.set_password(Some(b"abc")).unwrap();
        let (out, header) = write_alone(&entry);
        entry.commit(header);
        assert!(entry.is_encrypted());
        assert!(matches!(
            entry.data(&out, None),
            Err(ZipError::PasswordRequired(_))
        ));
        assert!(matches!(
            entry.data(&out, Some(b"abd")),
            Err(ZipError::WrongPassword(_))
        ));
        assert_eq!(entry.data(&out, Some(b"abc")).unwrap(), b"attack at dawn");
        assert_eq!(entry.state(), EntryState::Decompressed);

        // Once cached, the password is still checked on every read.
        assert!(matches!(
            entry.data(&out, Some(b"abd")),
            Err(ZipError::WrongPassword(_))
        ));
        assert!(matches!(
            entry.load(&out, None),
            Err(ZipError::PasswordRequired(_))
        ));
        assert_eq!(entry.data(&out, Some(b"abc")).unwrap(), b"attack at dawn");
    }

    #[test]
    fn encrypted_entries_keep_their_password() {
        let mut entry = ZipEntry::new("secret.txt".to_owned()).unwrap();
        entry.set_data(b"attack at dawn".to_vec()).unwrap();
        entry.set_password(Some(b"abc")).unwrap();
        let (_, header) = write_alone(&entry);
        entry.commit(header);
        assert!(entry.set_password(Some(b"xyz")).is_err());
        assert!(entry.set_password(None).is_ok());

        // New contents can go out under a new password.
        entry.set_data(b"retreat".to_vec()).unwrap();
        entry.set_password(Some(b"xyz")).unwrap();
        let (out, header) = write_alone(&entry);
        entry.commit(header);
        assert_eq!(entry.data(&out, Some(b"xyz")).unwrap(), b"retreat");
    }

    #[test]
    fn legacy_password_check() {
        let name = "legacy.txt";
        let mut entry = ZipEntry::new(name.to_owned()).unwrap();
        entry.set_data(b"pkzip 1.10".to_vec()).unwrap();
        entry.set_password(Some(b"abc")).unwrap();
        entry.set_legacy_password_check(true);
        let (out, header) = write_alone(&entry);

        let start = LOCAL_FILE_HEADER_SIZE + name.len();
        let mut encryption_header = [0u8; ENCRYPTION_HEADER_SIZE];
        encryption_header.copy_from_slice(&out[start..start + ENCRYPTION_HEADER_SIZE]);
        ZipCrypto::new(b"abc").decrypt(&mut encryption_header);
        let crc = util::crc32(b"pkzip 1.10");
        assert_eq!(encryption_header[11], (crc >> 24) as u8);
        assert_eq!(encryption_header[10], (crc >> 16) as u8);

        entry.commit(header);
        assert_eq!(entry.data(&out, Some(b"abc")).unwrap(), b"pkzip 1.10");
    }

    #[test]
    fn descriptors_are_cross_checked() {
        let mut entry = ZipEntry::new("d.txt".to_owned()).unwrap();
        entry.set_data(b"described".to_vec()).unwrap();
        entry.header.compression_method = METHOD_STORED;
        entry.dirty = None;
        entry.header.flags |= FLAG_DATA_DESCRIPTOR;
        entry.header.compressed_size = 9;
        entry.header.uncompressed_size = 9;

        let local_crc_unknown = EntryHeader {
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            ..entry.header.clone()
        };
        let mut out = Vec::new();
        entry.write_local_header(&local_crc_unknown, &mut out).unwrap();
        out.extend_from_slice(b"described");
        let mut descriptor = DataDescriptor {
            crc32: entry.header.crc32,
            compressed_size: 9,
            uncompressed_size: 9,
            layout: DescriptorLayout::Signed,
        };
        let mut good = out.clone();
        descriptor.write_to(&mut good);
        good.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        assert_eq!(entry.data(&good, None).unwrap(), b"described");

        entry.cache = OnceCell::new();
        descriptor.uncompressed_size = 10;
        let mut bad = out;
        descriptor.write_to(&mut bad);
        bad.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        assert!(matches!(
            entry.data(&bad, None),
            Err(ZipError::Descriptor(_))
        ));
    }

    #[test]
    fn cp437_names() {
        let decoder = DefaultNameDecoder;
        assert_eq!(decoder.decode(b"caf\x82", false).unwrap(), "café");
        assert_eq!(decoder.decode("café".as_bytes(), true).unwrap(), "café");
        assert!(decoder.decode(b"caf\x82", true).is_err());
    }

    #[test]
    fn versions_follow_features() {
        let mut entry = ZipEntry::new("big".to_owned()).unwrap();
        entry.set_data(b"x".to_vec()).unwrap();
        let mut header = entry.header.clone();
        settle_versions(&mut header, false);
        assert_eq!(header.minimum_extract_version, VERSION_DEFLATE);
        header.compressed_size = 1 << 32;
        settle_versions(&mut header, false);
        assert_eq!(header.minimum_extract_version, VERSION_ZIP64);
        assert_eq!(header.source_version & 0xff, VERSION_ZIP64);
    }
}
