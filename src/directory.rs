//! The archive's table of contents: finding and parsing the central directory,
//! keeping entries indexed by name, and writing the whole archive back out.

use std::collections::HashMap;

use log::*;

use crate::crypto::SaltSource;
use crate::entry::{self, EntryHeader, NameDecoder, ZipEntry};
use crate::result::*;
use crate::spec::*;
use crate::util::{self, usize};

/// Where a name points in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Real(usize),
    Synthesized(usize),
}

/// Every entry in an archive, indexed by name.
///
/// Real entries (ones with a central directory record, or added by the user)
/// and synthesized folders live in separate lists so the former can be handed
/// out as a slice.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    real: Vec<ZipEntry>,
    synthesized: Vec<ZipEntry>,
    index: HashMap<String, Slot>,
    comment: Vec<u8>,
    sorted: bool,
}

fn sort_entries(entries: &mut [ZipEntry]) {
    entries.sort_by_cached_key(|e| e.name().to_lowercase());
}

impl Directory {
    pub fn empty(sorted: bool) -> Self {
        Self {
            sorted,
            ..Default::default()
        }
    }

    /// Parses the central directory of the archive in `mapping`.
    ///
    /// Bytes prepended to the archive (a self-extractor stub, say) are
    /// tolerated, and entry offsets are adjusted to match.
    pub fn parse(
        mapping: &[u8],
        trailing_space: bool,
        decoder: &dyn NameDecoder,
        sorted: bool,
    ) -> ZipResult<Self> {
        let eocdr_posit = find_eocdr(mapping, trailing_space)?;
        let eocdr = EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        // Zip files can be prepended by arbitrary junk,
        // so all the given positions might be off.
        // Calculate the offset.
        let archive_offset: usize;
        let central_directory_offset: usize;
        let entry_count: u64;

        let locator = match eocdr_posit.checked_sub(ZIP64_EOCDR_LOCATOR_SIZE) {
            Some(locator_posit) => {
                Zip64EndOfCentralDirectoryLocator::parse(&mapping[locator_posit..eocdr_posit])?
                    .map(|locator| (locator_posit, locator))
            }
            None => None,
        };

        if let Some((locator_posit, locator)) = locator {
            trace!("{:?}", locator);

            if eocdr.disk_number as u32 != locator.disk_with_central_directory {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
                    eocdr.disk_number, locator.disk_with_central_directory
                )));
            }
            if locator.disks > 1 {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    locator.disks
                )));
            }

            let nominal = usize(locator.zip64_eocdr_offset)?;
            let zip64_posit = find_zip64_eocdr(mapping, nominal, locator_posit)?;
            archive_offset = zip64_posit.checked_sub(nominal).ok_or(
                ZipError::InvalidArchive("Zip64 End Of Central Directory Record before its offset"),
            )?;
            if zip64_posit + ZIP64_EOCDR_SIZE > locator_posit {
                return Err(ZipError::InvalidArchive(
                    "Zip64 End Of Central Directory Record overlaps its locator",
                ));
            }
            let zip64_eocdr = Zip64EndOfCentralDirectory::parse(&mapping[zip64_posit..locator_posit])?;
            trace!("{:?}", zip64_eocdr);

            central_directory_offset = usize(zip64_eocdr.central_directory_offset)?;
            entry_count = zip64_eocdr.entries;
        } else {
            // The offset is the actual position versus the stored one.
            let actual_cdr_posit = eocdr_posit.checked_sub(usize(eocdr.central_directory_size)?);
            let nominal_offset = usize(eocdr.central_directory_offset)?;
            archive_offset = actual_cdr_posit
                .and_then(|off| off.checked_sub(nominal_offset))
                .ok_or(ZipError::InvalidArchive(
                    "Invalid central directory size or offset",
                ))?;
            central_directory_offset = nominal_offset;
            entry_count = eocdr.entries as u64;
        }
        if archive_offset != 0 {
            debug!("Archive is prepended with {archive_offset} bytes");
        }
        trace!(
            "{} entries at nominal offset {}",
            entry_count,
            central_directory_offset
        );

        let mut central_directory = archive_offset
            .checked_add(central_directory_offset)
            .and_then(|start| mapping.get(start..))
            .ok_or(ZipError::InvalidArchive(
                "Central directory starts past the end of the archive",
            ))?;
        // Don't let a bogus count talk us into a huge allocation.
        if entry_count > (central_directory.len() / CENTRAL_DIRECTORY_ENTRY_SIZE) as u64 {
            return Err(ZipError::InvalidArchive("Too many disk entries"));
        }

        let mut directory = Self {
            real: Vec::with_capacity(usize(entry_count)?),
            comment: eocdr.file_comment.to_vec(),
            sorted,
            ..Default::default()
        };
        for _ in 0..entry_count {
            if central_directory.len() < CENTRAL_DIRECTORY_ENTRY_SIZE {
                return Err(ZipError::InvalidArchive("Too many disk entries"));
            }
            // A record running off the end means the count was a lie.
            let cde = CentralDirectoryEntry::parse_and_consume(&mut central_directory).map_err(
                |e| match e {
                    ZipError::InvalidArchive("Record truncated") => {
                        ZipError::InvalidArchive("Too many disk entries")
                    }
                    e => e,
                },
            )?;
            trace!("{:?}", cde);
            let entry = ZipEntry::from_cde(&cde, decoder, archive_offset as u64)?;
            if let Some(Slot::Real(previous)) = directory.index.get(entry.name()) {
                warn!("Duplicate entry {}; the later one wins", entry.name());
                directory.real[*previous] = entry;
            } else {
                directory
                    .index
                    .insert(entry.name().to_owned(), Slot::Real(directory.real.len()));
                directory.real.push(entry);
            }
        }

        if sorted {
            sort_entries(&mut directory.real);
        }
        directory.rebuild_index()?;
        info!(
            "Read central directory: {} entries, {} implied folders",
            directory.real.len(),
            directory.synthesized.len()
        );
        Ok(directory)
    }

    /// Recomputes the name index and the implied folders from the real entries.
    fn rebuild_index(&mut self) -> ZipResult<()> {
        self.index.clear();
        self.synthesized.clear();
        for (i, entry) in self.real.iter().enumerate() {
            self.index.insert(entry.name().to_owned(), Slot::Real(i));
        }
        for i in 0..self.real.len() {
            let name = self.real[i].name().to_owned();
            self.synthesize_parents(&name)?;
        }
        if self.sorted {
            sort_entries(&mut self.synthesized);
            for (i, entry) in self.synthesized.iter().enumerate() {
                self.index
                    .insert(entry.name().to_owned(), Slot::Synthesized(i));
            }
        }
        Ok(())
    }

    /// Creates a folder entry for each missing proper prefix of `name` ending in `/`.
    fn synthesize_parents(&mut self, name: &str) -> ZipResult<()> {
        for (i, _) in name.match_indices('/') {
            if i + 1 == name.len() {
                break;
            }
            let parent = &name[..=i];
            if !self.index.contains_key(parent) {
                debug!("Synthesizing folder {parent}");
                self.index.insert(
                    parent.to_owned(),
                    Slot::Synthesized(self.synthesized.len()),
                );
                self.synthesized.push(ZipEntry::synthesized(parent.to_owned())?);
            }
        }
        Ok(())
    }

    /// Entries with a central directory record (or added by the user)
    pub fn entries(&self) -> &[ZipEntry] {
        &self.real
    }

    /// Real entries followed by synthesized folders
    pub fn all_entries(&self) -> impl Iterator<Item = &ZipEntry> {
        self.real.iter().chain(self.synthesized.iter())
    }

    pub fn get(&self, name: &str) -> Option<&ZipEntry> {
        match self.index.get(name)? {
            Slot::Real(i) => self.real.get(*i),
            Slot::Synthesized(i) => self.synthesized.get(*i),
        }
    }

    /// Synthesized folders can't be edited; add a real one in their place.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ZipEntry> {
        match self.index.get(name)? {
            Slot::Real(i) => self.real.get_mut(*i),
            Slot::Synthesized(_) => None,
        }
    }

    /// Every entry (real or synthesized) beneath the folder `name`
    pub fn children(&self, name: &str) -> Vec<&ZipEntry> {
        if !util::is_directory_name(name) {
            return Vec::new();
        }
        self.all_entries()
            .filter(|e| e.name().len() > name.len() && e.name().starts_with(name))
            .collect()
    }

    /// Returns the real entry named `name`, creating it if needed.
    ///
    /// A synthesized folder of that name is replaced by the new, real one.
    pub fn get_or_insert(&mut self, name: &str) -> ZipResult<&mut ZipEntry> {
        let position = match self.index.get(name).copied() {
            Some(Slot::Real(i)) => i,
            Some(Slot::Synthesized(i)) => {
                debug!("Replacing synthesized folder {name} with a real entry");
                self.synthesized.swap_remove(i);
                if let Some(moved) = self.synthesized.get(i) {
                    self.index
                        .insert(moved.name().to_owned(), Slot::Synthesized(i));
                }
                self.push_real(name)?
            }
            None => {
                let i = self.push_real(name)?;
                self.synthesize_parents(name)?;
                i
            }
        };
        Ok(&mut self.real[position])
    }

    fn push_real(&mut self, name: &str) -> ZipResult<usize> {
        let i = self.real.len();
        self.real.push(ZipEntry::new(name.to_owned())?);
        self.index.insert(name.to_owned(), Slot::Real(i));
        Ok(i)
    }

    /// Removes the entry `name`. Removing a folder removes everything in it.
    ///
    /// Returns false if there was no real entry by that name.
    pub fn remove(&mut self, name: &str) -> ZipResult<bool> {
        let before = self.real.len();
        let is_dir = util::is_directory_name(name);
        self.real
            .retain(|e| !(e.name() == name || (is_dir && e.name().starts_with(name))));
        let removed = before - self.real.len();
        if removed == 0 {
            return Ok(false);
        }
        debug!("Removed {removed} entries for {name}");
        self.rebuild_index()?;
        Ok(true)
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: &[u8]) -> ZipResult<()> {
        if comment.len() > MAX_FIELD_LENGTH {
            return Err(ZipError::Capacity(format!(
                "Archive comment is {} bytes; the limit is {MAX_FIELD_LENGTH}",
                comment.len()
            )));
        }
        self.comment = comment.to_vec();
        Ok(())
    }

    /// Puts entries in write order and returns a writer to push them through.
    pub fn begin_write(&mut self) -> ZipResult<ArchiveWriter> {
        sort_entries(&mut self.real);
        self.rebuild_index()?;
        Ok(ArchiveWriter::with_capacity(self.real.len()))
    }

    /// Serializes the whole archive, then points every entry at the new bytes.
    /// If anything fails, nothing changes.
    pub fn write(
        &mut self,
        mapping: &[u8],
        salt_source: &mut dyn SaltSource,
    ) -> ZipResult<Vec<u8>> {
        let mut writer = self.begin_write()?;
        for entry in &self.real {
            writer.push_entry(entry, mapping, salt_source)?;
        }
        let written = writer.finish(&self.real, &self.comment)?;
        Ok(self.commit(written))
    }

    /// Adopts the headers of a finished write and returns its bytes.
    pub fn commit(&mut self, written: Written) -> Vec<u8> {
        for (entry, header) in self.real.iter_mut().zip(written.headers) {
            entry.commit(header);
        }
        written.bytes
    }
}

/// A finished archive and the headers its entries were written with
pub(crate) struct Written {
    pub bytes: Vec<u8>,
    headers: Vec<EntryHeader>,
}

/// Lays out an archive one entry at a time.
///
/// Offsets come from a running count of bytes written,
/// since every entry is compressed before its header goes out.
pub(crate) struct ArchiveWriter {
    out: Vec<u8>,
    headers: Vec<EntryHeader>,
}

impl ArchiveWriter {
    fn with_capacity(entries: usize) -> Self {
        Self {
            out: Vec::new(),
            headers: Vec::with_capacity(entries),
        }
    }

    /// Writes an entry's local header, data, and data descriptor (if any).
    pub fn push_entry(
        &mut self,
        entry: &ZipEntry,
        mapping: &[u8],
        salt_source: &mut dyn SaltSource,
    ) -> ZipResult<()> {
        let payload = entry.payload(mapping, salt_source)?;
        let mut header = payload.header;
        header.header_offset = self.out.len() as u64;
        entry::settle_versions(&mut header, entry.is_directory());

        entry.write_local_header(&header, &mut self.out)?;
        self.out.extend_from_slice(&payload.data);
        if let Some(descriptor) = payload.descriptor {
            descriptor.write_to(&mut self.out);
        }
        debug!(
            "Wrote {} ({} bytes) at offset {}",
            entry.name(),
            header.compressed_size,
            header.header_offset
        );
        self.headers.push(header);
        Ok(())
    }

    /// Writes the central directory and end records after the entries.
    pub fn finish(mut self, entries: &[ZipEntry], comment: &[u8]) -> ZipResult<Written> {
        let central_directory_offset = self.out.len() as u64;
        for (entry, header) in entries.iter().zip(&self.headers) {
            entry.write_central_header(header, &mut self.out)?;
        }
        let central_directory_size = self.out.len() as u64 - central_directory_offset;
        let count = entries.len() as u64;

        let zip64 = count >= ZIP64_SENTINEL_16 as u64
            || central_directory_size >= ZIP64_SENTINEL as u64
            || central_directory_offset >= ZIP64_SENTINEL as u64;
        if zip64 {
            let zip64_eocdr_offset = self.out.len() as u64;
            Zip64EndOfCentralDirectory {
                source_version: VERSION_ZIP64,
                minimum_extract_version: VERSION_ZIP64,
                disk_number: 0,
                disk_with_central_directory: 0,
                entries_on_this_disk: count,
                entries: count,
                central_directory_size,
                central_directory_offset,
                extensible_data: &[],
            }
            .write_to(&mut self.out);
            Zip64EndOfCentralDirectoryLocator {
                disk_with_central_directory: 0,
                zip64_eocdr_offset,
                disks: 1,
            }
            .write_to(&mut self.out);
            debug!("Wrote Zip64 end of central directory at {zip64_eocdr_offset}");
        }

        let count16 = count.min(ZIP64_SENTINEL_16 as u64) as u16;
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: count16,
            entries: count16,
            central_directory_size: central_directory_size.min(ZIP64_SENTINEL as u64) as u32,
            central_directory_offset: central_directory_offset.min(ZIP64_SENTINEL as u64) as u32,
            file_comment: comment,
        }
        .write_to(&mut self.out);

        info!("Wrote {} entries in {} bytes", count, self.out.len());
        Ok(Written {
            bytes: self.out,
            headers: self.headers,
        })
    }
}
