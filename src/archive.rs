//! The public face of the crate: open, list, read, edit, extract, and write archives.
//!
//! To start, open a [`ZipArchive`] from a file or a buffer:
//!
//! ```no_run
//! # use zipkit::*;
//! let archive = ZipArchive::open("natives.jar", OpenOptions::new())?;
//! for entry in archive.entries()? {
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//! # Ok::<(), ZipError>(())
//! ```

use std::borrow::Cow;
use std::cell::OnceCell;
use std::fmt;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, NaiveDateTime, TimeZone};
use codepage_437::*;
use log::*;

use crate::crypto::{SaltSource, SystemSaltSource};
use crate::directory::Directory;
use crate::entry::{self, DefaultNameDecoder, NameDecoder, ZipEntry};
use crate::fs::{FileSystem, LocalFs};
use crate::result::*;
use crate::util;

/// How to open an archive
pub struct OpenOptions {
    pub(crate) eager: bool,
    pub(crate) trailing_space: bool,
    pub(crate) no_sort: bool,
    pub(crate) name_decoder: Box<dyn NameDecoder + Send + Sync>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self {
            eager: false,
            trailing_space: false,
            no_sort: false,
            name_decoder: Box::new(DefaultNameDecoder),
        }
    }

    /// Parse the central directory right away instead of on first use,
    /// so a corrupt archive fails to open at all.
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Look for the end of central directory record anywhere in the file,
    /// not just the last 64 KiB. For archives padded with junk at the end.
    pub fn trailing_space(mut self, trailing_space: bool) -> Self {
        self.trailing_space = trailing_space;
        self
    }

    /// Keep entries in central directory order rather than sorting by name.
    pub fn no_sort(mut self, no_sort: bool) -> Self {
        self.no_sort = no_sort;
        self
    }

    pub fn name_decoder(mut self, decoder: impl NameDecoder + Send + Sync + 'static) -> Self {
        self.name_decoder = Box::new(decoder);
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("eager", &self.eager)
            .field("trailing_space", &self.trailing_space)
            .field("no_sort", &self.no_sort)
            .finish_non_exhaustive()
    }
}

/// A ZIP archive, held in memory.
///
/// The central directory is parsed the first time entries are needed,
/// and each entry is decompressed the first time it's read.
/// Edits stay in memory until [`to_buffer()`](Self::to_buffer) or one of
/// the write methods serializes a fresh archive, which then replaces
/// the old bytes.
pub struct ZipArchive<F: FileSystem = LocalFs> {
    pub(crate) fs: F,
    path: Option<Utf8PathBuf>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) directory: OnceCell<Directory>,
    options: OpenOptions,
    pub(crate) salt_source: Box<dyn SaltSource + Send>,
}

impl<F: FileSystem> fmt::Debug for ZipArchive<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("path", &self.path)
            .field("bytes", &self.buffer.len())
            .field("directory", &self.directory.get())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ZipArchive<LocalFs> {
    /// Reads the archive at `path`.
    pub fn open(path: impl AsRef<Utf8Path>, options: OpenOptions) -> ZipResult<Self> {
        Self::open_with(LocalFs, path, options)
    }

    /// Opens an archive from bytes already in memory.
    pub fn from_bytes(bytes: Vec<u8>, options: OpenOptions) -> ZipResult<Self> {
        Self::from_bytes_with(LocalFs, bytes, options)
    }

    /// A new, empty archive
    pub fn new() -> Self {
        Self::new_with(LocalFs)
    }
}

impl Default for ZipArchive<LocalFs> {
    fn default() -> Self {
        Self::new()
    }
}

/// The DOS timestamp as a point in time, reading it as local time
/// like every other zip tool does.
fn system_time(when: NaiveDateTime) -> Option<SystemTime> {
    Local
        .from_local_datetime(&when)
        .earliest()
        .map(SystemTime::from)
}

impl<F: FileSystem> ZipArchive<F> {
    /// Like [`open()`](ZipArchive::open), with a given file system.
    pub fn open_with(fs: F, path: impl AsRef<Utf8Path>, options: OpenOptions) -> ZipResult<Self> {
        let path = path.as_ref();
        if !fs.exists(path) || fs.is_dir(path) {
            return Err(ZipError::InvalidFilename(path.to_owned()));
        }
        let bytes = fs.read(path)?;
        info!("Opened {path} ({} bytes)", bytes.len());
        let mut archive = Self::from_bytes_with(fs, bytes, options)?;
        archive.path = Some(path.to_owned());
        Ok(archive)
    }

    pub fn from_bytes_with(fs: F, bytes: Vec<u8>, options: OpenOptions) -> ZipResult<Self> {
        let archive = Self {
            fs,
            path: None,
            buffer: bytes,
            directory: OnceCell::new(),
            options,
            salt_source: Box::new(SystemSaltSource::new()),
        };
        if archive.options.eager {
            archive.directory()?;
        }
        Ok(archive)
    }

    pub fn new_with(fs: F) -> Self {
        Self {
            fs,
            path: None,
            buffer: Vec::new(),
            directory: OnceCell::from(Directory::empty(true)),
            options: OpenOptions::new(),
            salt_source: Box::new(SystemSaltSource::new()),
        }
    }

    /// Use the given source for the random bytes of encryption headers.
    pub fn set_salt_source(&mut self, source: impl SaltSource + Send + 'static) {
        self.salt_source = Box::new(source);
    }

    /// Where the archive was opened from, if it came from a file
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// The archive's bytes, as of when it was opened or last written
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn directory(&self) -> ZipResult<&Directory> {
        if let Some(directory) = self.directory.get() {
            return Ok(directory);
        }
        let directory = Directory::parse(
            &self.buffer,
            self.options.trailing_space,
            self.options.name_decoder.as_ref(),
            !self.options.no_sort,
        )?;
        Ok(self.directory.get_or_init(|| directory))
    }

    pub(crate) fn directory_mut(&mut self) -> ZipResult<&mut Directory> {
        self.directory()?;
        self.directory
            .get_mut()
            .ok_or(ZipError::InvalidArchive("Central directory wasn't loaded"))
    }

    /// The archive's entries, not counting folders implied by other entries' paths.
    ///
    /// The first call parses the central directory;
    /// later calls return the same entries in the same order.
    pub fn entries(&self) -> ZipResult<&[ZipEntry]> {
        Ok(self.directory()?.entries())
    }

    pub fn len(&self) -> ZipResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> ZipResult<bool> {
        Ok(self.entries()?.is_empty())
    }

    /// Every entry, including synthesized folders
    pub fn all_entries(&self) -> ZipResult<Vec<&ZipEntry>> {
        Ok(self.directory()?.all_entries().collect())
    }

    /// Looks up an entry by exact name, then by its canonical form.
    pub fn entry(&self, name: &str) -> ZipResult<Option<&ZipEntry>> {
        let directory = self.directory()?;
        Ok(directory
            .get(name)
            .or_else(|| directory.get(&util::canonical(name))))
    }

    pub fn entry_mut(&mut self, name: &str) -> ZipResult<Option<&mut ZipEntry>> {
        let directory = self.directory_mut()?;
        let name = if directory.get(name).is_some() {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(util::canonical(name))
        };
        Ok(directory.get_mut(&name))
    }

    fn existing(&self, name: &str) -> ZipResult<&ZipEntry> {
        self.entry(name)?
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))
    }

    /// Everything inside the folder `name`, at any depth
    pub fn children(&self, name: &str) -> ZipResult<Vec<&ZipEntry>> {
        let entry = self.existing(name)?;
        Ok(self.directory()?.children(entry.name()))
    }

    /// Reads an entry's contents.
    ///
    /// The data has passed its CRC check, or this returns an error.
    pub fn read_entry(&self, name: &str, password: Option<&[u8]>) -> ZipResult<Vec<u8>> {
        let entry = self.existing(name)?;
        Ok(entry.data(&self.buffer, password)?.to_vec())
    }

    /// Like [`read_entry()`](Self::read_entry), but any failure is just `None`.
    pub fn read_file(&self, name: &str, password: Option<&[u8]>) -> Option<Vec<u8>> {
        match self.read_entry(name, password) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Couldn't read {name}: {e}");
                None
            }
        }
    }

    /// Reads an entry as (lossy) UTF-8 text.
    pub fn read_as_text(&self, name: &str) -> Option<String> {
        self.read_file(name, None)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Adds an entry with the given contents,
    /// or replaces the contents of an existing one with the same name.
    ///
    /// `mode` gives Unix permission bits (0o644 for files and 0o755 for
    /// folders by default).
    pub fn add_file(
        &mut self,
        name: &str,
        data: Vec<u8>,
        comment: Option<&str>,
        mode: Option<u32>,
    ) -> ZipResult<&ZipEntry> {
        let canonical = util::canonical(name);
        if canonical.is_empty() {
            return Err(ZipError::InvalidFilename(name.into()));
        }
        // Everything that can fail is checked before the entry is touched.
        let comment = comment.unwrap_or("");
        entry::check_comment(comment)?;
        entry::check_folder_data(&canonical, &data)?;

        let entry = self.directory_mut()?.get_or_insert(&canonical)?;
        entry.set_comment(comment)?;
        entry.set_external_attributes(util::external_attributes(entry.is_directory(), mode));
        entry.set_last_modified(Local::now().naive_local());
        entry.set_data(data)?;
        debug!("Added {canonical}");
        Ok(&*entry)
    }

    /// Adds a file from the file system under `zip_path` (the archive root
    /// by default), named `zip_name` (the file's own name by default).
    pub fn add_local_file(
        &mut self,
        local_path: impl AsRef<Utf8Path>,
        zip_path: Option<&str>,
        zip_name: Option<&str>,
        comment: Option<&str>,
    ) -> ZipResult<()> {
        let local_path = local_path.as_ref();
        if !self.fs.exists(local_path) || self.fs.is_dir(local_path) {
            return Err(ZipError::InvalidFilename(local_path.to_owned()));
        }
        let name = zip_name
            .or_else(|| local_path.file_name())
            .ok_or_else(|| ZipError::InvalidFilename(local_path.to_owned()))?;
        let name = match zip_path {
            Some(dir) if !dir.is_empty() => format!("{}/{name}", dir.trim_end_matches('/')),
            _ => name.to_owned(),
        };
        self.add_local(local_path, &name, comment)
    }

    fn add_local(&mut self, local_path: &Utf8Path, name: &str, comment: Option<&str>) -> ZipResult<()> {
        let data = if self.fs.is_dir(local_path) {
            Vec::new()
        } else {
            self.fs.read(local_path)?
        };
        let mode = self.fs.mode(local_path)?;
        let modified = self.fs.modified(local_path)?;
        self.add_file(name, data, comment, mode)?;
        if let Some(entry) = self.entry_mut(name)? {
            entry.set_last_modified(chrono::DateTime::<Local>::from(modified).naive_local());
        }
        Ok(())
    }

    /// Adds everything under a local folder, recursively, beneath `zip_path`.
    /// `filter` sees each relative path (folders end in `/`)
    /// and can skip it by returning false.
    pub fn add_local_folder(
        &mut self,
        local_path: impl AsRef<Utf8Path>,
        zip_path: Option<&str>,
        filter: Option<&dyn Fn(&str) -> bool>,
    ) -> ZipResult<()> {
        let local_path = local_path.as_ref();
        if !self.fs.is_dir(local_path) {
            return Err(ZipError::InvalidFilename(local_path.to_owned()));
        }
        let prefix = match zip_path {
            Some(dir) if !dir.is_empty() => format!("{}/", dir.trim_end_matches('/')),
            _ => String::new(),
        };
        let found = self.fs.walk(local_path)?;
        info!("Adding {} items from {local_path}", found.len());
        for relative in found {
            if filter.is_some_and(|keep| !keep(&relative)) {
                trace!("Filtered out {relative}");
                continue;
            }
            let name = format!("{prefix}{relative}");
            self.add_local(&local_path.join(&relative), &name, None)?;
        }
        Ok(())
    }

    /// Replaces the contents of an existing entry.
    pub fn update_file(&mut self, name: &str, data: Vec<u8>) -> ZipResult<()> {
        self.entry_mut(name)?
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?
            .set_data(data)
    }

    /// Removes an entry, and everything in it if it's a folder.
    /// Returns false if there was nothing to remove.
    pub fn delete_file(&mut self, name: &str) -> ZipResult<bool> {
        let directory = self.directory_mut()?;
        if directory.remove(name)? {
            return Ok(true);
        }
        directory.remove(&util::canonical(name))
    }

    /// The archive comment. Read as UTF-8 if it is, CP437 otherwise.
    pub fn comment(&self) -> ZipResult<Cow<'_, str>> {
        let raw = self.directory()?.comment();
        Ok(match std::str::from_utf8(raw) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => Cow::borrow_from_cp437(raw, &CP437_CONTROL),
        })
    }

    pub fn set_comment(&mut self, comment: &str) -> ZipResult<()> {
        self.directory_mut()?.set_comment(comment.as_bytes())
    }

    pub fn set_entry_comment(&mut self, name: &str, comment: &str) -> ZipResult<()> {
        self.entry_mut(name)?
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?
            .set_comment(comment)
    }

    /// Writes one file to `path`, creating parents as needed and
    /// restoring the entry's modification time.
    fn write_entry_file(
        &self,
        entry: &ZipEntry,
        data: &[u8],
        path: &Utf8Path,
        keep_permissions: bool,
    ) -> ZipResult<()> {
        let mode = if keep_permissions {
            entry.unix_mode()
        } else {
            None
        };
        self.fs.write(path, data, mode)?;
        if let Some(when) = system_time(entry.last_modified()) {
            self.fs.set_modified(path, when)?;
        }
        trace!("Extracted {} to {path}", entry.name());
        Ok(())
    }

    fn extract_data<'a>(
        &self,
        entry: &'a ZipEntry,
        password: Option<&[u8]>,
    ) -> ZipResult<Cow<'a, [u8]>> {
        entry
            .load(&self.buffer, password)
            .map_err(|e| ZipError::CantExtractFile {
                name: entry.name().to_owned(),
                source: Box::new(e),
            })
    }

    /// Extracts one entry into `destination`.
    ///
    /// `keep_path` keeps the entry's folders (otherwise just its file name is
    /// used), and `rename_to` replaces its name. Extracting a folder extracts
    /// every file inside it.
    ///
    /// Returns true once everything was written.
    pub fn extract_entry_to(
        &self,
        name: &str,
        destination: impl AsRef<Utf8Path>,
        keep_path: bool,
        overwrite: bool,
        keep_permissions: bool,
        rename_to: Option<&str>,
    ) -> ZipResult<bool> {
        let entry = self.existing(name)?;
        let root = util::normalize(&self.fs.absolute(destination.as_ref())?);
        let rename_to = rename_to.map(util::canonical).filter(|r| !r.is_empty());

        let target_for = |item: &ZipEntry| -> Utf8PathBuf {
            let relative = match &rename_to {
                Some(renamed) if entry.is_directory() => {
                    let inner = &item.name()[entry.name().len()..];
                    format!("{}/{inner}", renamed.trim_end_matches('/'))
                }
                Some(renamed) => renamed.clone(),
                None if keep_path => item.name().to_owned(),
                None => util::base_name(item.name()).to_owned(),
            };
            util::sanitize(&root, &relative)
        };

        if entry.is_directory() {
            let children = self.directory()?.children(entry.name());
            debug!("Extracting {} items in {}", children.len(), entry.name());
            for child in children.into_iter().filter(|c| !c.is_directory()) {
                let data = self.extract_data(child, None)?;
                let target = target_for(child);
                if self.fs.exists(&target) && !overwrite {
                    return Err(ZipError::CantOverride(target));
                }
                self.write_entry_file(child, &data, &target, keep_permissions)?;
            }
            return Ok(true);
        }

        let data = self.extract_data(entry, None)?;
        let target = target_for(entry);
        if self.fs.exists(&target) && !overwrite {
            return Err(ZipError::CantOverride(target));
        }
        self.write_entry_file(entry, &data, &target, keep_permissions)?;
        Ok(true)
    }

    /// Extracts every entry beneath `destination`.
    ///
    /// Folders are all created before any file is written. No entry name is
    /// trusted: each goes through [`util::sanitize`] so nothing lands outside
    /// `destination`. Without `overwrite`, files that already exist are
    /// left alone.
    pub fn extract_all_to(
        &self,
        destination: impl AsRef<Utf8Path>,
        overwrite: bool,
        keep_permissions: bool,
        password: Option<&[u8]>,
    ) -> ZipResult<()> {
        let root = self.extraction_root(destination.as_ref())?;
        for entry in self.directory()?.all_entries() {
            self.extract_one(&root, entry, overwrite, keep_permissions, password)?;
        }
        info!("Extracted {} entries to {root}", self.len()?);
        Ok(())
    }

    /// Resolves the destination root and creates every folder in it.
    pub(crate) fn extraction_root(&self, destination: &Utf8Path) -> ZipResult<Utf8PathBuf> {
        let root = util::normalize(&self.fs.absolute(destination)?);
        self.fs.create_dir_all(&root)?;
        for entry in self.directory()?.all_entries() {
            if entry.is_directory() {
                self.fs.create_dir_all(&util::sanitize(&root, entry.name()))?;
            }
        }
        Ok(root)
    }

    /// Writes a single non-folder entry under an already-prepared root.
    pub(crate) fn extract_one(
        &self,
        root: &Utf8Path,
        entry: &ZipEntry,
        overwrite: bool,
        keep_permissions: bool,
        password: Option<&[u8]>,
    ) -> ZipResult<()> {
        if entry.is_directory() {
            return Ok(());
        }
        let target = util::sanitize(root, entry.name());
        if self.fs.exists(&target) && !overwrite {
            warn!("{target} already exists; skipping it");
            return Ok(());
        }
        let data = self.extract_data(entry, password)?;
        self.write_entry_file(entry, &data, &target, keep_permissions)
    }

    /// Reads (and checks) every entry, reporting whether they're all intact.
    pub fn test(&self, password: Option<&[u8]>) -> bool {
        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Archive is unreadable: {e}");
                return false;
            }
        };
        let mut all_good = true;
        for entry in entries {
            if let Err(e) = entry.data(&self.buffer, password) {
                warn!("{}: {e}", entry.name());
                all_good = false;
            }
        }
        all_good
    }

    /// Serializes the archive, which then reads from the new bytes.
    pub fn to_buffer(&mut self) -> ZipResult<&[u8]> {
        self.directory()?;
        let Self {
            buffer,
            directory,
            salt_source,
            ..
        } = self;
        let directory = directory
            .get_mut()
            .ok_or(ZipError::InvalidArchive("Central directory wasn't loaded"))?;
        *buffer = directory.write(&buffer[..], salt_source.as_mut())?;
        Ok(&self.buffer)
    }

    /// Serializes the archive and writes it to `path`.
    pub fn write_zip(&mut self, path: impl AsRef<Utf8Path>) -> ZipResult<()> {
        let path = path.as_ref();
        self.to_buffer()?;
        self.fs.write(path, &self.buffer, None)?;
        info!("Wrote {path} ({} bytes)", self.buffer.len());
        Ok(())
    }

    /// Writes the archive back where it was opened from.
    pub fn save(&mut self) -> ZipResult<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ZipError::InvalidFilename(Utf8PathBuf::new()))?;
        self.write_zip(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixed_salt(salt: &mut [u8]) {
        salt.fill(0x42);
    }

    fn reopen(archive: &mut ZipArchive) -> ZipArchive {
        let bytes = archive.to_buffer().unwrap().to_vec();
        ZipArchive::from_bytes(bytes, OpenOptions::new().eager(true)).unwrap()
    }

    #[test]
    fn add_write_read() {
        let mut archive = ZipArchive::new();
        archive
            .add_file("lib/liblwjgl.so", b"\x7fELF".repeat(100), None, Some(0o755))
            .unwrap();
        archive
            .add_file("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec(), Some("hi"), None)
            .unwrap();
        let reopened = reopen(&mut archive);
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(
            reopened.read_entry("lib/liblwjgl.so", None).unwrap(),
            b"\x7fELF".repeat(100)
        );
        let manifest = reopened.entry("META-INF/MANIFEST.MF").unwrap().unwrap();
        assert_eq!(manifest.comment(), "hi");
        assert_eq!(manifest.unix_mode(), Some(0o644));
        assert_eq!(
            reopened.entry("lib/liblwjgl.so").unwrap().unwrap().unix_mode(),
            Some(0o755)
        );
    }

    #[test]
    fn add_replaces_in_place() {
        let mut archive = ZipArchive::new();
        archive.add_file("a.txt", b"one".to_vec(), None, None).unwrap();
        archive.add_file("./a.txt", b"two".to_vec(), None, None).unwrap();
        assert_eq!(archive.len().unwrap(), 1);
        assert_eq!(archive.read_entry("a.txt", None).unwrap(), b"two");
        assert!(matches!(
            archive.add_file("../", Vec::new(), None, None),
            Err(ZipError::InvalidFilename(_))
        ));
    }

    #[test]
    fn read_file_swallows_errors() {
        let archive = ZipArchive::new();
        assert_eq!(archive.read_file("nope", None), None);
        assert!(matches!(
            archive.read_entry("nope", None),
            Err(ZipError::NoSuchEntry(_))
        ));
    }

    #[test]
    fn empty_files_are_not_missing() {
        let mut archive = ZipArchive::new();
        archive.add_file("empty", Vec::new(), None, None).unwrap();
        let reopened = reopen(&mut archive);
        assert_eq!(reopened.read_file("empty", None), Some(Vec::new()));
    }

    #[test]
    fn encrypted_round_trip() {
        let mut archive = ZipArchive::new();
        archive.set_salt_source(fixed_salt);
        archive.add_file("secret", b"hunter2".to_vec(), None, None).unwrap();
        archive
            .entry_mut("secret")
            .unwrap()
            .unwrap()
            .set_password(Some(b"abc"))
            .unwrap();
        let reopened = reopen(&mut archive);
        assert!(reopened.entry("secret").unwrap().unwrap().is_encrypted());
        assert!(matches!(
            reopened.read_entry("secret", Some(b"abd")),
            Err(ZipError::WrongPassword(_))
        ));
        assert_eq!(reopened.read_entry("secret", Some(b"abc")).unwrap(), b"hunter2");
        assert!(!reopened.test(None));
        assert!(reopened.test(Some(b"abc")));

        // A good read doesn't unlock the entry for later ones.
        assert!(matches!(
            reopened.read_entry("secret", Some(b"abd")),
            Err(ZipError::WrongPassword(_))
        ));
        assert!(matches!(
            reopened.read_entry("secret", None),
            Err(ZipError::PasswordRequired(_))
        ));
        assert_eq!(reopened.read_file("secret", Some(b"abd")), None);
        assert!(!reopened.test(Some(b"abd")));
    }

    #[test]
    fn failed_adds_change_nothing() {
        let mut archive = ZipArchive::new();
        assert!(matches!(
            archive.add_file("dir/", b"data".to_vec(), None, None),
            Err(ZipError::UnsupportedArchive(_))
        ));
        assert_eq!(archive.len().unwrap(), 0);
        assert!(archive.entry("dir/").unwrap().is_none());

        archive.add_file("a.txt", b"one".to_vec(), Some("first"), None).unwrap();
        let long_comment = "x".repeat(70_000);
        assert!(matches!(
            archive.add_file("a.txt", b"two".to_vec(), Some(&long_comment), None),
            Err(ZipError::Capacity(_))
        ));
        assert!(archive.add_file("b.txt", Vec::new(), Some(&long_comment), None).is_err());
        assert_eq!(archive.len().unwrap(), 1);
        let entry = archive.entry("a.txt").unwrap().unwrap();
        assert_eq!(entry.comment(), "first");
        assert_eq!(archive.read_entry("a.txt", None).unwrap(), b"one");
    }

    #[test]
    fn delete_folder_and_contents() {
        let mut archive = ZipArchive::new();
        archive.add_file("natives/", Vec::new(), None, None).unwrap();
        archive.add_file("natives/a.so", b"a".to_vec(), None, None).unwrap();
        archive.add_file("keep.txt", b"k".to_vec(), None, None).unwrap();
        assert!(archive.delete_file("natives/").unwrap());
        assert!(!archive.delete_file("natives/").unwrap());
        let names: Vec<_> = archive
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.name().to_owned())
            .collect();
        assert_eq!(names, ["keep.txt"]);
    }

    #[test]
    fn comments() {
        let mut archive = ZipArchive::new();
        archive.set_comment("launcher natives").unwrap();
        archive.add_file("x", b"x".to_vec(), None, None).unwrap();
        archive.set_entry_comment("x", "an x").unwrap();
        let reopened = reopen(&mut archive);
        assert_eq!(reopened.comment().unwrap(), "launcher natives");
        assert_eq!(reopened.entry("x").unwrap().unwrap().comment(), "an x");
        assert!(archive.set_entry_comment("y", "no").is_err());
    }

    #[test]
    fn missing_files_dont_open() {
        assert!(matches!(
            ZipArchive::open("/definitely/not/here.zip", OpenOptions::new()),
            Err(ZipError::InvalidFilename(_))
        ));
    }

    #[test]
    fn lazy_open_defers_errors() {
        let archive = ZipArchive::from_bytes(b"junk".to_vec(), OpenOptions::new()).unwrap();
        assert!(archive.entries().is_err());
        assert!(ZipArchive::from_bytes(b"junk".to_vec(), OpenOptions::new().eager(true)).is_err());
    }
}
