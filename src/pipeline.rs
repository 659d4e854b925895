//! Async variants of the bulk operations.
//!
//! These do the same work as their blocking counterparts, one entry at a time,
//! yielding to the runtime between entries so a big archive doesn't hog it.
//! Entries are never processed concurrently, and the first error ends the
//! whole operation; nothing after it is attempted.

use camino::Utf8Path;
use log::*;
use tokio::task;

use crate::archive::ZipArchive;
use crate::fs::FileSystem;
use crate::result::*;

impl<F: FileSystem> ZipArchive<F> {
    /// Like [`to_buffer()`](ZipArchive::to_buffer), yielding after each entry.
    pub async fn to_buffer_async(&mut self) -> ZipResult<&[u8]> {
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

        let mut writer = directory.begin_write()?;
        for entry in directory.entries() {
            writer.push_entry(entry, &buffer[..], salt_source.as_mut())?;
            task::yield_now().await;
        }
        let written = writer.finish(directory.entries(), directory.comment())?;
        *buffer = directory.commit(written);
        Ok(&self.buffer)
    }

    /// Like [`write_zip()`](ZipArchive::write_zip), yielding after each entry.
    pub async fn write_zip_async(&mut self, path: impl AsRef<Utf8Path>) -> ZipResult<()> {
        let path = path.as_ref();
        self.to_buffer_async().await?;
        self.fs.write(path, &self.buffer, None)?;
        info!("Wrote {path} ({} bytes)", self.buffer.len());
        Ok(())
    }

    /// Like [`extract_all_to()`](ZipArchive::extract_all_to), yielding after each entry.
    pub async fn extract_all_to_async(
        &self,
        destination: impl AsRef<Utf8Path>,
        overwrite: bool,
        keep_permissions: bool,
        password: Option<&[u8]>,
    ) -> ZipResult<()> {
        let root = self.extraction_root(destination.as_ref())?;
        let mut extracted = 0;
        for entry in self.directory()?.all_entries() {
            self.extract_one(&root, entry, overwrite, keep_permissions, password)?;
            extracted += 1;
            task::yield_now().await;
        }
        info!("Extracted {extracted} entries to {root}");
        Ok(())
    }
}
