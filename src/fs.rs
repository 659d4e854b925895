//! The file-system operations the archive facade needs.
//!
//! Parsing and serializing work purely on byte buffers.
//! Anything that touches disk goes through a [`FileSystem`],
//! so tests (or a sandboxed host) can swap in their own.

use std::fs;
use std::io;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use log::*;

/// File-system capability handed to a [`ZipArchive`](crate::ZipArchive)
pub trait FileSystem {
    fn exists(&self, path: &Utf8Path) -> bool;

    fn is_dir(&self, path: &Utf8Path) -> bool;

    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    /// Writes a file, creating parent directories as needed.
    /// `mode` holds Unix permission bits to apply, if any.
    fn write(&self, path: &Utf8Path, contents: &[u8], mode: Option<u32>) -> io::Result<()>;

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()>;

    fn set_modified(&self, path: &Utf8Path, when: SystemTime) -> io::Result<()>;

    fn modified(&self, path: &Utf8Path) -> io::Result<SystemTime>;

    /// Makes `path` absolute against the current directory.
    fn absolute(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf>;

    /// Every file and directory under `root`, recursively,
    /// relative to `root` and with `/` separators.
    /// Directories are listed before their contents and end in `/`.
    fn walk(&self, root: &Utf8Path) -> io::Result<Vec<String>>;

    /// Unix permission bits of the file at `path`, where that means anything.
    fn mode(&self, path: &Utf8Path) -> io::Result<Option<u32>>;
}

/// The real file system, through `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        path.is_dir()
    }

    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Utf8Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        trace!("Wrote {} bytes to {path}", contents.len());
        if let Some(mode) = mode {
            set_mode(path, mode)?;
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn set_modified(&self, path: &Utf8Path, when: SystemTime) -> io::Result<()> {
        filetime::set_file_mtime(path, FileTime::from_system_time(when))
    }

    fn modified(&self, path: &Utf8Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn absolute(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        if path.is_absolute() {
            return Ok(path.to_owned());
        }
        let cwd = std::env::current_dir()?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|p| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Current directory {} isn't UTF-8", p.display()),
            )
        })?;
        Ok(cwd.join(path))
    }

    fn walk(&self, root: &Utf8Path) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        walk_into(root, "", &mut found)?;
        Ok(found)
    }

    fn mode(&self, path: &Utf8Path) -> io::Result<Option<u32>> {
        let metadata = fs::metadata(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(Some(metadata.permissions().mode() & 0o7777))
        }
        #[cfg(not(unix))]
        {
            let _ = metadata;
            Ok(None)
        }
    }
}

fn walk_into(dir: &Utf8Path, prefix: &str, found: &mut Vec<String>) -> io::Result<()> {
    let mut children: Vec<_> = dir.read_dir_utf8()?.collect::<io::Result<_>>()?;
    children.sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for child in children {
        let name = format!("{prefix}{}", child.file_name());
        if child.file_type()?.is_dir() {
            found.push(format!("{name}/"));
            walk_into(child.path(), &format!("{name}/"), found)?;
        } else {
            found.push(name);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Utf8Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(path: &Utf8Path, mode: u32) -> io::Result<()> {
    // Only the owner-write bit has a Windows equivalent.
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    debug!("Setting {path} read-only: {}", permissions.readonly());
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn walk_lists_dirs_before_contents() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tempdir.path()).unwrap();
        let fs = LocalFs;
        fs.write(&root.join("b/c/d.txt"), b"d", None).unwrap();
        fs.write(&root.join("a.txt"), b"a", None).unwrap();
        assert_eq!(
            fs.walk(root).unwrap(),
            vec!["a.txt", "b/", "b/c/", "b/c/d.txt"]
        );
        assert_eq!(fs.read(&root.join("b/c/d.txt")).unwrap(), b"d");
    }

    #[test]
    fn modification_times_round_trip() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(tempdir.path()).unwrap().join("old.txt");
        let fs = LocalFs;
        fs.write(&path, b"old", None).unwrap();
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
        fs.set_modified(&path, when).unwrap();
        assert_eq!(fs.modified(&path).unwrap(), when);
    }

    #[test]
    fn absolute_paths() {
        let fs = LocalFs;
        let abs = fs.absolute(Utf8Path::new("some/relative")).unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("some/relative"));
    }

    #[cfg(unix)]
    #[test]
    fn modes_are_applied() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tempdir.path()).unwrap();
        let path = root.join("script.sh");
        LocalFs.write(&path, b"#!/bin/sh", Some(0o755)).unwrap();
        assert_eq!(LocalFs.mode(&path).unwrap(), Some(0o755));
    }
}
