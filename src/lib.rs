//! zipkit reads, edits, and writes Zip archives in memory:
//!
//! ```no_run
//! # use zipkit::*;
//! let archive = ZipArchive::open("natives.jar", OpenOptions::new())?;
//!
//! // Entries come sorted by name. Folders implied by other entries' paths
//! // (say, `lib/` for `lib/liblwjgl.so`) aren't listed here, but they can
//! // still be looked up and extracted.
//! for entry in archive.entries()? {
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//!
//! // Each read decompresses the entry and checks its CRC-32,
//! // so corrupted data is an error, never a surprise.
//! let library = archive.read_entry("lib/liblwjgl.so", None)?;
//!
//! // Extraction never trusts entry names:
//! // `../../etc/passwd` still lands inside the destination.
//! archive.extract_all_to("natives", true, true, None)?;
//! # Ok::<(), ZipError>(())
//! ```
//!
//! Writing works the same way in reverse:
//!
//! ```no_run
//! # use zipkit::*;
//! let mut archive = ZipArchive::new();
//! archive.add_file("hello.txt", b"Hello, world!".to_vec(), None, None)?;
//! archive.set_comment("made with zipkit")?;
//! archive.write_zip("hello.zip")?;
//! # Ok::<(), ZipError>(())
//! ```
//!
//! Zip archives keep their table of contents (the "central directory")
//! at the back of the file, and compress each file independently.
//! Opening an archive only finds and parses that directory,
//! and only when it's first needed.
//! Each file is decompressed on its first read and kept from then on.
//!
//! STORED and DEFLATED entries are supported, as is Zip64 (for archives
//! and entries past 4 GB, or with more than 65,535 entries) and the
//! traditional PKWARE encryption ("ZipCrypto"). That last one is weak;
//! it's supported to read what old tools made, not to keep secrets.

pub mod archive;
pub mod compression;
pub mod crypto;
pub mod entry;
pub mod fs;
pub mod result;
pub mod spec;
pub mod util;

mod crc_reader;
mod directory;
#[cfg(feature = "async")]
mod pipeline;

pub use archive::{OpenOptions, ZipArchive};
pub use compression::CompressionMethod;
pub use crypto::{SaltSource, SystemSaltSource};
pub use entry::{DefaultNameDecoder, EntryOrigin, EntryState, NameDecoder, ZipEntry};
pub use fs::{FileSystem, LocalFs};
pub use result::{ZipError, ZipResult};
