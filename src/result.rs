//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// A record didn't start with the magic number it should have.
    /// The archive is corrupt or isn't a ZIP archive at all.
    #[error("Invalid signature: {0}")]
    Signature(&'static str),

    /// The ZIP archive contained invalid data per APPNOTE.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// An entry's data descriptor was missing, unrecognized,
    /// or disagreed with the central directory.
    #[error("Bad data descriptor: {0}")]
    Descriptor(&'static str),

    /// Decompressed data didn't match the CRC-32 recorded in the archive.
    #[error("CRC-32 mismatch in {name}: expected {expected:08x}, got {actual:08x}")]
    Checksum {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// The password failed the encryption header's check byte.
    #[error("Wrong password for {0}")]
    WrongPassword(String),

    /// The entry is encrypted and no password was given.
    #[error("{0} is encrypted and no password was provided")]
    PasswordRequired(String),

    /// The entry uses a compression method other than STORED or DEFLATED.
    #[error("Unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// A name, comment, or count exceeds what the format can hold.
    #[error("Exceeds format limits: {0}")]
    Capacity(String),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The path given to open an archive doesn't exist.
    #[error("Invalid filename: {0}")]
    InvalidFilename(Utf8PathBuf),

    /// Extraction target exists and overwriting wasn't allowed.
    #[error("Cannot overwrite existing file {0}")]
    CantOverride(Utf8PathBuf),

    /// An entry's contents couldn't be produced for extraction.
    #[error("Cannot extract {name}")]
    CantExtractFile {
        name: String,
        #[source]
        source: Box<ZipError>,
    },

    /// No entry in the archive has the given name.
    #[error("No entry in the archive named {0}")]
    NoSuchEntry(String),

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

impl ZipError {
    /// True for errors that only affect a single entry's data,
    /// leaving the rest of the archive readable.
    pub fn is_entry_error(&self) -> bool {
        matches!(
            self,
            ZipError::Checksum { .. }
                | ZipError::WrongPassword(_)
                | ZipError::PasswordRequired(_)
                | ZipError::UnsupportedMethod(_)
                | ZipError::Descriptor(_)
        )
    }
}
