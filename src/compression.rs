//! STORED and raw DEFLATE, the two methods we speak.

use std::io::prelude::*;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::spec::{METHOD_DEFLATED, METHOD_STORED};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflated,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            METHOD_STORED => CompressionMethod::Stored,
            METHOD_DEFLATED => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => METHOD_STORED,
            CompressionMethod::Deflated => METHOD_DEFLATED,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// Decompressed data and the CRC-32 computed while producing it
#[derive(Debug)]
pub struct Inflated {
    pub data: Vec<u8>,
    pub crc32: u32,
}

/// Decompresses `data`, which should expand to exactly `expected_size` bytes.
///
/// The output is reserved up front from the declared size, and the decoder
/// is cut off one byte past it, so a lying header can't make us inflate
/// without bound.
pub fn decompress(
    method: CompressionMethod,
    data: &[u8],
    expected_size: usize,
) -> ZipResult<Inflated> {
    let mut out = Vec::new();
    out.try_reserve_exact(expected_size).map_err(|_| {
        ZipError::Capacity(format!(
            "Can't allocate {expected_size} bytes for decompressed data"
        ))
    })?;
    let limit = expected_size as u64 + 1;

    let crc32 = match method {
        CompressionMethod::Stored => {
            let mut reader = Crc32Reader::new(data.take(limit));
            reader.read_to_end(&mut out)?;
            reader.checksum()
        }
        CompressionMethod::Deflated => {
            let mut reader = Crc32Reader::new(DeflateDecoder::new(data).take(limit));
            reader.read_to_end(&mut out)?;
            reader.checksum()
        }
        CompressionMethod::Unsupported(m) => return Err(ZipError::UnsupportedMethod(m)),
    };

    if out.len() > expected_size {
        return Err(ZipError::InvalidArchive(
            "Data expands past its declared size",
        ));
    }
    if out.len() < expected_size {
        return Err(ZipError::InvalidArchive("Data ends before its declared size"));
    }
    trace!(
        "Decompressed {} bytes into {} with {:?}",
        data.len(),
        out.len(),
        method
    );
    Ok(Inflated { data: out, crc32 })
}

/// Compresses `data` with the given method.
///
/// The caller records the compressed length afterward,
/// since there's no way to know it beforehand.
pub fn compress(method: CompressionMethod, data: &[u8]) -> ZipResult<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflated => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            trace!("Deflated {} bytes to {}", data.len(), compressed.len());
            Ok(compressed)
        }
        CompressionMethod::Unsupported(m) => Err(ZipError::UnsupportedMethod(m)),
    }
}
