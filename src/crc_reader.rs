//! Helper module to compute a CRC32 checksum while reading
//!
//! Unlike a reader that fails at EOF, this one hands the final checksum
//! back to the caller, who knows which recorded CRC (local header or data
//! descriptor) the payload has to match.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that hashes everything passing through it.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// The CRC32 of all bytes read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[0..count]);
        Ok(count)
    }
}
