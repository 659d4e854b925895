//! Traditional PKWARE encryption ("ZipCrypto"), APPNOTE section 6.1.
//!
//! This is a weak cipher and it's only here because old tools still
//! produce it. Each encrypted entry starts with a 12-byte header whose
//! last byte lets us reject a wrong password before decrypting anything.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::util::crc32_update;

/// Length of the encryption header preceding each encrypted entry's data
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

/// Somewhere to get the random bytes of an encryption header.
///
/// Encryption takes one of these explicitly so tests can pin the salt.
pub trait SaltSource {
    fn fill(&mut self, salt: &mut [u8]);
}

impl<F: FnMut(&mut [u8])> SaltSource for F {
    fn fill(&mut self, salt: &mut [u8]) {
        self(salt)
    }
}

/// Salt from the process's randomized hashing keys and the clock,
/// stretched with xorshift.
///
/// The header only has to be unpredictable enough that two entries
/// encrypted with the same password don't share a keystream,
/// so this doesn't pretend to be a CSPRNG.
#[derive(Debug, Clone)]
pub struct SystemSaltSource {
    state: u64,
}

impl SystemSaltSource {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seed = RandomState::new().hash_one((nanos, std::process::id()));
        Self { state: seed | 1 }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl Default for SystemSaltSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SaltSource for SystemSaltSource {
    fn fill(&mut self, salt: &mut [u8]) {
        for chunk in salt.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// The cipher's three key registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipCrypto {
    keys: [u32; 3],
}

impl ZipCrypto {
    /// Initializes the keys and runs the password through them.
    pub fn new(password: &[u8]) -> Self {
        let mut crypto = ZipCrypto {
            keys: [0x1234_5678, 0x2345_6789, 0x3456_7890],
        };
        for &b in password {
            crypto.update_keys(b);
        }
        crypto
    }

    fn update_keys(&mut self, plain: u8) {
        self.keys[0] = crc32_update(self.keys[0], plain);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.keys[2] = crc32_update(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = self.keys[2] | 2;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    /// Encrypts in place. Keys advance with each plaintext byte.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let plain = *b;
            *b = plain ^ self.stream_byte();
            self.update_keys(plain);
        }
    }

    /// Decrypts in place. Keys advance with each plaintext byte produced,
    /// not the ciphertext consumed.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let plain = *b ^ self.stream_byte();
            self.update_keys(plain);
            *b = plain;
        }
    }

    /// Decrypts the 12-byte header and checks its last byte.
    /// Returns true if the password is (probably) right.
    pub fn check_header(&mut self, header: &[u8; ENCRYPTION_HEADER_SIZE], check_byte: u8) -> bool {
        let mut header = *header;
        self.decrypt(&mut header);
        header[ENCRYPTION_HEADER_SIZE - 1] == check_byte
    }
}

/// Encrypts an entry's (already compressed) data,
/// returning the encryption header followed by the ciphertext.
///
/// The header's last byte is the high byte of the CRC.
/// `legacy_check` also sets the byte before it to the next CRC byte,
/// which pre-2.04g PKZIP checked as well.
pub fn encrypt(
    data: &[u8],
    crc32: u32,
    password: &[u8],
    salt_source: &mut dyn SaltSource,
    legacy_check: bool,
) -> Vec<u8> {
    let mut out = vec![0u8; ENCRYPTION_HEADER_SIZE + data.len()];
    let (header, body) = out.split_at_mut(ENCRYPTION_HEADER_SIZE);
    salt_source.fill(header);
    header[11] = (crc32 >> 24) as u8;
    if legacy_check {
        header[10] = (crc32 >> 16) as u8;
    }
    body.copy_from_slice(data);

    let mut crypto = ZipCrypto::new(password);
    crypto.encrypt(&mut out);
    out
}

/// Decrypts an entry's data (header included).
///
/// Returns `None` if the header's check byte doesn't match,
/// i.e., the password is wrong, before decrypting the body.
pub fn decrypt(data: &[u8], check_byte: u8, password: &[u8]) -> Option<Vec<u8>> {
    let header: &[u8; ENCRYPTION_HEADER_SIZE] = data.get(..ENCRYPTION_HEADER_SIZE)?.try_into().ok()?;
    let mut crypto = ZipCrypto::new(password);
    if !crypto.check_header(header, check_byte) {
        return None;
    }
    let mut body = data[ENCRYPTION_HEADER_SIZE..].to_vec();
    crypto.decrypt(&mut body);
    Some(body)
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixed_salt(salt: &mut [u8]) {
        for (i, b) in salt.iter_mut().enumerate() {
            *b = i as u8 * 17;
        }
    }

    #[test]
    fn initial_keys() {
        assert_eq!(
            ZipCrypto::new(b"").keys,
            [305_419_896, 591_751_049, 878_082_192]
        );
        assert_ne!(ZipCrypto::new(b"abc").keys, ZipCrypto::new(b"xyz").keys);
    }

    #[test]
    fn right_password_round_trips() {
        let plain = b"libnative.so contents".to_vec();
        let crc = 0xA1B2_C3D4;
        let sealed = encrypt(&plain, crc, b"abc", &mut fixed_salt, false);
        assert_eq!(sealed.len(), plain.len() + 12);
        assert_ne!(&sealed[12..], &plain[..]);
        assert_eq!(decrypt(&sealed, 0xA1, b"abc").unwrap(), plain);
    }

    #[test]
    fn wrong_password_is_caught_by_the_header() {
        let sealed = encrypt(b"secret", 0xA1B2_C3D4, b"abc", &mut fixed_salt, false);
        assert_eq!(decrypt(&sealed, 0xA1, b"abd"), None);
        // Right password, wrong check byte
        assert_eq!(decrypt(&sealed, 0xA2, b"abc"), None);
        assert_eq!(decrypt(&sealed[..5], 0xA1, b"abc"), None);
    }

    #[test]
    fn legacy_check_sets_two_bytes() {
        let sealed = encrypt(b"x", 0xA1B2_C3D4, b"pw", &mut fixed_salt, true);
        let mut header = [0u8; 12];
        header.copy_from_slice(&sealed[..12]);
        ZipCrypto::new(b"pw").decrypt(&mut header);
        assert_eq!(header[10], 0xB2);
        assert_eq!(header[11], 0xA1);
        assert_eq!(header[0], 0);
        assert_eq!(header[1], 17);
    }

    #[test]
    fn system_salt_varies() {
        let mut source = SystemSaltSource::new();
        let mut a = [0u8; 12];
        let mut b = [0u8; 12];
        source.fill(&mut a);
        source.fill(&mut b);
        assert_ne!(a, b);
    }
}
