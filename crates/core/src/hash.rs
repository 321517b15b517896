//! SHA-256 digests over byte streams and files.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest as _, Sha256};

/// Width of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Read buffer for streamed file hashing.
const HASH_BUF_SIZE: usize = 8 * 1024;

/// A SHA-256 digest. The key type of the object store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub const ZERO: Digest = Digest([0; DIGEST_LEN]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex, &mut out).ok()?;
        Some(Self(out))
    }

    /// Lowercase 64-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Digest an in-memory byte slice.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    Digest(Sha256::digest(bytes).into())
}

/// Digest a file's contents, streamed with a fixed buffer.
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    // sha256("")
    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn known_vectors() {
        assert_eq!(hash_bytes(b"hello").to_hex(), HELLO);
        assert_eq!(hash_bytes(b"").to_hex(), EMPTY);
    }

    #[test]
    fn file_and_buffer_agree() {
        let mut file = NamedTempFile::new().unwrap();
        let body: Vec<u8> = (0u8..=255).cycle().take(3 * HASH_BUF_SIZE + 17).collect();
        file.write_all(&body).unwrap();

        assert_eq!(hash_file(file.path()).unwrap(), hash_bytes(&body));
    }

    #[test]
    fn hex_round_trip() {
        let d = hash_bytes(b"round trip");
        assert_eq!(Digest::from_hex(&d.to_hex()), Some(d));
        assert_eq!(d.to_hex().len(), 64);
    }

    #[test]
    fn rejects_bad_hex() {
        assert_eq!(Digest::from_hex("zz"), None);
        assert_eq!(Digest::from_hex(&"a".repeat(63)), None);
    }
}
