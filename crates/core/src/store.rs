//! The content-addressed object store.
//!
//! Objects are immutable byte sequences keyed by the SHA-256 of their
//! contents and laid out in a two-level fan-out under `objects/` to bound
//! per-directory entry counts. Because keys are derived from contents,
//! concurrent writers racing on the same object at worst duplicate work;
//! nothing ever needs to read back what it wrote.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use fractyl_paths::ObjectsDir;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_file, Digest};

/// Storage for immutable, digest-keyed objects.
///
/// Faked in tests of the higher layers; implemented for real by
/// [`FsObjectStore`].
pub trait ObjectStore {
    /// Hash the file at `src` and store its body. Returns the digest.
    ///
    /// Idempotent: if an object with the same digest already exists, no
    /// write happens.
    fn put_file(&self, src: &Path) -> Result<Digest>;

    /// Store an in-memory buffer under its digest.
    fn put_bytes(&self, bytes: &[u8]) -> Result<Digest>;

    /// Read an object's body into memory.
    fn get(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Whether an object with this digest exists.
    fn exists(&self, digest: &Digest) -> bool;

    /// Stream an object's body to `dest`, overwriting whatever is there.
    fn restore_file(&self, digest: &Digest, dest: &Path) -> Result<()>;
}

/// The on-disk object store under `.fractyl/objects/`.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: ObjectsDir,
}

impl FsObjectStore {
    pub fn new(root: ObjectsDir) -> Self {
        Self { root }
    }

    /// Total number of objects on disk. Walks the fan-out; test support.
    pub fn object_count(&self) -> Result<usize> {
        let mut count = 0;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for fanout in entries {
            let fanout = fanout?;
            if fanout.file_type()?.is_dir() {
                count += fs::read_dir(fanout.path())?.count();
            }
        }
        Ok(count)
    }

    /// Write `write_body` into a temp file in the object's fan-out directory
    /// and rename it into place. The rename makes racing identical puts
    /// converge on one complete object.
    fn put_with(
        &self,
        digest: &Digest,
        write_body: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<()> {
        let hex = digest.to_hex();
        let fanout = self.root.fanout(&hex);
        fs::create_dir_all(&fanout)?;

        let mut tmp = NamedTempFile::new_in(&fanout)?;
        write_body(tmp.as_file_mut())?;
        tmp.persist(self.root.object(&hex)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put_file(&self, src: &Path) -> Result<Digest> {
        let digest = hash_file(src)?;
        if self.exists(&digest) {
            return Ok(digest);
        }
        self.put_with(&digest, |out| {
            let mut body = File::open(src)?;
            io::copy(&mut body, out)?;
            Ok(())
        })?;
        Ok(digest)
    }

    fn put_bytes(&self, bytes: &[u8]) -> Result<Digest> {
        let digest = hash_bytes(bytes);
        if self.exists(&digest) {
            return Ok(digest);
        }
        self.put_with(&digest, |out| out.write_all(bytes))?;
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.root.object(&digest.to_hex());
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(format!("object {digest}"))
            } else {
                e.into()
            }
        })
    }

    fn exists(&self, digest: &Digest) -> bool {
        self.root
            .object(&digest.to_hex())
            .metadata()
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn restore_file(&self, digest: &Digest, dest: &Path) -> Result<()> {
        let path = self.root.object(&digest.to_hex());
        let mut src = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(format!("object {digest}"))
            } else {
                Error::Io(e)
            }
        })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)?;
        if let Err(e) = io::copy(&mut src, &mut out) {
            drop(out);
            let _ = fs::remove_file(dest);
            return Err(e.into());
        }
        Ok(())
    }
}
