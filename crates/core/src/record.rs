//! Snapshot records: the JSON metadata documents tying a snapshot id to its
//! index object, parent and descriptive fields.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use fractyl_fs_utils::write_atomic;
use fractyl_paths::SnapshotRecordPath;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Digest;

/// One snapshot's metadata. Written once on commit, never modified.
///
/// Loaders tolerate unknown fields so older binaries can read records
/// written by newer ones. The version-control fields are present only when
/// the external tool provided them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    /// Prior snapshot on the same branch; `null` for the initial snapshot.
    pub parent: Option<String>,
    pub description: String,
    #[serde(with = "iso8601_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "hex_digest")]
    pub index_hash: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_status: Option<Vec<String>>,
}

impl SnapshotRecord {
    pub fn load(path: &SnapshotRecordPath) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let id = path.snapshot_id().unwrap_or("?");
                return Err(Error::NotFound(format!("snapshot {id}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::bad_format(AsRef::<Path>::as_ref(path), e.to_string()))
    }

    pub fn save(&self, path: &SnapshotRecordPath) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, UTC, seconds resolution.
mod iso8601_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

mod hex_digest {
    use serde::{self, Deserialize, Deserializer, Serializer};

    use crate::hash::Digest;

    pub fn serialize<S: Serializer>(digest: &Digest, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&digest.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Digest, D::Error> {
        let raw = String::deserialize(d)?;
        Digest::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid digest '{raw}'")))
    }
}
