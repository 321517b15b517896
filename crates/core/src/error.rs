use std::io;
use std::path::PathBuf;

use fractyl_fs_utils::lockfile::LockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failures surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An on-disk index, cache or record file is malformed or has an
    /// unsupported version.
    #[error("malformed file {path}: {detail}")]
    BadFormat { path: PathBuf, detail: String },

    /// A referenced snapshot, object or repository does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A prefix reference matched more than one snapshot.
    #[error("ambiguous reference '{prefix}' matches: {}", matches.join(", "))]
    Ambiguous { prefix: String, matches: Vec<String> },

    /// A prefix reference shorter than the 4-character minimum.
    #[error("reference '{0}' is too short; use at least 4 characters")]
    TooShort(String),

    /// The repository lock could not be acquired.
    #[error("could not lock repository: {0}")]
    Locked(#[source] LockError),

    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn bad_format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Error::BadFormat {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error means "the thing simply isn't there".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<LockError> for Error {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Io(io) => Error::Io(io),
            other => Error::Locked(other),
        }
    }
}
