//! Turning user snapshot references into full ids.
//!
//! Three forms are accepted: a full id (64 hex chars or a hyphenated UUID),
//! a hex prefix of at least 4 characters, and `-N` for "the Nth most recent
//! snapshot by timestamp" (1-based). Prefixes are compared against both the
//! raw id and its hyphen-free form, so they may run past the hyphens of a
//! UUID-style id.

use crate::error::{Error, Result};
use crate::refs::Branch;

/// Shortest accepted prefix reference.
pub const MIN_PREFIX_LEN: usize = 4;

/// Resolve `reference` against the snapshots of `branch`.
pub fn resolve(branch: &Branch, reference: &str) -> Result<String> {
    if reference.is_empty() {
        return Err(Error::InvalidArgs("empty snapshot reference".into()));
    }

    if let Some(rest) = reference.strip_prefix('-') {
        return resolve_relative(branch, reference, rest);
    }

    if is_full_id(reference) {
        return Ok(reference.to_owned());
    }

    resolve_prefix(branch, reference)
}

fn resolve_relative(branch: &Branch, reference: &str, rest: &str) -> Result<String> {
    let n: usize = rest
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid relative reference '{reference}'")))?;
    if n == 0 {
        return Err(Error::InvalidArgs(format!(
            "invalid relative reference '{reference}'"
        )));
    }

    // list_records sorts newest first; -1 is index 0.
    let records = branch.list_records()?;
    records
        .get(n - 1)
        .map(|r| r.id.clone())
        .ok_or_else(|| {
            Error::NotFound(format!(
                "snapshot {reference} (only {} on branch {})",
                records.len(),
                branch.name()
            ))
        })
}

fn resolve_prefix(branch: &Branch, prefix: &str) -> Result<String> {
    if prefix.len() < MIN_PREFIX_LEN {
        return Err(Error::TooShort(prefix.to_owned()));
    }

    // A prefix matches the id as written or its hyphen-free form, so a
    // reference may run past the hyphens of a UUID-style id.
    let bare_prefix = prefix.replace('-', "");
    let mut matches: Vec<String> = branch
        .list_ids()?
        .into_iter()
        .filter(|id| {
            id.starts_with(prefix) || id.replace('-', "").starts_with(&bare_prefix)
        })
        .collect();

    match matches.len() {
        0 => Err(Error::NotFound(format!("snapshot {prefix}"))),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort();
            Err(Error::Ambiguous {
                prefix: prefix.to_owned(),
                matches,
            })
        }
    }
}

/// Whether `s` has the shape of a full snapshot id: 64 hex characters, or a
/// 36-character UUID with hyphens.
fn is_full_id(s: &str) -> bool {
    let hexish = |c: char| c.is_ascii_hexdigit() || c == '-';
    (s.len() == 64 || s.len() == 36) && s.chars().all(hexish)
}
