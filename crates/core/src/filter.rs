//! The ignored-path predicate.
//!
//! The scanner only needs `ignored(path) -> bool`; this wraps the gitignore
//! machinery of the `ignore` crate behind that shape. Rules come from the
//! `.gitignore` at the repository root. The `.fractyl` and `.git`
//! directories are excluded by the scanner itself, independent of any rules
//! here.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log::warn;

/// A boolean predicate over repository-relative paths.
#[derive(Debug)]
pub struct PathFilter {
    rules: Option<Gitignore>,
}

impl PathFilter {
    /// Build from the `.gitignore` at `root`, if one exists.
    pub fn load(root: &Path) -> Self {
        let gitignore = root.join(".gitignore");
        if !gitignore.is_file() {
            return Self::none();
        }

        let mut builder = GitignoreBuilder::new(root);
        if let Some(e) = builder.add(&gitignore) {
            warn!("ignoring unreadable {}: {e}", gitignore.display());
            return Self::none();
        }
        match builder.build() {
            Ok(rules) => Self { rules: Some(rules) },
            Err(e) => {
                warn!("ignoring malformed {}: {e}", gitignore.display());
                Self::none()
            }
        }
    }

    /// A filter that ignores nothing.
    pub fn none() -> Self {
        Self { rules: None }
    }

    /// Whether the repository-relative `path` is ignored.
    pub fn ignored(&self, path: &str, is_dir: bool) -> bool {
        match &self.rules {
            None => false,
            Some(rules) => rules
                .matched_path_or_any_parents(path, is_dir)
                .is_ignore(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn no_gitignore_ignores_nothing() {
        let tmp = TempDir::new().unwrap();
        let filter = PathFilter::load(tmp.path());
        assert!(!filter.ignored("anything.txt", false));
    }

    #[test]
    fn patterns_apply_to_files_and_dirs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "*.log\ntarget/\n").unwrap();

        let filter = PathFilter::load(tmp.path());
        assert!(filter.ignored("build.log", false));
        assert!(filter.ignored("sub/dir/trace.log", false));
        assert!(filter.ignored("target", true));
        assert!(filter.ignored("target/debug/app", false));
        assert!(!filter.ignored("src/main.rs", false));
    }

    #[test]
    fn negation_un_ignores() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "*.log\n!keep.log\n").unwrap();

        let filter = PathFilter::load(tmp.path());
        assert!(filter.ignored("other.log", false));
        assert!(!filter.ignored("keep.log", false));
    }
}
