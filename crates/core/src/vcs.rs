//! Version-control context.
//!
//! The engine treats the external source-control tool as an opaque provider
//! of a branch name, an optional commit id, a dirty flag and status lines.
//! [`GitCli`] obtains them by invoking the `git` binary; [`NoVcs`] provides
//! nothing, which makes snapshot history land on the default branch.

use std::path::{Path, PathBuf};
use std::process::Command;

/// What the external tool knows about the working tree right now.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VcsContext {
    /// Current branch, sanitized for filesystem use.
    pub branch: Option<String>,
    /// Full commit hash of HEAD.
    pub commit: Option<String>,
    /// Whether the tree has uncommitted changes.
    pub dirty: Option<bool>,
    /// Porcelain status lines.
    pub status: Option<Vec<String>>,
}

/// Source of [`VcsContext`]; faked in tests with [`FixedVcs`].
pub trait VcsProvider {
    fn context(&self) -> VcsContext;
}

/// No version control: empty context, default branch.
pub struct NoVcs;

impl VcsProvider for NoVcs {
    fn context(&self) -> VcsContext {
        VcsContext::default()
    }
}

/// A fixed context, for tests and for callers that already know it.
pub struct FixedVcs(pub VcsContext);

impl VcsProvider for FixedVcs {
    fn context(&self) -> VcsContext {
        self.0.clone()
    }
}

/// Context obtained by shelling out to `git`.
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Whether `path` (or an ancestor) contains a `.git` directory.
    pub fn in_repository(path: &Path) -> bool {
        path.ancestors().any(|dir| dir.join(".git").is_dir())
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn branch(&self) -> Option<String> {
        let name = match self.git(&["symbolic-ref", "--short", "HEAD"]) {
            Some(out) => out.trim().to_owned(),
            // Detached HEAD: name the state after the commit instead.
            None => format!(
                "detached-{}",
                self.git(&["rev-parse", "--short", "HEAD"])?.trim()
            ),
        };
        (!name.is_empty()).then(|| sanitize_branch(&name))
    }

    fn commit(&self) -> Option<String> {
        let out = self.git(&["rev-parse", "HEAD"])?;
        let commit = out.trim();
        (!commit.is_empty()).then(|| commit.to_owned())
    }

    fn status_lines(&self) -> Option<Vec<String>> {
        let out = self.git(&["status", "--porcelain"])?;
        Some(out.lines().map(str::to_owned).collect())
    }
}

impl VcsProvider for GitCli {
    fn context(&self) -> VcsContext {
        if !Self::in_repository(&self.workdir) {
            return VcsContext::default();
        }
        let status = self.status_lines();
        VcsContext {
            branch: self.branch(),
            commit: self.commit(),
            dirty: status.as_ref().map(|lines| !lines.is_empty()),
            status,
        }
    }
}

/// Replace characters that cannot appear in a path component, so branch
/// names like `feature/foo` map to one ref directory.
pub fn sanitize_branch(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .collect()
}
