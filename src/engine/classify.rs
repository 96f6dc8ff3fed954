//! Content Difference Classifier: how a local file relates to its gist copy.

use super::error::{Result, TmrError};
use super::runner::CommandRunner;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Timeout for the byte-exact comparison of binary files.
pub const BINARY_DIFF_TIMEOUT_SECS: u64 = 20;

/// How a local file differs from the reference (gist) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffVerdict {
    Identical,
    /// Only trailing whitespace or blank lines differ.
    Whitespace,
    /// Same lines in a different order, in a flat (unindented) file.
    Order,
    Content,
}

impl DiffVerdict {
    /// Returns true for anything the user may want to reconcile.
    #[must_use]
    pub fn is_different(&self) -> bool {
        !matches!(self, DiffVerdict::Identical)
    }
}

impl fmt::Display for DiffVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffVerdict::Identical => write!(f, "identical"),
            DiffVerdict::Whitespace => write!(f, "whitespace"),
            DiffVerdict::Order => write!(f, "order"),
            DiffVerdict::Content => write!(f, "content"),
        }
    }
}

/// Lines right-trimmed, blank lines dropped.
#[must_use]
pub fn rstripped(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect()
}

/// True when no non-blank line is indented.
///
/// A heuristic for list-like files (ignore files, word lists) where a
/// reordering is usually benign.
#[must_use]
pub fn is_flat(text: &str) -> bool {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .all(|line| line == line.trim_start())
}

fn same_lines_any_order(a: &[&str], b: &[&str]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Classifies two texts. Pure; no I/O.
#[must_use]
pub fn classify_text(reference: &str, candidate: &str) -> DiffVerdict {
    if reference.lines().eq(candidate.lines()) {
        return DiffVerdict::Identical;
    }

    let reference_lines = rstripped(reference);
    let candidate_lines = rstripped(candidate);
    if reference_lines == candidate_lines {
        return DiffVerdict::Whitespace;
    }

    if is_flat(reference) && same_lines_any_order(&reference_lines, &candidate_lines) {
        return DiffVerdict::Order;
    }
    DiffVerdict::Content
}

/// Reference content that can be written to a temp file for external tools.
///
/// The write happens at most once per instance under sequential use; two
/// threads classifying the same reference at once may both write the
/// same bytes.
#[derive(Debug)]
pub struct Reference {
    content: Vec<u8>,
    tmp_path: PathBuf,
    written: AtomicBool,
}

impl Reference {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>, tmp_path: PathBuf) -> Self {
        Self {
            content: content.into(),
            tmp_path,
            written: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    /// Writes the content to its temp path unless already done.
    ///
    /// # Errors
    /// Returns `Io` if the temp file cannot be written.
    pub fn materialize(&self) -> Result<&Path> {
        if !self.is_materialized() {
            std::fs::write(&self.tmp_path, &self.content).map_err(|source| TmrError::Io {
                path: self.tmp_path.clone(),
                source,
            })?;
            self.written.store(true, Ordering::Release);
            debug!("wrote {}", self.tmp_path.display());
        }
        Ok(&self.tmp_path)
    }

    /// Classifies the file at `local` against this reference.
    ///
    /// When either side is not valid UTF-8 the two are compared byte for
    /// byte with `diff`.
    /// The reference is materialized whenever the verdict is a difference.
    ///
    /// # Errors
    /// Returns error if `local` cannot be read, the temp file cannot be
    /// written, or the binary comparison cannot run.
    pub fn classify(&self, local: &Path, runner: &CommandRunner) -> Result<DiffVerdict> {
        let bytes = std::fs::read(local).map_err(|source| TmrError::Io {
            path: local.to_path_buf(),
            source,
        })?;

        let verdict = match (std::str::from_utf8(&self.content), std::str::from_utf8(&bytes)) {
            (Ok(reference), Ok(text)) => classify_text(reference, text),
            _ => {
                debug!("{}: not text, comparing bytes", local.display());
                self.classify_binary(local, runner)?
            }
        };

        if verdict.is_different() {
            self.materialize()?;
        }
        Ok(verdict)
    }

    fn classify_binary(&self, local: &Path, runner: &CommandRunner) -> Result<DiffVerdict> {
        let reference = self.materialize()?;
        let runner = runner.with_timeout(BINARY_DIFF_TIMEOUT_SECS);
        let args = [
            "--brief".to_string(),
            reference.to_string_lossy().into_owned(),
            local.to_string_lossy().into_owned(),
        ];
        let out = runner.run("diff", &args, None)?;

        Ok(match out.exit_code {
            Some(0) => DiffVerdict::Identical,
            Some(1) => DiffVerdict::Content,
            code => {
                warn!(
                    "diff exited with {code:?} comparing {}: {}",
                    local.display(),
                    out.stderr.trim()
                );
                DiffVerdict::Content
            }
        })
    }
}
