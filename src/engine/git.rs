//! Git adapter: the only place that knows what `git` prints.

use super::error::Result;
use super::runner::{CommandOutput, CommandRunner};
use log::{trace, warn};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const CLEAN_TAIL: &str = "nothing to commit, working tree clean";

/// Checks for a `.git` dir that has the usual layout inside it.
#[must_use]
pub fn is_repo(path: &Path) -> bool {
    let gitdir = path.join(".git");
    match std::fs::metadata(&gitdir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return false,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            warn!("{}: permission denied", gitdir.display());
            return false;
        }
        Err(_) => return false,
    }

    ["info", "refs"].iter().all(|sub| gitdir.join(sub).is_dir())
        && ["config", "HEAD"].iter().all(|file| gitdir.join(file).is_file())
}

/// What `git status` says about a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// Anything other than a clean working tree.
    pub dirty: bool,
    pub ahead: bool,
    pub behind: bool,
    pub diverged: bool,
    /// The "Your branch is ..." line, if any.
    pub branch_line: Option<String>,
}

/// What the caller should do with a repository after reading its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoAction {
    /// Clean and not behind; only mentioned when verbose.
    UpToDate,
    /// Local changes and behind: show it, but never offer to pull.
    NeedsAttention,
    /// Clean, not ahead, behind or diverged: offer `git pull`.
    Pullable,
    /// Anything else worth showing.
    Report,
}

impl RepoStatus {
    /// Parses the human-readable output of `git status`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let branch_line = text
            .lines()
            .find(|line| line.starts_with("Your branch"))
            .map(str::to_string);

        Self {
            dirty: !text.ends_with(CLEAN_TAIL),
            ahead: text.contains("ahead"),
            behind: text.contains("behind"),
            diverged: text.contains("have diverged"),
            branch_line,
        }
    }

    #[must_use]
    pub fn action(&self) -> RepoAction {
        if !self.dirty && !self.behind && !self.diverged {
            return RepoAction::UpToDate;
        }
        if self.dirty && self.behind {
            return RepoAction::NeedsAttention;
        }
        if !self.dirty && !self.ahead && (self.behind || self.diverged) {
            return RepoAction::Pullable;
        }
        RepoAction::Report
    }
}

/// Remote information, shortened for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Remotes {
    /// `owner/name` of `origin`.
    pub origin: String,
    /// `owner/name` of `upstream` (set on forks).
    pub upstream: String,
    pub tracking: String,
    pub current_branch: String,
}

/// Keeps the last two `/`-separated parts of a remote URL.
#[must_use]
pub fn short_remote(url: &str) -> String {
    let parts: Vec<_> = url.trim().split('/').collect();
    parts[parts.len().saturating_sub(2)..].join("/")
}

/// A git working tree on disk.
#[derive(Debug, Clone)]
pub struct GitRepo {
    pub path: PathBuf,
    pub gitdir: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let gitdir = path.join(".git");
        Self { path, gitdir }
    }

    /// `git fetch --all --prune --jobs=10`; output is discarded.
    ///
    /// # Errors
    /// Returns error if git cannot be spawned or times out.
    pub fn fetch(&self, runner: &CommandRunner) -> Result<()> {
        trace!("git fetch in {}", self.path.display());
        let out = self.git(runner, &["fetch", "--all", "--prune", "--jobs=10"])?;
        if !out.success() {
            trace!("{}: fetch failed: {}", self.path.display(), out.stderr.trim());
        }
        Ok(())
    }

    /// Reads and parses `git status`.
    ///
    /// # Errors
    /// Returns error if git cannot be spawned or times out.
    pub fn status(&self, runner: &CommandRunner) -> Result<RepoStatus> {
        trace!("git status in {}", self.path.display());
        let out = self.git(runner, &["status"])?;
        Ok(RepoStatus::parse(&out.stdout))
    }

    /// Origin, upstream, tracking branch and current branch.
    ///
    /// Missing remotes come back as empty strings.
    ///
    /// # Errors
    /// Returns error if git cannot be spawned or times out.
    pub fn remotes(&self, runner: &CommandRunner) -> Result<Remotes> {
        let origin = self.git(runner, &["remote", "get-url", "origin"])?;
        let upstream = self.git(runner, &["remote", "get-url", "upstream"])?;
        let tracking = self.git(
            runner,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )?;
        let branch = self.git(runner, &["rev-parse", "--abbrev-ref", "HEAD"])?;

        Ok(Remotes {
            origin: success_text(&origin).map(short_remote).unwrap_or_default(),
            upstream: success_text(&upstream).map(short_remote).unwrap_or_default(),
            tracking: success_text(&tracking).unwrap_or_default().to_string(),
            current_branch: success_text(&branch).unwrap_or_default().to_string(),
        })
    }

    /// Returns true once the `.git` directory is found to exceed `limit_bytes`.
    #[must_use]
    pub fn gitdir_exceeds(&self, limit_bytes: u64) -> bool {
        let mut total = 0;
        dir_exceeds(&self.gitdir, limit_bytes, &mut total)
    }

    fn git(&self, runner: &CommandRunner, args: &[&str]) -> Result<CommandOutput> {
        runner.run("git", args, Some(&self.path))
    }
}

fn success_text(out: &CommandOutput) -> Option<&str> {
    (out.success() && !out.stdout_text().is_empty()).then(|| out.stdout_text())
}

fn dir_exceeds(path: &Path, limit: u64, total: &mut u64) -> bool {
    let Ok(entries) = std::fs::read_dir(path) else {
        return *total > limit;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() {
            if let Ok(meta) = entry.metadata() {
                *total += meta.len();
            }
        } else if file_type.is_dir() && dir_exceeds(&entry.path(), limit, total) {
            return true;
        }
        if *total > limit {
            return true;
        }
    }
    *total > limit
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "On branch main\n\
        Your branch is up to date with 'origin/main'.\n\
        \n\
        nothing to commit, working tree clean\n";

    const AHEAD: &str = "On branch main\n\
        Your branch is ahead of 'origin/main' by 2 commits.\n  \
        (use \"git push\" to publish your local commits)\n\
        \n\
        nothing to commit, working tree clean";

    const BEHIND: &str = "On branch main\n\
        Your branch is behind 'origin/main' by 3 commits, and can be fast-forwarded.\n  \
        (use \"git pull\" to update your local branch)\n\
        \n\
        nothing to commit, working tree clean";

    const DIVERGED: &str = "On branch main\n\
        Your branch and 'origin/main' have diverged,\n\
        and have 1 and 2 different commits each, respectively.\n\
        \n\
        nothing to commit, working tree clean";

    const DIRTY: &str = "On branch main\n\
        Your branch is up to date with 'origin/main'.\n\
        \n\
        Changes not staged for commit:\n  \
        modified:   src/main.rs\n\
        \n\
        no changes added to commit (use \"git add\" and/or \"git commit -a\")";

    const DIRTY_BEHIND: &str = "On branch main\n\
        Your branch is behind 'origin/main' by 1 commit, and can be fast-forwarded.\n\
        \n\
        Untracked files:\n  \
        notes.txt\n\
        \n\
        nothing added to commit but untracked files present";

    #[test]
    fn test_clean_is_up_to_date() {
        let status = RepoStatus::parse(CLEAN);
        assert!(!status.dirty);
        assert_eq!(status.action(), RepoAction::UpToDate);
        assert_eq!(
            status.branch_line.as_deref(),
            Some("Your branch is up to date with 'origin/main'.")
        );
    }

    #[test]
    fn test_ahead_only_is_up_to_date() {
        let status = RepoStatus::parse(AHEAD);
        assert!(status.ahead);
        assert_eq!(status.action(), RepoAction::UpToDate);
    }

    #[test]
    fn test_behind_clean_is_pullable() {
        let status = RepoStatus::parse(BEHIND);
        assert!(status.behind && !status.dirty);
        assert_eq!(status.action(), RepoAction::Pullable);
    }

    #[test]
    fn test_diverged_is_pullable() {
        assert_eq!(RepoStatus::parse(DIVERGED).action(), RepoAction::Pullable);
    }

    #[test]
    fn test_dirty_is_reported() {
        let status = RepoStatus::parse(DIRTY);
        assert!(status.dirty);
        assert_eq!(status.action(), RepoAction::Report);
    }

    #[test]
    fn test_dirty_and_behind_needs_attention() {
        assert_eq!(RepoStatus::parse(DIRTY_BEHIND).action(), RepoAction::NeedsAttention);
    }

    #[test]
    fn test_empty_output_is_reported_as_dirty() {
        // git failed; better to show the repo than to hide it
        assert_eq!(RepoStatus::parse("").action(), RepoAction::Report);
    }

    #[test]
    fn test_short_remote() {
        assert_eq!(short_remote("https://github.com/owner/repo.git"), "owner/repo.git");
        assert_eq!(short_remote("git@github.com:owner/repo.git\n"), "git@github.com:owner/repo.git");
        assert_eq!(short_remote("repo"), "repo");
    }

    fn fake_gitdir(root: &Path) {
        let gitdir = root.join(".git");
        std::fs::create_dir_all(gitdir.join("info")).unwrap();
        std::fs::create_dir_all(gitdir.join("refs")).unwrap();
        std::fs::write(gitdir.join("config"), "[core]\n").unwrap();
        std::fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    #[test]
    fn test_is_repo_requires_layout() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_repo(dir.path()));

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(!is_repo(dir.path()));

        fake_gitdir(dir.path());
        assert!(is_repo(dir.path()));
    }

    #[test]
    fn test_gitdir_file_is_not_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".git"), "gitdir: ../elsewhere\n").unwrap();
        assert!(!is_repo(dir.path()));
    }

    #[test]
    fn test_gitdir_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        fake_gitdir(dir.path());
        let objects = dir.path().join(".git/objects/ab");
        std::fs::create_dir_all(&objects).unwrap();
        std::fs::write(objects.join("blob"), vec![0u8; 4096]).unwrap();

        let repo = GitRepo::new(dir.path());
        assert!(repo.gitdir_exceeds(1024));
        assert!(!repo.gitdir_exceeds(1_000_000));
    }
}
