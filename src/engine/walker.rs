//! Directory walker: finds repositories and candidate files under the parent path.

use super::git;
use super::ignore::IgnoreSet;
use log::{trace, warn};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum Entry {
    Repo(PathBuf),
    File(PathBuf),
}

impl Entry {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Entry::Repo(path) | Entry::File(path) => path,
        }
    }
}

/// Walks `parent` down to `max_depth`, skipping excluded paths.
///
/// Excluded directories are pruned unless the set has overrides; then they
/// are still descended into so an override below them can take effect.
/// Repos come first, then files, each sorted by path.
#[must_use]
pub fn walk(parent: &Path, max_depth: usize, ignore: &IgnoreSet) -> Vec<Entry> {
    let prune = !ignore.has_overrides();
    let walker = WalkDir::new(parent)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git" && !(prune && excluded(ignore, e.path())));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                match err.io_error().map(std::io::Error::kind) {
                    Some(ErrorKind::PermissionDenied) => warn!("{path}: skipping; permission denied"),
                    _ => warn!("{path}: {err}"),
                }
                continue;
            }
        };
        if !prune && excluded(ignore, entry.path()) {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            if git::is_repo(entry.path()) {
                entries.push(Entry::Repo(entry.into_path()));
            }
        } else if file_type.is_file() {
            entries.push(Entry::File(entry.into_path()));
        }
    }

    entries.sort();
    entries
}

fn excluded(ignore: &IgnoreSet, path: &Path) -> bool {
    let excluded = ignore.is_path_ignored(path);
    if excluded {
        trace!("{}: skipping; excluded", path.display());
    }
    excluded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo(path: &Path) {
        let gitdir = path.join(".git");
        std::fs::create_dir_all(gitdir.join("info")).unwrap();
        std::fs::create_dir_all(gitdir.join("refs")).unwrap();
        std::fs::write(gitdir.join("config"), "").unwrap();
        std::fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    fn layout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        make_repo(&root.join("alpha"));
        make_repo(&root.join("beta"));
        std::fs::create_dir_all(root.join("plain/nested")).unwrap();
        make_repo(&root.join("plain/nested/deep"));
        std::fs::write(root.join(".bashrc"), "x").unwrap();
        std::fs::write(root.join("alpha/README.md"), "x").unwrap();
        dir
    }

    #[test]
    fn test_depth_one_lists_direct_children() {
        let dir = layout();
        let root = dir.path();
        let entries = walk(root, 1, &IgnoreSet::new());
        assert_eq!(
            entries,
            vec![
                Entry::Repo(root.join("alpha")),
                Entry::Repo(root.join("beta")),
                Entry::File(root.join(".bashrc")),
            ]
        );
    }

    #[test]
    fn test_deeper_walk_finds_nested_repos_but_not_gitdirs() {
        let dir = layout();
        let root = dir.path();
        let entries = walk(root, 3, &IgnoreSet::new());
        assert!(entries.contains(&Entry::Repo(root.join("plain/nested/deep"))));
        assert!(entries.contains(&Entry::File(root.join("alpha/README.md"))));
        assert!(entries
            .iter()
            .all(|e| !e.path().components().any(|c| c.as_os_str() == ".git")));
    }

    #[test]
    fn test_excluded_dirs_are_pruned() {
        let dir = layout();
        let root = dir.path();
        let mut ignore = IgnoreSet::new();
        ignore.add("plain").unwrap();
        ignore.add("beta").unwrap();

        let entries = walk(root, 3, &ignore);
        assert!(!entries.contains(&Entry::Repo(root.join("beta"))));
        assert!(!entries.contains(&Entry::Repo(root.join("plain/nested/deep"))));
        assert!(entries.contains(&Entry::Repo(root.join("alpha"))));
    }

    #[test]
    fn test_override_below_excluded_dir_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        make_repo(&root.join("vendor/mine"));
        make_repo(&root.join("vendor/theirs"));

        let mut ignore = IgnoreSet::new();
        ignore.add(&root.join("vendor").to_string_lossy()).unwrap();
        ignore.add(&format!("!{}", root.join("vendor/mine").display())).unwrap();

        let entries = walk(root, 2, &ignore);
        assert_eq!(entries, vec![Entry::Repo(root.join("vendor/mine"))]);
    }

    #[test]
    fn test_override_keeps_path() {
        let dir = layout();
        let root = dir.path();
        let mut ignore = IgnoreSet::new();
        ignore.add("alpha").unwrap();
        ignore.add("!alpha").unwrap();
        assert!(walk(root, 1, &ignore).contains(&Entry::Repo(root.join("alpha"))));
    }
}
