//! Handler for the scan: builds the exclusion set, walks PARENT, then checks
//! repos and gist files.

use super::{gists, repos};
use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use too_many_repos::engine::config::Settings;
use too_many_repos::engine::gist::{self, CachedHost, FilenameIndex, GhCli};
use too_many_repos::engine::ignore::{IgnoreSet, IGNORE_FILE};
use too_many_repos::engine::runner::CommandRunner;
use too_many_repos::engine::walker::{self, Entry};

/// What the command line asked for, beyond the settings.
#[derive(Debug, Clone)]
pub struct ScanArgs {
    pub parent: PathBuf,
    pub exclude: Vec<String>,
    pub quiet: bool,
    pub gists: bool,
    pub repos: bool,
    pub fetch: bool,
    pub json: bool,
}

/// Everything a check needs while running.
pub struct Session<'a> {
    pub settings: &'a Settings,
    pub runner: CommandRunner,
    pub quiet: bool,
    pub json: bool,
    pub fetch: bool,
}

impl Session<'_> {
    /// Prompts are off in quiet and JSON modes.
    #[must_use]
    pub fn interactive(&self) -> bool {
        !self.quiet && !self.json
    }

    #[must_use]
    pub fn verbose(&self) -> bool {
        self.settings.verbose > 0
    }
}

#[derive(Serialize)]
struct ScanReport {
    parent: PathBuf,
    repos: Vec<repos::RepoReport>,
    files: Vec<gists::FileReport>,
}

/// Runs the whole scan.
///
/// # Errors
/// Returns error if PARENT is not accessible, an exclusion pattern is
/// invalid, or the terminal cannot be used for a prompt.
pub fn handle(settings: &Settings, args: &ScanArgs) -> Result<()> {
    let parent = args
        .parent
        .canonicalize()
        .with_context(|| format!("Cannot access {}", args.parent.display()))?;

    let ignore = build_ignore_set(&parent, &args.exclude)?;
    debug!(
        "parent: {}, max_depth: {}, gitdir_size_limit: {}MB, gists: {}, quiet: {}",
        parent.display(),
        settings.max_depth,
        settings.gitdir_size_limit_mb,
        args.gists,
        args.quiet
    );
    debug!("excluding: {:?}", ignore.rules().iter().map(ToString::to_string).collect::<Vec<_>>());
    if !ignore.overrides().is_empty() {
        debug!(
            "not excluding: {:?}",
            ignore.overrides().iter().map(ToString::to_string).collect::<Vec<_>>()
        );
    }

    let session = Session {
        settings,
        runner: CommandRunner::default(),
        quiet: args.quiet,
        json: args.json,
        fetch: args.fetch,
    };

    let index = if args.gists {
        index_gists(&session, &ignore)
    } else {
        FilenameIndex::new()
    };

    let entries = walker::walk(&parent, settings.max_depth, &ignore);
    let (repo_paths, file_paths): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| matches!(e, Entry::Repo(_)));
    debug!("found {} repos and {} files", repo_paths.len(), file_paths.len());

    let repo_reports = if args.repos {
        let paths: Vec<PathBuf> = repo_paths.iter().map(|e| e.path().to_path_buf()).collect();
        repos::check(&session, &paths)?
    } else {
        Vec::new()
    };

    let file_reports = if index.is_empty() {
        Vec::new()
    } else {
        let paths: Vec<PathBuf> = file_paths.iter().map(|e| e.path().to_path_buf()).collect();
        gists::check(&session, &paths, &index)?
    };

    if args.json {
        let report = ScanReport {
            parent,
            repos: repo_reports,
            files: file_reports,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if session.verbose() {
        println!(
            "\n{} {} repos and {} files need attention",
            "ℹ".blue(),
            repo_reports.len(),
            file_reports.len()
        );
    }
    Ok(())
}

/// `~/.tmrignore`, then `PARENT/.tmrignore`, then `-e` values.
fn build_ignore_set(parent: &Path, exclude: &[String]) -> Result<IgnoreSet> {
    let mut ignore = IgnoreSet::new();
    let home = dirs::home_dir();

    for root in home.iter().map(PathBuf::as_path).chain(Some(parent)) {
        let path = root.join(IGNORE_FILE);
        ignore
            .load_file(&path)
            .with_context(|| format!("Invalid rule in {}", path.display()))?;
    }

    ignore
        .update(exclude)
        .context("Invalid --exclude value")?;
    Ok(ignore)
}

fn index_gists(session: &Session<'_>, ignore: &IgnoreSet) -> FilenameIndex {
    debug!("getting gists...");
    let settings = session.settings;
    let host = CachedHost::new(GhCli::new(session.runner.clone()), settings.cache.clone());

    match gist::build_filename_index(&host, ignore, settings.gist_list_limit, |n| {
        settings.workers_for(n)
    }) {
        Ok(index) => {
            debug!("{} distinct gist file names", index.len());
            index
        }
        Err(e) => {
            warn!("could not list gists: {e}");
            FilenameIndex::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_ignore_file_and_excludes_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE), "node_modules\n# comment\n").unwrap();

        let ignore = build_ignore_set(dir.path(), &["scratch".to_string()]).unwrap();
        assert!(ignore.is_ignored("node_modules"));
        assert!(ignore.is_ignored("scratch"));
    }

    #[test]
    fn test_invalid_exclude_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_ignore_set(dir.path(), &["(unclosed".to_string()]).is_err());
    }

    #[test]
    fn test_session_interactivity() {
        let settings = Settings::default();
        let session = |quiet, json| Session {
            settings: &settings,
            runner: CommandRunner::default(),
            quiet,
            json,
            fetch: false,
        };
        assert!(session(false, false).interactive());
        assert!(!session(true, false).interactive());
        assert!(!session(false, true).interactive());
    }
}
