//! Handler for the repository check: fetch, read status, offer to pull.

use super::scan::Session;
use super::{confirm, with_pool};
use anyhow::Result;
use colored::Colorize;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use too_many_repos::engine::git::{GitRepo, Remotes, RepoAction, RepoStatus};

#[derive(Debug, Serialize)]
pub struct RepoReport {
    pub path: PathBuf,
    pub action: RepoAction,
    pub status: RepoStatus,
    pub remotes: Remotes,
}

/// Checks every repo in `paths`, in order, and returns the ones needing attention.
///
/// # Errors
/// Returns error only if a prompt cannot be shown.
pub fn check(session: &Session<'_>, paths: &[PathBuf]) -> Result<Vec<RepoReport>> {
    let limit = session.settings.gitdir_size_limit_bytes();
    let repos: Vec<GitRepo> = paths
        .iter()
        .map(GitRepo::new)
        .filter(|repo| {
            let too_big = repo.gitdir_exceeds(limit);
            if too_big {
                debug!(
                    "{}: skipping; .git dir exceeds {}MB",
                    repo.path.display(),
                    session.settings.gitdir_size_limit_mb
                );
            }
            !too_big
        })
        .collect();

    if session.fetch && !repos.is_empty() {
        fetch_all(session, &repos);
    }

    let mut reports = Vec::new();
    for repo in &repos {
        if let Some(report) = check_one(session, repo)? {
            reports.push(report);
        }
    }
    Ok(reports)
}

fn fetch_all(session: &Session<'_>, repos: &[GitRepo]) {
    let workers = session.settings.workers_for(repos.len());
    debug!("fetching {} repos on {workers} workers", repos.len());

    with_pool(workers, || {
        repos.par_iter().for_each(|repo| {
            if let Err(e) = repo.fetch(&session.runner) {
                warn!("{}: {e}", repo.path.display());
            }
        });
    });
}

fn check_one(session: &Session<'_>, repo: &GitRepo) -> Result<Option<RepoReport>> {
    let status = match repo.status(&session.runner) {
        Ok(status) => status,
        Err(e) => {
            warn!("{}: {e}", repo.path.display());
            return Ok(None);
        }
    };
    let action = status.action();

    if action == RepoAction::UpToDate {
        if session.verbose() && !session.json {
            print_up_to_date(session, repo, &status);
        }
        return Ok(None);
    }

    let remotes = if session.json {
        repo.remotes(&session.runner).unwrap_or_else(|e| {
            warn!("{}: {e}", repo.path.display());
            Remotes::default()
        })
    } else {
        show_status(session, repo);
        if action == RepoAction::Pullable {
            offer_pull(session, repo)?;
        }
        Remotes::default()
    };

    Ok(Some(RepoReport {
        path: repo.path.clone(),
        action,
        status,
        remotes,
    }))
}

fn print_up_to_date(session: &Session<'_>, repo: &GitRepo, status: &RepoStatus) {
    let mut msg = format!("{}: nothing modified, ", repo.path.display().to_string().bold());
    match (&status.branch_line, status.ahead) {
        (Some(line), true) => msg.push_str(&format!("but {line}\n\t")),
        _ => msg.push_str("everything up-to-date."),
    }

    if let Ok(remotes) = repo.remotes(&session.runner) {
        if !remotes.origin.is_empty() {
            msg.push_str(&format!(" {}: {}.", "origin".bold(), remotes.origin.italic()));
        }
        if !remotes.upstream.is_empty() {
            msg.push_str(&format!(" {}: {}.", "upstream".bold(), remotes.upstream.italic()));
        }
        if !remotes.tracking.is_empty() {
            msg.push_str(&format!(" {}: {}", "tracking".bold(), remotes.tracking.italic()));
        }
    }
    println!("{} {}", "✓".green(), msg.green());
}

/// Shows the live, colored `git status` under a header.
fn show_status(session: &Session<'_>, repo: &GitRepo) {
    println!("\n{}\n", repo.path.display().to_string().bright_white().bold().underline());
    if let Err(e) = session
        .runner
        .run_interactive("git", &["status"], Some(&repo.path))
    {
        warn!("{}: {e}", repo.path.display());
    }
    println!();
}

fn offer_pull(session: &Session<'_>, repo: &GitRepo) -> Result<()> {
    if !session.interactive() {
        info!("Would've prompted git pull, but quiet");
        return Ok(());
    }

    if !confirm("git pull?")? {
        println!("{} not pulling", "⚡".yellow());
        return Ok(());
    }

    println!("pulling...");
    match session
        .runner
        .run_interactive("git", &["pull"], Some(&repo.path))
    {
        Ok(Some(0)) => {}
        Ok(code) => warn!("{}: git pull exited with {code:?}", repo.path.display()),
        Err(e) => warn!("{}: {e}", repo.path.display()),
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use too_many_repos::engine::config::Settings;
    use too_many_repos::engine::runner::CommandRunner;

    fn fake_repo(path: &Path) {
        let gitdir = path.join(".git");
        std::fs::create_dir_all(gitdir.join("info")).unwrap();
        std::fs::create_dir_all(gitdir.join("refs")).unwrap();
        std::fs::write(gitdir.join("config"), "[core]\n").unwrap();
        std::fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    #[test]
    fn test_oversized_gitdirs_are_skipped_before_git_runs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("big");
        fake_repo(&repo);

        let settings = Settings {
            gitdir_size_limit_mb: 0,
            ..Settings::default()
        };
        let session = Session {
            settings: &settings,
            runner: CommandRunner::default(),
            quiet: true,
            json: true,
            fetch: true,
        };
        assert!(check(&session, &[repo]).unwrap().is_empty());
    }

    #[test]
    fn test_no_repos_is_empty_report() {
        let settings = Settings::default();
        let session = Session {
            settings: &settings,
            runner: CommandRunner::default(),
            quiet: true,
            json: true,
            fetch: true,
        };
        assert!(check(&session, &[]).unwrap().is_empty());
    }
}
