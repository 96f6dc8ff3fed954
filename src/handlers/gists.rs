//! Handler for the gist check: diff local files against same-named gist files.

use super::confirm;
use super::scan::Session;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use too_many_repos::engine::classify::DiffVerdict;
use too_many_repos::engine::gist::{describe_gap, newer_side, FilenameIndex, GistFile, Newer};

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub gist_id: String,
    pub gist: String,
    pub verdict: DiffVerdict,
    pub newer: Option<Newer>,
    pub newer_by: Option<String>,
}

/// Compares each file in `paths` against gist files of the same name and
/// returns the ones that differ.
///
/// # Errors
/// Returns error only if a prompt cannot be shown.
pub fn check(session: &Session<'_>, paths: &[PathBuf], index: &FilenameIndex) -> Result<Vec<FileReport>> {
    let mut reports = Vec::new();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(candidates) = index.get(name) else {
            continue;
        };
        for gist_file in candidates {
            if let Some(report) = check_one(session, path, gist_file)? {
                reports.push(report);
            }
        }
    }
    Ok(reports)
}

fn check_one(session: &Session<'_>, path: &Path, gist_file: &GistFile) -> Result<Option<FileReport>> {
    let verdict = match gist_file.diff(path, &session.runner) {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("{}: {e}", path.display());
            return Ok(None);
        }
    };

    if !verdict.is_different() {
        if session.verbose() && !session.json {
            println!(
                "{} {}",
                "✓".green(),
                format!(
                    "{}: file and gist {} are identical",
                    path.display().to_string().bold(),
                    gist_file.gist_label
                )
                .green()
            );
        }
        return Ok(None);
    }

    let age = gist_file
        .updated_at
        .zip(modified_at(path))
        .map(|(gist_time, local_time)| newer_side(gist_time, local_time));
    let (newer, newer_by) = match &age {
        Some(Some((side, gap))) => (Some(side.clone()), Some(describe_gap(*gap))),
        _ => (None, None),
    };

    if !session.json {
        let mut line = format!(
            "{}: file and gist {} differ ({verdict})",
            path.display().to_string().bold(),
            gist_file.gist_label
        );
        match (&newer, &newer_by, &age) {
            (Some(side), Some(by), _) => line.push_str(&format!("; {} is newer by {by}", side.to_string().bold())),
            (_, _, Some(None)) => line.push_str(" (less than 5 seconds apart)"),
            _ => {}
        }
        println!("{} {}", "⚡".yellow(), line.yellow());
        offer_diff(session, path, gist_file)?;
    }

    Ok(Some(FileReport {
        path: path.to_path_buf(),
        gist_id: gist_file.gist_id.clone(),
        gist: gist_file.gist_label.clone(),
        verdict,
        newer,
        newer_by,
    }))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn offer_diff(session: &Session<'_>, path: &Path, gist_file: &GistFile) -> Result<()> {
    if !session.interactive() {
        info!("Would've prompted show diff, but quiet");
        return Ok(());
    }
    if !confirm("show diff?")? {
        return Ok(());
    }

    let gist_copy = match gist_file.materialize() {
        Ok(copy) => copy,
        Err(e) => {
            warn!("{e}");
            return Ok(());
        }
    };

    let Some((program, args)) = difftool_command(&session.settings.difftool, gist_copy, path) else {
        warn!("difftool is empty");
        return Ok(());
    };
    if let Err(e) = session.runner.run_interactive(&program, &args, None) {
        warn!("{e}");
    }
    println!();
    Ok(())
}

/// Splits the configured tool on whitespace and appends the two files.
fn difftool_command(difftool: &str, gist_copy: &Path, local: &Path) -> Option<(String, Vec<String>)> {
    let mut words = difftool.split_whitespace().map(str::to_string);
    let program = words.next()?;
    let mut args: Vec<String> = words.collect();
    args.push(gist_copy.to_string_lossy().into_owned());
    args.push(local.to_string_lossy().into_owned());
    Some((program, args))
}
