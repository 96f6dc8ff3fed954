pub mod gists;
pub mod repos;
pub mod scan;

use anyhow::{Context, Result};
use colored::Colorize;
use log::warn;
use std::io::{self, Write};

/// Asks a yes/no question on the terminal. Anything but `y`/`yes` is no.
///
/// # Errors
/// Returns error if stdin or stdout fail.
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} {} ", question.magenta().bold(), "[y/N]".dimmed());
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read answer from stdin")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Runs `f` on a pool of `workers` threads, or on the global pool if one
/// cannot be built.
pub fn with_pool<T, F>(workers: usize, f: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(f),
        Err(e) => {
            warn!("could not build worker pool ({e}); using the global pool");
            f()
        }
    }
}
