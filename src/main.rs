mod handlers;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;
use too_many_repos::engine::config::{CacheMode, Overrides, Settings};

#[derive(Parser)]
#[command(
    name = "tmr",
    version,
    about = "Runs `git fetch` and `git status` in every repo under PARENT and reports the ones that need attention"
)]
struct Cli {
    /// Directory to scan
    #[arg(default_value = ".")]
    parent: PathBuf,

    /// Exclude paths, gist ids, descriptions or file names (repeatable; regex-like values are patterns)
    #[arg(long, short = 'e', value_name = "PATTERN")]
    exclude: Vec<String>,

    /// More output; repeat for debug and trace logging
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Never prompt; log what would have been asked instead
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Also diff local files against files of the same name in your gists
    #[arg(long)]
    gists: bool,

    /// Skip the repository scan
    #[arg(long)]
    no_repos: bool,

    /// Read `git status` without fetching first
    #[arg(long)]
    no_fetch: bool,

    /// Print a JSON report instead of interactive output
    #[arg(long)]
    json: bool,

    /// How deep to walk below PARENT
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Worker threads for fetching (default: one per repo or gist)
    #[arg(long, value_name = "N")]
    max_workers: Option<usize>,

    /// Skip repos whose .git dir is larger than this
    #[arg(long, value_name = "MB")]
    gitdir_size_limit: Option<u64>,

    /// Command used to show a diff, called as `CMD <gist file> <local file>`
    #[arg(long, value_name = "CMD")]
    difftool: Option<String>,

    /// Gist cache mode: r, w or r+w
    #[arg(long, value_name = "MODE", value_parser = CacheMode::from_str)]
    cache_mode: Option<CacheMode>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            verbose: (self.verbose > 0).then_some(self.verbose),
            max_workers: self.max_workers,
            max_depth: self.max_depth,
            gitdir_size_limit_mb: self.gitdir_size_limit,
            difftool: self.difftool.clone(),
            cache_mode: self.cache_mode,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(&cli.overrides()).context("Failed to load settings")?;
    apply_verbosity(settings.verbose);

    let args = handlers::scan::ScanArgs {
        parent: cli.parent,
        exclude: cli.exclude,
        quiet: cli.quiet,
        gists: cli.gists,
        repos: !cli.no_repos,
        fetch: !cli.no_fetch,
        json: cli.json,
    };
    handlers::scan::handle(&settings, &args)
}

fn init_logging(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();
    apply_verbosity(verbose);
}

/// `RUST_LOG`, when set, wins over `-v`.
fn apply_verbosity(verbose: u8) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    log::set_max_level(match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
}
