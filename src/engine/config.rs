//! Settings: an explicit schema read from `~/.tmrrc.toml`, overridden by CLI flags.

use super::error::{Result, TmrError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the settings file looked up in `$HOME`.
pub const SETTINGS_FILE: &str = ".tmrrc.toml";

const KNOWN_KEYS: &[&str] = &[
    "verbose",
    "max_workers",
    "max_depth",
    "gitdir_size_limit_mb",
    "difftool",
    "gist_list_limit",
    "cache",
];

/// Which way the gist cache may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum CacheMode {
    Read,
    Write,
    ReadWrite,
}

impl CacheMode {
    pub const ACCEPTED: &'static str = "r, w, r+w (also w+r, rw, wr)";

    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, CacheMode::Read | CacheMode::ReadWrite)
    }

    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, CacheMode::Write | CacheMode::ReadWrite)
    }
}

impl FromStr for CacheMode {
    type Err = TmrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "r" => Ok(CacheMode::Read),
            "w" => Ok(CacheMode::Write),
            "r+w" | "w+r" | "rw" | "wr" => Ok(CacheMode::ReadWrite),
            _ => Err(TmrError::InvalidOption {
                option: "cache mode",
                value: s.to_string(),
                accepted: Self::ACCEPTED,
            }),
        }
    }
}

impl TryFrom<String> for CacheMode {
    type Error = TmrError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Read => write!(f, "r"),
            CacheMode::Write => write!(f, "w"),
            CacheMode::ReadWrite => write!(f, "r+w"),
        }
    }
}

/// The kinds of `gh` responses that can be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    GistList,
    GistFilenames,
    GistContent,
}

/// Resolved cache settings.
///
/// Without a mode the cache is off. With a mode, each kind is enabled
/// unless the settings file turned it off explicitly.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub mode: Option<CacheMode>,
    pub path: PathBuf,
    pub gist_list: bool,
    pub gist_filenames: bool,
    pub gist_content: bool,
}

impl CacheSettings {
    fn kind_enabled(&self, kind: CacheKind) -> bool {
        match kind {
            CacheKind::GistList => self.gist_list,
            CacheKind::GistFilenames => self.gist_filenames,
            CacheKind::GistContent => self.gist_content,
        }
    }

    #[must_use]
    pub fn reads(&self, kind: CacheKind) -> bool {
        self.mode.is_some_and(CacheMode::can_read) && self.kind_enabled(kind)
    }

    #[must_use]
    pub fn writes(&self, kind: CacheKind) -> bool {
        self.mode.is_some_and(CacheMode::can_write) && self.kind_enabled(kind)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mode: None,
            path: default_cache_dir(),
            gist_list: false,
            gist_filenames: false,
            gist_content: false,
        }
    }
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verbose: u8,
    /// Worker pool size; `None` means one worker per item.
    pub max_workers: Option<usize>,
    pub max_depth: usize,
    pub gitdir_size_limit_mb: u64,
    pub difftool: String,
    pub gist_list_limit: usize,
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_workers: None,
            max_depth: 1,
            gitdir_size_limit_mb: 100,
            difftool: "diff".to_string(),
            gist_list_limit: 100,
            cache: CacheSettings::default(),
        }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub verbose: Option<u8>,
    pub max_workers: Option<usize>,
    pub max_depth: Option<usize>,
    pub gitdir_size_limit_mb: Option<u64>,
    pub difftool: Option<String>,
    pub cache_mode: Option<CacheMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    verbose: Option<u8>,
    max_workers: Option<usize>,
    max_depth: Option<usize>,
    gitdir_size_limit_mb: Option<u64>,
    difftool: Option<String>,
    gist_list_limit: Option<usize>,
    cache: CacheFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheFile {
    mode: Option<CacheMode>,
    path: Option<PathBuf>,
    gist_list: Option<bool>,
    gist_filenames: Option<bool>,
    gist_content: Option<bool>,
}

impl Settings {
    /// Loads `~/.tmrrc.toml` (if any) and applies the CLI overrides.
    ///
    /// # Errors
    /// Returns `Config` if the settings file is malformed.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        match settings_path() {
            Some(path) => Self::load_from(&path, overrides),
            None => {
                debug!("no home directory; using default settings");
                Ok(Self::merge(SettingsFile::default(), overrides, Path::new(SETTINGS_FILE)))
            }
        }
    }

    /// Like [`Settings::load`], with an explicit settings file path.
    ///
    /// An unreadable file is logged and treated like a missing one.
    ///
    /// # Errors
    /// Returns `Config` if the file exists but is malformed.
    pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Self> {
        let file = read_settings_file(path)?;
        Ok(Self::merge(file, overrides, path))
    }

    fn merge(file: SettingsFile, cli: &Overrides, path: &Path) -> Self {
        let defaults = Settings::default();
        let source = path.display().to_string();

        let mode = pick(&source, "cache mode", file.cache.mode, cli.cache_mode);
        let kind = |explicit: Option<bool>| mode.is_some() && explicit.unwrap_or(true);

        Self {
            verbose: pick(&source, "verbose", file.verbose, cli.verbose).unwrap_or(defaults.verbose),
            max_workers: pick(&source, "max_workers", file.max_workers, cli.max_workers)
                .filter(|&n| n > 0),
            max_depth: pick(&source, "max_depth", file.max_depth, cli.max_depth)
                .unwrap_or(defaults.max_depth),
            gitdir_size_limit_mb: pick(
                &source,
                "gitdir_size_limit_mb",
                file.gitdir_size_limit_mb,
                cli.gitdir_size_limit_mb,
            )
            .unwrap_or(defaults.gitdir_size_limit_mb),
            difftool: pick(&source, "difftool", file.difftool, cli.difftool.clone())
                .unwrap_or(defaults.difftool),
            gist_list_limit: file.gist_list_limit.unwrap_or(defaults.gist_list_limit),
            cache: CacheSettings {
                mode,
                path: file.cache.path.unwrap_or(defaults.cache.path),
                gist_list: kind(file.cache.gist_list),
                gist_filenames: kind(file.cache.gist_filenames),
                gist_content: kind(file.cache.gist_content),
            },
        }
    }

    /// Size limit of a `.git` directory in bytes.
    #[must_use]
    pub fn gitdir_size_limit_bytes(&self) -> u64 {
        self.gitdir_size_limit_mb.saturating_mul(1_000_000)
    }

    /// Pool size for `items` units of work.
    #[must_use]
    pub fn workers_for(&self, items: usize) -> usize {
        let items = items.max(1);
        self.max_workers.map_or(items, |n| n.min(items))
    }
}

/// CLI value wins; a value given in both places is reported.
fn pick<T: Debug>(source: &str, key: &str, file: Option<T>, cli: Option<T>) -> Option<T> {
    match (file, cli) {
        (Some(file), Some(cli)) => {
            warn!(
                "{key} was specified both in {source} and on the command line; \
                 {file:?} is overwritten by {cli:?}"
            );
            Some(cli)
        }
        (file, None) => file,
        (None, cli) => cli,
    }
}

fn read_settings_file(path: &Path) -> Result<SettingsFile> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{}: not found, using defaults", path.display());
            return Ok(SettingsFile::default());
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            return Ok(SettingsFile::default());
        }
    };

    let config_err = |source| TmrError::Config {
        path: path.to_path_buf(),
        source,
    };

    let table: toml::Table = toml::from_str(&text).map_err(config_err)?;
    let unknown: Vec<_> = table
        .keys()
        .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        warn!("{}: unknown settings: {}", path.display(), unknown.join(", "));
    }

    let file = toml::from_str(&text).map_err(config_err)?;
    debug!("loaded settings from {}", path.display());
    Ok(file)
}

/// `~/.tmrrc.toml`, if there is a home directory.
#[must_use]
pub fn settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SETTINGS_FILE))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("too-many-repos")
}
