//! Gist adapter: lists the user's gists through `gh` and indexes their files by name.

use super::cache::GistCache;
use super::classify::{DiffVerdict, Reference};
use super::config::{CacheKind, CacheSettings};
use super::error::{Result, TmrError};
use super::ignore::IgnoreSet;
use super::runner::CommandRunner;
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Secret,
}

/// One line of `gh gist list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gist {
    pub id: String,
    pub description: String,
    pub file_count: usize,
    pub visibility: Visibility,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Gist {
    /// Parses `id \t description \t N files \t visibility \t date`.
    ///
    /// # Errors
    /// Returns `GistLine` if the line does not have that shape.
    pub fn parse_line(line: &str) -> Result<Self> {
        let bad = || TmrError::GistLine {
            line: line.to_string(),
        };

        let fields: Vec<&str> = line.split('\t').collect();
        let &[id, description, files, visibility, date] = fields.as_slice() else {
            return Err(bad());
        };
        if id.trim().is_empty() {
            return Err(bad());
        }

        let file_count = files
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(bad)?;
        let visibility = match visibility.trim() {
            "public" => Visibility::Public,
            "secret" => Visibility::Secret,
            _ => return Err(bad()),
        };
        let updated_at = DateTime::parse_from_rfc3339(date.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok();

        Ok(Self {
            id: id.trim().to_string(),
            description: description.to_string(),
            file_count,
            visibility,
            updated_at,
        })
    }

    /// First 8 chars of the id and up to 32 of the description.
    #[must_use]
    pub fn short(&self) -> String {
        let id: String = self.id.chars().take(8).collect();
        let description: String = self.description.chars().take(32).collect();
        format!("{id} '{description}'")
    }
}

/// A file inside a gist, with its content ready for comparison.
#[derive(Debug)]
pub struct GistFile {
    pub name: String,
    pub gist_id: String,
    /// `Gist::short()` of the owning gist.
    pub gist_label: String,
    pub updated_at: Option<DateTime<Utc>>,
    reference: Reference,
    verdicts: Mutex<HashMap<PathBuf, DiffVerdict>>,
}

impl GistFile {
    #[must_use]
    pub fn new(gist: &Gist, name: &str, content: String) -> Self {
        let tmp_path = std::env::temp_dir().join(format!("{}_{}", gist.id, name.replace('/', "_")));
        Self {
            name: name.to_string(),
            gist_id: gist.id.clone(),
            gist_label: gist.short(),
            updated_at: gist.updated_at,
            reference: Reference::new(content, tmp_path),
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        self.reference.content()
    }

    /// Writes the gist copy to its temp file (once) and returns the path.
    ///
    /// # Errors
    /// Returns `Io` if the temp file cannot be written.
    pub fn materialize(&self) -> Result<&Path> {
        self.reference.materialize()
    }

    /// Classifies `local` against this file. Repeated calls for the same
    /// path return the first verdict.
    ///
    /// # Errors
    /// Returns error if `local` cannot be read or compared.
    pub fn diff(&self, local: &Path, runner: &CommandRunner) -> Result<DiffVerdict> {
        if let Some(verdict) = self.cached_verdict(local) {
            return Ok(verdict);
        }
        debug!("{}: diffing {}", self.gist_label, local.display());
        let verdict = self.reference.classify(local, runner)?;
        if let Ok(mut verdicts) = self.verdicts.lock() {
            verdicts.insert(local.to_path_buf(), verdict);
        }
        Ok(verdict)
    }

    fn cached_verdict(&self, local: &Path) -> Option<DiffVerdict> {
        self.verdicts.lock().ok()?.get(local).copied()
    }
}

/// Where gists come from.
pub trait GistHost: Send + Sync {
    /// Raw `gh gist list` lines, at most `limit` of them.
    ///
    /// # Errors
    /// Returns error if the listing cannot be obtained.
    fn list(&self, limit: usize) -> Result<Vec<String>>;

    /// # Errors
    /// Returns error if the file names cannot be obtained.
    fn file_names(&self, gist_id: &str) -> Result<Vec<String>>;

    /// # Errors
    /// Returns error if the file content cannot be obtained.
    fn file_content(&self, gist_id: &str, file_name: &str) -> Result<String>;
}

/// The real host: the `gh` CLI.
#[derive(Debug, Clone, Default)]
pub struct GhCli {
    runner: CommandRunner,
}

impl GhCli {
    #[must_use]
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn gh(&self, args: &[&str]) -> Result<String> {
        let out = self.runner.run("gh", args, None)?;
        if !out.success() {
            return Err(TmrError::Command {
                command: format!("gh {}", args.join(" ")),
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }
}

impl GistHost for GhCli {
    fn list(&self, limit: usize) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let stdout = self.gh(&["gist", "list", "-L", &limit])?;
        Ok(non_empty_lines(&stdout))
    }

    fn file_names(&self, gist_id: &str) -> Result<Vec<String>> {
        let stdout = self.gh(&["gist", "view", gist_id, "--files"])?;
        Ok(non_empty_lines(&stdout))
    }

    fn file_content(&self, gist_id: &str, file_name: &str) -> Result<String> {
        self.gh(&["gist", "view", gist_id, "-f", file_name])
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wraps a host with the on-disk cache, per the cache settings.
pub struct CachedHost<H> {
    inner: H,
    cache: GistCache,
    settings: CacheSettings,
}

impl<H: GistHost> CachedHost<H> {
    #[must_use]
    pub fn new(inner: H, settings: CacheSettings) -> Self {
        Self {
            inner,
            cache: GistCache::new(settings.path.clone()),
            settings,
        }
    }

    fn through<T, R, F, W>(&self, kind: CacheKind, read: R, fetch: F, write: W) -> Result<T>
    where
        R: FnOnce(&GistCache) -> Option<T>,
        F: FnOnce(&H) -> Result<T>,
        W: FnOnce(&GistCache, &T) -> Result<()>,
    {
        if self.settings.reads(kind) {
            if let Some(hit) = read(&self.cache) {
                return Ok(hit);
            }
            trace!("cache miss ({kind:?})");
        }
        let value = fetch(&self.inner)?;
        if self.settings.writes(kind) {
            if let Err(e) = write(&self.cache, &value) {
                warn!("failed to write gist cache: {e}");
            }
        }
        Ok(value)
    }
}

impl<H: GistHost> GistHost for CachedHost<H> {
    fn list(&self, limit: usize) -> Result<Vec<String>> {
        self.through(
            CacheKind::GistList,
            GistCache::gist_list,
            |host| host.list(limit),
            |cache, lines| cache.set_gist_list(lines),
        )
    }

    fn file_names(&self, gist_id: &str) -> Result<Vec<String>> {
        self.through(
            CacheKind::GistFilenames,
            |cache| cache.gist_filenames(gist_id),
            |host| host.file_names(gist_id),
            |cache, names| cache.set_gist_filenames(gist_id, names),
        )
    }

    fn file_content(&self, gist_id: &str, file_name: &str) -> Result<String> {
        self.through(
            CacheKind::GistContent,
            |cache| cache.gist_file_content(gist_id, file_name),
            |host| host.file_content(gist_id, file_name),
            |cache, content| cache.set_gist_file_content(gist_id, file_name, content),
        )
    }
}

/// Gist files grouped by file name.
pub type FilenameIndex = BTreeMap<String, Vec<Arc<GistFile>>>;

/// Lists gists, skips excluded ones and fetches the remaining files on a
/// pool of `workers` threads.
///
/// Gists that fail to fetch are logged and left out.
///
/// # Errors
/// Returns error if the gist listing itself fails.
pub fn build_filename_index<H: GistHost + ?Sized>(
    host: &H,
    ignore: &IgnoreSet,
    limit: usize,
    workers: impl Fn(usize) -> usize,
) -> Result<FilenameIndex> {
    let gists: Vec<Gist> = host
        .list(limit)?
        .iter()
        .filter_map(|line| match Gist::parse_line(line) {
            Ok(gist) => Some(gist),
            Err(e) => {
                warn!("{e}");
                None
            }
        })
        .filter(|gist| {
            let skip = ignore.is_ignored(&gist.id) || ignore.is_ignored(&gist.description);
            if skip {
                debug!("skipping gist {}: excluded", gist.short());
            }
            !skip
        })
        .collect();

    if gists.is_empty() {
        return Ok(FilenameIndex::new());
    }

    let fetch_all = || -> Vec<GistFile> {
        gists
            .par_iter()
            .flat_map_iter(|gist| fetch_gist_files(host, ignore, gist))
            .collect()
    };

    let files = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers(gists.len()))
        .build()
    {
        Ok(pool) => pool.install(fetch_all),
        Err(e) => {
            warn!("could not build gist worker pool ({e}); using the global pool");
            fetch_all()
        }
    };

    let mut index = FilenameIndex::new();
    for file in files {
        index.entry(file.name.clone()).or_default().push(Arc::new(file));
    }
    for entries in index.values_mut() {
        entries.sort_by(|a, b| a.gist_id.cmp(&b.gist_id));
    }
    Ok(index)
}

fn fetch_gist_files<H: GistHost + ?Sized>(host: &H, ignore: &IgnoreSet, gist: &Gist) -> Vec<GistFile> {
    debug!("getting files of {}", gist.short());
    let names = match host.file_names(&gist.id) {
        Ok(names) => names,
        Err(e) => {
            warn!("{}: {e}", gist.short());
            return Vec::new();
        }
    };

    names
        .iter()
        .filter(|name| {
            let skip = ignore.is_ignored(name);
            if skip {
                trace!("{}: skipping file {name}: excluded", gist.short());
            }
            !skip
        })
        .filter_map(|name| match host.file_content(&gist.id, name) {
            Ok(content) => Some(GistFile::new(gist, name, content)),
            Err(e) => {
                warn!("{} {name}: {e}", gist.short());
                None
            }
        })
        .collect()
}

/// Which side was modified more recently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Newer {
    Local,
    Gist,
}

/// "local is newer by 3 days", or `None` when the two are within 5 seconds.
#[must_use]
pub fn newer_side(gist_time: DateTime<Utc>, local_time: DateTime<Utc>) -> Option<(Newer, Duration)> {
    let (side, gap) = if local_time > gist_time {
        (Newer::Local, local_time - gist_time)
    } else {
        (Newer::Gist, gist_time - local_time)
    };
    (gap.num_seconds() > 5).then_some((side, gap))
}

/// Human-readable gap, coarsest unit first.
#[must_use]
pub fn describe_gap(gap: Duration) -> String {
    let days = gap.num_days();
    let hours = gap.num_hours() % 24;
    let minutes = gap.num_minutes() % 60;
    let seconds = gap.num_seconds() % 60;

    if days > 0 {
        format!("{days} days")
    } else if hours > 0 {
        format!("{hours} hours and {minutes} minutes")
    } else if minutes > 0 {
        format!("{minutes} minutes and {seconds} seconds")
    } else {
        format!("{seconds} seconds")
    }
}

impl std::fmt::Display for Newer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Newer::Local => write!(f, "local"),
            Newer::Gist => write!(f, "gist"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::CacheMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LINE: &str = "0123456789abcdef\tmy dotfiles\t2 files\tsecret\t2024-03-01T12:00:00Z";

    /// In-memory host that counts calls.
    #[derive(Default)]
    struct FakeHost {
        lines: Vec<String>,
        files: HashMap<String, Vec<(String, String)>>,
        unreachable_gists: Vec<String>,
        calls: AtomicUsize,
    }

    impl FakeHost {
        fn with_gist(mut self, id: &str, description: &str, files: &[(&str, &str)]) -> Self {
            self.lines.push(format!(
                "{id}\t{description}\t{} files\tpublic\t2024-01-01T00:00:00Z",
                files.len()
            ));
            self.files.insert(
                id.to_string(),
                files
                    .iter()
                    .map(|(n, c)| (n.to_string(), c.to_string()))
                    .collect(),
            );
            self
        }
    }

    impl GistHost for FakeHost {
        fn list(&self, limit: usize) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines.iter().take(limit).cloned().collect())
        }

        fn file_names(&self, gist_id: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable_gists.iter().any(|id| id == gist_id) {
                return Err(TmrError::Command {
                    command: format!("gh gist view {gist_id} --files"),
                    code: Some(1),
                    stderr: "HTTP 404".to_string(),
                });
            }
            Ok(self
                .files
                .get(gist_id)
                .map(|files| files.iter().map(|(n, _)| n.clone()).collect())
                .unwrap_or_default())
        }

        fn file_content(&self, gist_id: &str, file_name: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(gist_id)
                .and_then(|files| files.iter().find(|(n, _)| n == file_name))
                .map(|(_, c)| c.clone())
                .ok_or_else(|| TmrError::Command {
                    command: format!("gh gist view {gist_id} -f {file_name}"),
                    code: Some(1),
                    stderr: "not found".to_string(),
                })
        }
    }

    #[test]
    fn test_parse_gist_line() {
        let gist = Gist::parse_line(LINE).unwrap();
        assert_eq!(gist.id, "0123456789abcdef");
        assert_eq!(gist.description, "my dotfiles");
        assert_eq!(gist.file_count, 2);
        assert_eq!(gist.visibility, Visibility::Secret);
        assert_eq!(
            gist.updated_at.unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
        assert_eq!(gist.short(), "01234567 'my dotfiles'");
    }

    #[test]
    fn test_parse_gist_line_with_empty_description() {
        let gist = Gist::parse_line("abc\t\t1 file\tpublic\t2024-03-01T12:00:00Z").unwrap();
        assert_eq!(gist.description, "");
        assert_eq!(gist.file_count, 1);
    }

    #[test]
    fn test_malformed_gist_lines() {
        for line in [
            "",
            "abc\tdesc",
            "abc\tdesc\tmany files\tpublic\t2024-03-01T12:00:00Z",
            "abc\tdesc\t1 file\tunlisted\t2024-03-01T12:00:00Z",
        ] {
            assert!(
                matches!(Gist::parse_line(line), Err(TmrError::GistLine { .. })),
                "{line:?}"
            );
        }
    }

    #[test]
    fn test_index_groups_by_file_name() {
        let host = FakeHost::default()
            .with_gist("aaa", "shell", &[(".bashrc", "alias a=b\n"), (".inputrc", "x\n")])
            .with_gist("bbb", "more shell", &[(".bashrc", "alias c=d\n")]);

        let index = build_filename_index(&host, &IgnoreSet::new(), 100, |n| n).unwrap();
        assert_eq!(index.keys().collect::<Vec<_>>(), vec![".bashrc", ".inputrc"]);
        let bashrc = &index[".bashrc"];
        assert_eq!(bashrc.len(), 2);
        assert_eq!(bashrc[0].gist_id, "aaa");
        assert_eq!(bashrc[1].content(), b"alias c=d\n");
    }

    #[test]
    fn test_index_skips_ignored_gists_and_files() {
        let host = FakeHost::default()
            .with_gist("aaa", "work stuff", &[(".bashrc", "a\n"), ("secrets.env", "b\n")])
            .with_gist("bbb", "private", &[(".vimrc", "c\n")]);

        let mut ignore = IgnoreSet::new();
        ignore.add("private").unwrap();
        ignore.add(r".*\.env").unwrap();

        let index = build_filename_index(&host, &ignore, 100, |_| 2).unwrap();
        assert_eq!(index.keys().collect::<Vec<_>>(), vec![".bashrc"]);
    }

    #[test]
    fn test_index_skips_malformed_lines_and_failed_files() {
        let mut host = FakeHost::default()
            .with_gist("aaa", "shell", &[(".bashrc", "a\n")])
            .with_gist("ccc", "gone", &[(".vimrc", "b\n")]);
        host.lines.push("garbage".to_string());
        host.unreachable_gists.push("ccc".to_string());

        let index = build_filename_index(&host, &IgnoreSet::new(), 100, |n| n).unwrap();
        assert_eq!(index.keys().collect::<Vec<_>>(), vec![".bashrc"]);
    }

    #[test]
    fn test_cached_host_reads_back_written_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = |mode| CacheSettings {
            mode: Some(mode),
            path: dir.path().to_path_buf(),
            gist_list: true,
            gist_filenames: true,
            gist_content: true,
        };

        let host = FakeHost::default().with_gist("aaa", "shell", &[(".bashrc", "a\n")]);
        let writer = CachedHost::new(host, settings(CacheMode::Write));
        build_filename_index(&writer, &IgnoreSet::new(), 100, |n| n).unwrap();

        // an empty host only answers from the cache
        let reader = CachedHost::new(FakeHost::default(), settings(CacheMode::Read));
        let index = build_filename_index(&reader, &IgnoreSet::new(), 100, |n| n).unwrap();
        assert_eq!(index[".bashrc"][0].content(), b"a\n");
        assert_eq!(reader.inner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_only_cache_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings {
            mode: Some(CacheMode::Read),
            path: dir.path().join("cache"),
            gist_list: true,
            gist_filenames: true,
            gist_content: true,
        };
        let host = FakeHost::default().with_gist("aaa", "shell", &[(".bashrc", "a\n")]);
        let cached = CachedHost::new(host, settings);
        build_filename_index(&cached, &IgnoreSet::new(), 100, |n| n).unwrap();
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn test_diff_caches_verdict_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(".bashrc");
        std::fs::write(&local, "alias a=b\n").unwrap();

        let gist = Gist::parse_line(LINE).unwrap();
        let file = GistFile::new(&gist, ".bashrc", "alias a=b\n".to_string());
        let runner = CommandRunner::default();
        assert_eq!(file.diff(&local, &runner).unwrap(), DiffVerdict::Identical);

        std::fs::write(&local, "changed\n").unwrap();
        assert_eq!(file.diff(&local, &runner).unwrap(), DiffVerdict::Identical);
    }

    #[test]
    fn test_newer_side() {
        let gist = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(newer_side(gist, gist + Duration::seconds(3)), None);

        let (side, gap) = newer_side(gist, gist + Duration::days(3)).unwrap();
        assert_eq!(side, Newer::Local);
        assert_eq!(describe_gap(gap), "3 days");

        let (side, gap) = newer_side(gist, gist - Duration::minutes(90)).unwrap();
        assert_eq!(side, Newer::Gist);
        assert_eq!(describe_gap(gap), "1 hours and 30 minutes");
    }

    #[test]
    fn test_describe_small_gaps() {
        assert_eq!(describe_gap(Duration::seconds(125)), "2 minutes and 5 seconds");
        assert_eq!(describe_gap(Duration::seconds(42)), "42 seconds");
    }
}
