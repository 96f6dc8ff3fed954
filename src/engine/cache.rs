//! Gist cache: one JSON blob per `gh` response in the cache directory.
//!
//! Blobs are read and written regardless of cache mode; gating by mode
//! happens in `gist::CachedHost`.

use super::error::{Result, TmrError};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct GistCache {
    dir: PathBuf,
}

impl GistCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn gist_list(&self) -> Option<Vec<String>> {
        self.load("gh_gist_list")
    }

    /// # Errors
    /// Returns `Io` if the blob cannot be written.
    pub fn set_gist_list(&self, lines: &[String]) -> Result<()> {
        self.store("gh_gist_list", lines)
    }

    #[must_use]
    pub fn gist_filenames(&self, gist_id: &str) -> Option<Vec<String>> {
        self.load(&format!("gh_gist_{gist_id}_files"))
    }

    /// # Errors
    /// Returns `Io` if the blob cannot be written.
    pub fn set_gist_filenames(&self, gist_id: &str, names: &[String]) -> Result<()> {
        self.store(&format!("gh_gist_{gist_id}_files"), names)
    }

    #[must_use]
    pub fn gist_file_content(&self, gist_id: &str, file_name: &str) -> Option<String> {
        self.load(&format!("gh_gist_{gist_id}_{file_name}"))
    }

    /// # Errors
    /// Returns `Io` if the blob cannot be written.
    pub fn set_gist_file_content(&self, gist_id: &str, file_name: &str, content: &str) -> Result<()> {
        self.store(&format!("gh_gist_{gist_id}_{file_name}"), content)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        // file names may contain separators
        let key = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{key}.json"))
    }

    /// Missing or unreadable blobs are misses.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.blob_path(key);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => {
                trace!("cache hit: {}", path.display());
                Some(value)
            }
            Err(e) => {
                debug!("ignoring corrupt cache blob {}: {e}", path.display());
                None
            }
        }
    }

    fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TmrError::Io { path, source }
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.blob_path(key);
        let json = serde_json::to_string(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .map_err(io_err(&path))?;
        std::fs::write(&path, json).map_err(io_err(&path))?;
        trace!("cached {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GistCache::new(dir.path().join("nested"));

        assert!(cache.gist_list().is_none());
        let lines = vec!["abc\tdesc\t1 file\tsecret\t2024-01-01T00:00:00Z".to_string()];
        cache.set_gist_list(&lines).unwrap();
        assert_eq!(cache.gist_list(), Some(lines));

        cache.set_gist_filenames("abc", &[".bashrc".to_string()]).unwrap();
        assert_eq!(cache.gist_filenames("abc"), Some(vec![".bashrc".to_string()]));
        assert!(cache.gist_filenames("other").is_none());

        cache.set_gist_file_content("abc", ".bashrc", "alias ll='ls -l'\n").unwrap();
        assert_eq!(
            cache.gist_file_content("abc", ".bashrc").as_deref(),
            Some("alias ll='ls -l'\n")
        );
    }

    #[test]
    fn test_corrupt_blob_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gh_gist_list.json"), "{not json").unwrap();
        let cache = GistCache::new(dir.path());
        assert!(cache.gist_list().is_none());
    }
}
