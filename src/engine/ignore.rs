//! Exclusion Matcher: decides whether a path or gist identifier is skipped.
//!
//! Rules come from `.tmrignore` files (one per line, `#` comments, `!`
//! overrides) and from `--exclude` flags. A rule is either a literal,
//! matched with path-aware semantics, or a regex, matched by unanchored
//! search.

use super::error::{Result, TmrError};
use log::{debug, warn};
use fancy_regex::Regex;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::Path;

/// Name of the ignore dotfile looked up in `$HOME` and in the scanned directory.
pub const IGNORE_FILE: &str = ".tmrignore";

/// Characters that rarely appear in a bare path but are everywhere in regexes.
/// Space is included so gist descriptions can be matched without `\s`.
const REGEX_CHARS: &[char] = &[
    '*', '^', '$', '[', ']', '?', '+', '<', '>', '(', ')', '{', '}', '\\', '|', ' ',
];

/// Returns true if `value` should be compiled as a regex rather than kept literal.
#[must_use]
pub fn is_regexlike(value: &str) -> bool {
    value.contains(REGEX_CHARS)
}

/// Strips comments and whitespace from a raw ignore-file line.
///
/// Returns `None` for blank lines and whole-line comments.
#[must_use]
pub fn strip_comment(raw: &str) -> Option<&str> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.split('#').next().unwrap_or_default().trim();
    (!line.is_empty()).then_some(line)
}

/// A single exclusion rule.
#[derive(Debug, Clone)]
pub enum Ignorable {
    Literal(String),
    /// `source` is the rule as written; `regex` is compiled with `(?s)`.
    Pattern { source: String, regex: Regex },
}

impl Ignorable {
    /// Normalizes a rule string into a literal or a compiled pattern.
    ///
    /// # Errors
    /// Returns `InvalidPattern` if the value looks like a regex but does not compile.
    pub fn new(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if is_regexlike(value) {
            let regex = Regex::new(&format!("(?s){value}")).map_err(|source| {
                TmrError::InvalidPattern {
                    pattern: value.to_string(),
                    source: Box::new(source),
                }
            })?;
            return Ok(Self::Pattern {
                source: value.to_string(),
                regex,
            });
        }

        let literal = value.trim_end_matches('/');
        if literal.is_empty() {
            // a bare "/" stays as the root
            return Ok(Self::Literal(value.to_string()));
        }
        Ok(Self::Literal(literal.to_string()))
    }

    /// The normalized source of the rule.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(literal) => literal,
            Self::Pattern { source, .. } => source,
        }
    }

    #[must_use]
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern { .. })
    }

    /// Tests this rule against the string form of a path or identifier.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Pattern { source, regex } => regex.is_match(candidate).unwrap_or_else(|e| {
                // backtracking limit hit; treat as no match
                warn!("ignore pattern /{source}/ failed on {candidate:?}: {e}");
                false
            }),
            Self::Literal(literal) => literal_matches(literal, candidate),
        }
    }
}

fn literal_matches(rule: &str, candidate: &str) -> bool {
    // gist ids and file names are single tokens
    if rule == candidate {
        return true;
    }

    let rule_path = Path::new(rule);
    if rule_path.is_absolute() {
        return candidate.starts_with(rule);
    }
    if rule_path.components().count() > 1 {
        return candidate.contains(rule);
    }

    let name = OsStr::new(rule);
    Path::new(candidate)
        .components()
        .any(|component| component.as_os_str() == name)
}

impl PartialEq for Ignorable {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Ignorable {}

impl Hash for Ignorable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Ignorable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::Pattern { source, .. } => write!(f, "/{source}/"),
        }
    }
}

/// Inclusion rules plus `!`-prefixed overrides.
///
/// Built once before the main loop and only read afterwards, so it can be
/// shared across worker threads by reference.
#[derive(Debug, Default, Clone)]
pub struct IgnoreSet {
    ignored: HashSet<Ignorable>,
    overrides: HashSet<Ignorable>,
}

impl IgnoreSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one raw rule line. Comments and blank lines are skipped.
    ///
    /// # Errors
    /// Returns `InvalidPattern` for a regex-like rule that does not compile.
    pub fn add(&mut self, raw: &str) -> Result<()> {
        let Some(line) = strip_comment(raw) else {
            return Ok(());
        };

        if let Some(negated) = line.strip_prefix('!') {
            if negated.trim().is_empty() {
                return Ok(());
            }
            self.overrides.insert(Ignorable::new(negated)?);
        } else {
            self.ignored.insert(Ignorable::new(line)?);
        }
        Ok(())
    }

    /// Adds every line of `lines`.
    ///
    /// # Errors
    /// Stops at the first rule that fails to compile.
    pub fn update<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.add(line.as_ref())?;
        }
        Ok(())
    }

    /// Merges the rules of an ignore file.
    ///
    /// Returns `Ok(false)` if the file does not exist or cannot be read;
    /// neither case is fatal.
    ///
    /// # Errors
    /// Returns `InvalidPattern` if a rule in the file fails to compile.
    pub fn load_file(&mut self, path: &Path) -> Result<bool> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{}: not found", path.display());
                return Ok(false);
            }
            Err(e) => {
                warn!("{}: {e}", path.display());
                return Ok(false);
            }
        };

        self.update(text.lines())?;
        debug!("found {}", path.display());
        Ok(true)
    }

    /// Overrides win unconditionally; otherwise any inclusion rule excludes.
    #[must_use]
    pub fn is_ignored(&self, candidate: &str) -> bool {
        if self.overrides.iter().any(|rule| rule.matches(candidate)) {
            return false;
        }
        self.ignored.iter().any(|rule| rule.matches(candidate))
    }

    #[must_use]
    pub fn is_path_ignored(&self, path: &Path) -> bool {
        self.is_ignored(&path.to_string_lossy())
    }

    /// Inclusion rules, sorted for display.
    #[must_use]
    pub fn rules(&self) -> Vec<&Ignorable> {
        sorted(&self.ignored)
    }

    /// Override rules, sorted for display.
    #[must_use]
    pub fn overrides(&self) -> Vec<&Ignorable> {
        sorted(&self.overrides)
    }

    /// True when some `!` rule could rescue a path below an excluded one.
    #[must_use]
    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ignored.len() + self.overrides.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty() && self.overrides.is_empty()
    }
}

fn sorted(rules: &HashSet<Ignorable>) -> Vec<&Ignorable> {
    let mut rules: Vec<_> = rules.iter().collect();
    rules.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    rules
}
