//! Walks a directory tree, reports git repositories that need attention and
//! local files that drifted from the user's gists.

pub mod engine;
