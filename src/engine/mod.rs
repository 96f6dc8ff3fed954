//! Core engine modules for too-many-repos.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod gist;
pub mod git;
pub mod ignore;
pub mod runner;
pub mod walker;
