//! Git-aware file discovery.
//!
//! Uses the `ignore` crate to respect .gitignore and walk directories
//! in parallel.

mod files;

pub use files::{find_source_files, find_source_files_in};
