//! Drift-tolerant comment anchors for source files.
//!
//! Comments live in `<file>.comments` next to their source and are placed by
//! ghost markers: a symbol path plus offset, a content hash, and a three-line
//! fingerprint. Reconciliation re-finds each marker after the code changes.

pub mod buffer;
pub mod cache;
pub mod clock;
pub mod commands;
pub mod comments;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod grammar;
pub mod hasher;
pub mod orphans;
pub mod outline;
pub mod reconcile;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod symbols;
pub mod types;
pub mod watch;
