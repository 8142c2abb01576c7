// src/core/mod.rs

// Building blocks of a sweep. `sweep` drives a whole run; `dispatch` runs
// one scanner over the domain list; everything else is shared plumbing.

pub mod bridge;
pub mod cache;
pub mod csv;
pub mod dispatch;
pub mod domains;
pub mod environment;
pub mod error;

/// Result structs produced by the built-in scanners and their findings.
pub mod models;

pub mod options;
pub mod reconcile;
pub mod remote;
pub mod run_meta;

/// The scanner contract, the registry, and the built-in scanners.
pub mod scanner;

pub mod suffix_list;
pub mod sweep;
pub mod unit;
pub mod writer;
