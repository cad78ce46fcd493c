//! Workload runner for memledger.
//!
//! This crate provides:
//! - A canned simulation workload that exercises every array family
//! - An artifact index that pins harness outputs by SHA-256 digest
//! - The `harness` CLI (`src/bin/harness.rs`)

#![forbid(unsafe_code)]

pub mod artifacts;
pub mod workload;

use thiserror::Error;

pub use artifacts::{ArtifactEntry, ArtifactIndex, sha256_hex};
pub use workload::{WorkloadOptions, WorkloadOutcome, run_workload};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Parse(#[from] memledger_core::ParseError),
    #[error(transparent)]
    Fatal(#[from] memledger_membrane::FatalError),
    #[error(transparent)]
    Access(#[from] memledger_membrane::AccessError),
    #[error("journal {path} has {count} invalid line(s)")]
    InvalidJournal { path: String, count: usize },
}
