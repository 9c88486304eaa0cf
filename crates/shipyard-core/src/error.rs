//! Error types for Shipyard.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    #[error("build spec '{spec}' not found in {}", .root.display())]
    BuildSpecNotFound { spec: String, root: PathBuf },

    #[error("invalid build spec: {0}")]
    InvalidBuildSpec(String),

    #[error("overly broad grant: {0}")]
    OverlyBroadGrant(String),

    #[error("cycle detected in resource graph: {0}")]
    CycleDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
