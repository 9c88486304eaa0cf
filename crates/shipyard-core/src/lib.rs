//! Core resource types for Shipyard.
//!
//! This crate contains:
//! - Identifiers for stacks, resources and artifacts
//! - Resource descriptors (bucket, repository, build project, roles)
//! - The delivery pipeline model and its validation
//! - Stacks, their resource graph and the app scope

pub mod artifact;
pub mod error;
pub mod iam;
pub mod id;
pub mod pipeline;
pub mod project;
pub mod repository;
pub mod stack;

pub use error::{Error, Result};
pub use id::{ArtifactName, LogicalId, StackId};
pub use stack::{App, Stack};
