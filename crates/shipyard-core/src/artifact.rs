//! Artifact storage bucket.

use serde::{Deserialize, Serialize};

use crate::LogicalId;

/// Server-side encryption applied to stored artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketEncryption {
    #[default]
    S3Managed,
    KmsManaged,
}

impl BucketEncryption {
    pub fn sse_algorithm(&self) -> &'static str {
        match self {
            BucketEncryption::S3Managed => "AES256",
            BucketEncryption::KmsManaged => "aws:kms",
        }
    }
}

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    #[default]
    Retain,
    Delete,
}

impl std::fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalPolicy::Retain => write!(f, "Retain"),
            RemovalPolicy::Delete => write!(f, "Delete"),
        }
    }
}

/// Durable object storage shared by the build project and the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBucket {
    pub logical_id: LogicalId,
    /// Keep prior object versions.
    pub versioned: bool,
    pub encryption: BucketEncryption,
    /// Block every form of public access.
    pub block_public_access: bool,
    pub removal_policy: RemovalPolicy,
}

impl ArtifactBucket {
    pub fn new(logical_id: LogicalId) -> Self {
        Self {
            logical_id,
            versioned: false,
            encryption: BucketEncryption::default(),
            block_public_access: true,
            removal_policy: RemovalPolicy::default(),
        }
    }

    pub fn versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    pub fn encryption(mut self, encryption: BucketEncryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }
}
