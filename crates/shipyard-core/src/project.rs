//! Build project definitions.
//!
//! A build project turns the contents of a source repository into build
//! artifacts, using a build spec and a managed build image.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::artifact::ArtifactBucket;
use crate::repository::SourceRepository;
use crate::{Error, LogicalId, Result};

/// Commands the build runner executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSpec {
    /// A file resolved relative to the repository root at build time.
    FromSourceFilename(String),
    /// A build spec document embedded in the project definition.
    Inline(serde_json::Value),
}

impl BuildSpec {
    /// Reference a build spec file inside the repository.
    pub fn from_source_filename(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidBuildSpec(
                "build spec filename must not be empty".to_string(),
            ));
        }
        let path = Path::new(&name);
        if path.is_absolute() {
            return Err(Error::InvalidBuildSpec(format!(
                "'{}' must be relative to the repository root",
                name
            )));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(Error::InvalidBuildSpec(format!(
                "'{}' escapes the repository root",
                name
            )));
        }
        Ok(BuildSpec::FromSourceFilename(name))
    }

    pub fn inline(document: serde_json::Value) -> Self {
        BuildSpec::Inline(document)
    }

    /// The file name to look for in the source, if any.
    pub fn filename(&self) -> Option<&str> {
        match self {
            BuildSpec::FromSourceFilename(name) => Some(name),
            BuildSpec::Inline(_) => None,
        }
    }
}

/// Managed build image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildImage(String);

impl BuildImage {
    pub const STANDARD_5_0: &'static str = "aws/codebuild/standard:5.0";

    pub fn new(image: impl Into<String>) -> Result<Self> {
        let image = image.into();
        if image.trim().is_empty() {
            return Err(Error::InvalidInput("build image must not be empty".to_string()));
        }
        Ok(Self(image))
    }

    pub fn standard_5_0() -> Self {
        Self(Self::STANDARD_5_0.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BuildImage {
    fn default() -> Self {
        Self::standard_5_0()
    }
}

/// Size of the build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeType {
    #[default]
    Small,
    Medium,
    Large,
}

impl ComputeType {
    pub fn as_cfn(&self) -> &'static str {
        match self {
            ComputeType::Small => "BUILD_GENERAL1_SMALL",
            ComputeType::Medium => "BUILD_GENERAL1_MEDIUM",
            ComputeType::Large => "BUILD_GENERAL1_LARGE",
        }
    }
}

impl std::fmt::Display for ComputeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeType::Small => write!(f, "small"),
            ComputeType::Medium => write!(f, "medium"),
            ComputeType::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for ComputeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" | "build_general1_small" => Ok(ComputeType::Small),
            "medium" | "build_general1_medium" => Ok(ComputeType::Medium),
            "large" | "build_general1_large" => Ok(ComputeType::Large),
            _ => Err(format!("Unknown compute type: {}", s)),
        }
    }
}

/// Environment the build runs in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub image: BuildImage,
    pub compute_type: ComputeType,
    /// Needed only for docker-in-docker builds.
    pub privileged: bool,
}

/// Where build output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildArtifacts {
    S3 {
        bucket: LogicalId,
        /// Nest output under the build id.
        include_build_id: bool,
        /// Zip the output instead of uploading loose files.
        package_zip: bool,
    },
}

impl BuildArtifacts {
    pub fn bucket(&self) -> &LogicalId {
        match self {
            BuildArtifacts::S3 { bucket, .. } => bucket,
        }
    }
}

/// A managed build project reading from a source repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildProject {
    pub logical_id: LogicalId,
    /// Repository the project checks out.
    pub source_repository: LogicalId,
    pub build_spec: BuildSpec,
    pub environment: BuildEnvironment,
    pub artifacts: BuildArtifacts,
    pub timeout_minutes: u32,
    /// Execution role owned by the project.
    pub role: LogicalId,
}

impl BuildProject {
    pub const DEFAULT_TIMEOUT_MINUTES: u32 = 60;

    pub fn builder(logical_id: LogicalId) -> BuildProjectBuilder {
        BuildProjectBuilder {
            logical_id,
            source: None,
            build_spec: None,
            environment: BuildEnvironment::default(),
            bucket: None,
            include_build_id: true,
            package_zip: true,
            timeout_minutes: Self::DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

/// Builder for [`BuildProject`]. The source repository, build spec and artifact
/// bucket are required.
#[derive(Debug)]
pub struct BuildProjectBuilder {
    logical_id: LogicalId,
    source: Option<LogicalId>,
    build_spec: Option<BuildSpec>,
    environment: BuildEnvironment,
    bucket: Option<LogicalId>,
    include_build_id: bool,
    package_zip: bool,
    timeout_minutes: u32,
}

impl BuildProjectBuilder {
    pub fn source(mut self, repository: &SourceRepository) -> Self {
        self.source = Some(repository.logical_id.clone());
        self
    }

    pub fn build_spec(mut self, spec: BuildSpec) -> Self {
        self.build_spec = Some(spec);
        self
    }

    pub fn environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn artifact_bucket(mut self, bucket: &ArtifactBucket) -> Self {
        self.bucket = Some(bucket.logical_id.clone());
        self
    }

    pub fn include_build_id(mut self, include: bool) -> Self {
        self.include_build_id = include;
        self
    }

    pub fn package_zip(mut self, zip: bool) -> Self {
        self.package_zip = zip;
        self
    }

    pub fn timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    pub fn build(self) -> Result<BuildProject> {
        let source = self.source.ok_or_else(|| {
            Error::MissingDependency(format!(
                "build project '{}' has no source repository",
                self.logical_id
            ))
        })?;
        let bucket = self.bucket.ok_or_else(|| {
            Error::MissingDependency(format!(
                "build project '{}' has no artifact bucket",
                self.logical_id
            ))
        })?;
        let build_spec = self.build_spec.ok_or_else(|| {
            Error::InvalidBuildSpec(format!(
                "build project '{}' has no build spec",
                self.logical_id
            ))
        })?;
        if !(5..=480).contains(&self.timeout_minutes) {
            return Err(Error::InvalidInput(format!(
                "build timeout must be between 5 and 480 minutes, got {}",
                self.timeout_minutes
            )));
        }
        let role = self.logical_id.child("Role")?;

        Ok(BuildProject {
            logical_id: self.logical_id,
            source_repository: source,
            build_spec,
            environment: self.environment,
            artifacts: BuildArtifacts::S3 {
                bucket,
                include_build_id: self.include_build_id,
                package_zip: self.package_zip,
            },
            timeout_minutes: self.timeout_minutes,
            role,
        })
    }
}
