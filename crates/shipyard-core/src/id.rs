//! Identifiers for stacks, resources and pipeline artifacts.

use derive_more::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::{Error, Result};

static LOGICAL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").unwrap());

static STACK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap());

static ARTIFACT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

fn check(kind: &'static str, value: &str, re: &Regex, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidIdentifier {
            kind,
            value: value.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if value.len() > max_len {
        return Err(Error::InvalidIdentifier {
            kind,
            value: value.to_string(),
            reason: format!("longer than {} characters", max_len),
        });
    }
    if !re.is_match(value) {
        return Err(Error::InvalidIdentifier {
            kind,
            value: value.to_string(),
            reason: format!("must match {}", re.as_str()),
        });
    }
    Ok(())
}

/// CloudFormation logical id of a resource within a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct LogicalId(String);

impl LogicalId {
    pub const MAX_LEN: usize = 255;

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check("logical id", &value, &LOGICAL_ID_REGEX, Self::MAX_LEN)?;
        Ok(Self(value))
    }

    /// Derive the id of a resource owned by this one, e.g. a project's role.
    pub fn child(&self, suffix: &str) -> Result<Self> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique name of a stack within an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct StackId(String);

impl StackId {
    pub const MAX_LEN: usize = 128;

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check("stack id", &value, &STACK_ID_REGEX, Self::MAX_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of an artifact handed from one pipeline stage to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct ArtifactName(String);

impl ArtifactName {
    pub const MAX_LEN: usize = 100;

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check("artifact name", &value, &ARTIFACT_NAME_REGEX, Self::MAX_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_conversions {
    ($($ty:ident),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = Error;

                fn try_from(value: String) -> Result<Self> {
                    Self::new(value)
                }
            }

            impl From<$ty> for String {
                fn from(id: $ty) -> Self {
                    id.0
                }
            }

            impl std::str::FromStr for $ty {
                type Err = Error;

                fn from_str(s: &str) -> Result<Self> {
                    Self::new(s)
                }
            }
        )*
    };
}

string_conversions!(LogicalId, StackId, ArtifactName);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id_rules() {
        assert!(LogicalId::new("ArtifactBucket").is_ok());
        assert!(LogicalId::new("Bucket2").is_ok());
        assert!(LogicalId::new("").is_err());
        assert!(LogicalId::new("2Bucket").is_err());
        assert!(LogicalId::new("artifact-bucket").is_err());
        assert!(LogicalId::new("a".repeat(256)).is_err());
    }

    #[test]
    fn test_child_id() {
        let id = LogicalId::new("JavaBuildProject").unwrap();
        assert_eq!(id.child("Role").unwrap().as_str(), "JavaBuildProjectRole");
    }

    #[test]
    fn test_stack_id_allows_hyphens() {
        assert!(StackId::new("delivery-pipeline").is_ok());
        assert!(StackId::new("-delivery").is_err());
        assert!(StackId::new("delivery_pipeline").is_err());
    }

    #[test]
    fn test_artifact_name_rules() {
        assert!(ArtifactName::new("SourceOutput").is_ok());
        assert!(ArtifactName::new("build_output-1").is_ok());
        assert!(ArtifactName::new("source output").is_err());
        assert!(ArtifactName::new("").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: LogicalId = serde_json::from_str("\"DeliveryPipeline\"").unwrap();
        assert_eq!(ok.to_string(), "DeliveryPipeline");
        assert!(serde_json::from_str::<LogicalId>("\"not valid\"").is_err());
    }
}
