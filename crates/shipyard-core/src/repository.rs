//! Source repository and the packaged asset that seeds it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, LogicalId, Result};

/// How an asset is shipped to the asset bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPackaging {
    /// A ready-made archive, uploaded as is.
    File,
    /// A directory, zipped at publish time.
    ZipDirectory,
}

impl std::fmt::Display for AssetPackaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetPackaging::File => write!(f, "file"),
            AssetPackaging::ZipDirectory => write!(f, "zip"),
        }
    }
}

/// A staged local asset, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Absolute path of the file or directory on disk.
    pub source_path: PathBuf,
    pub packaging: AssetPackaging,
    /// Hex sha256 of the asset contents.
    pub hash: String,
}

impl Asset {
    /// Object key the asset is published under.
    pub fn object_key(&self) -> String {
        format!("{}.zip", self.hash)
    }
}

/// Initial contents of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCode {
    pub asset: Asset,
    /// Branch the seed is committed to.
    pub branch: String,
}

/// Managed git repository holding the project sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepository {
    pub logical_id: LogicalId,
    pub repository_name: String,
    pub description: Option<String>,
    pub code: Option<RepositoryCode>,
}

impl SourceRepository {
    pub const MAX_NAME_LEN: usize = 100;

    pub fn new(logical_id: LogicalId, repository_name: impl Into<String>) -> Result<Self> {
        let repository_name = repository_name.into();
        if repository_name.is_empty() || repository_name.len() > Self::MAX_NAME_LEN {
            return Err(Error::InvalidInput(format!(
                "repository name must be 1 to {} characters, got '{}'",
                Self::MAX_NAME_LEN,
                repository_name
            )));
        }
        if !repository_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidInput(format!(
                "repository name '{}' may only contain letters, digits, '-', '_' and '.'",
                repository_name
            )));
        }
        Ok(Self {
            logical_id,
            repository_name,
            description: None,
            code: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Seed the repository from a staged asset.
    pub fn with_code(mut self, asset: Asset, branch: impl Into<String>) -> Self {
        self.code = Some(RepositoryCode {
            asset,
            branch: branch.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    #[test]
    fn test_repository_name_validation() {
        assert!(SourceRepository::new(id("Repo"), "java-project").is_ok());
        assert!(SourceRepository::new(id("Repo"), "java.project_2").is_ok());
        assert!(SourceRepository::new(id("Repo"), "").is_err());
        assert!(SourceRepository::new(id("Repo"), "java project").is_err());
        assert!(SourceRepository::new(id("Repo"), "x".repeat(101)).is_err());
    }

    #[test]
    fn test_asset_object_key() {
        let asset = Asset {
            source_path: PathBuf::from("/tmp/java-project.zip"),
            packaging: AssetPackaging::File,
            hash: "abc123".to_string(),
        };
        assert_eq!(asset.object_key(), "abc123.zip");

        let repo = SourceRepository::new(id("Repo"), "java-project")
            .unwrap()
            .with_code(asset, "main");
        assert_eq!(repo.code.unwrap().branch, "main");
    }
}
