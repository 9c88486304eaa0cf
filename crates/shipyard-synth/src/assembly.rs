//! Cloud assembly: the on-disk output of synthesis.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipyard_core::repository::Asset;
use shipyard_core::{App, Stack};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{SynthError, SynthResult};
use crate::template::render_template;

/// Cloud assembly schema version written to the manifest.
pub const SCHEMA_VERSION: &str = "36.0.0";

const MANIFEST_FILE: &str = "manifest.json";

/// Top-level manifest listing every artifact in the assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ManifestArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManifestArtifact {
    #[serde(rename = "aws:cloudformation:stack")]
    Stack {
        environment: String,
        properties: StackProperties,
        dependencies: Vec<String>,
    },
    #[serde(rename = "cdk:asset-manifest")]
    AssetManifest { properties: AssetManifestProperties },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackProperties {
    pub template_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetManifestProperties {
    pub file: String,
}

/// Per-stack asset manifest, keyed by asset hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub version: String,
    pub files: BTreeMap<String, FileAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAsset {
    pub source: AssetSource,
    pub destinations: BTreeMap<String, AssetDestination>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSource {
    pub path: PathBuf,
    pub packaging: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDestination {
    pub bucket_name: String,
    pub object_key: String,
}

/// A synthesized stack: its template and the assets it publishes.
#[derive(Debug, Clone)]
pub struct StackArtifact {
    pub stack_id: String,
    pub environment: String,
    pub template: Value,
    pub assets: AssetManifest,
}

impl StackArtifact {
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.stack_id)
    }

    pub fn assets_file(&self) -> String {
        format!("{}.assets.json", self.stack_id)
    }
}

/// Every stack of an app, rendered and ready to be written out.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    /// Render every stack in the app.
    pub fn synth(app: &App) -> SynthResult<Self> {
        let mut stacks = Vec::with_capacity(app.stacks().len());
        for stack in app.stacks() {
            let template = render_template(stack)?;
            stacks.push(StackArtifact {
                stack_id: stack.id.to_string(),
                environment: environment_uri(stack),
                template,
                assets: asset_manifest(stack),
            });
            debug!(stack = %stack.id, "Rendered template");
        }
        Ok(Self { stacks })
    }

    /// Assembly manifest describing the rendered stacks.
    pub fn manifest(&self) -> Manifest {
        let mut artifacts = BTreeMap::new();
        for stack in &self.stacks {
            let assets_id = format!("{}.assets", stack.stack_id);
            artifacts.insert(
                assets_id.clone(),
                ManifestArtifact::AssetManifest {
                    properties: AssetManifestProperties {
                        file: stack.assets_file(),
                    },
                },
            );
            artifacts.insert(
                stack.stack_id.clone(),
                ManifestArtifact::Stack {
                    environment: stack.environment.clone(),
                    properties: StackProperties {
                        template_file: stack.template_file(),
                    },
                    dependencies: vec![assets_id],
                },
            );
        }
        Manifest {
            version: SCHEMA_VERSION.to_string(),
            artifacts,
        }
    }

    /// Write the assembly to `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> SynthResult<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|source| SynthError::Write {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for stack in &self.stacks {
            written.push(write_json(
                &dir.join(stack.template_file()),
                &stack.template,
                "template",
            )?);
            written.push(write_json(
                &dir.join(stack.assets_file()),
                &stack.assets,
                "asset manifest",
            )?);
        }
        written.push(write_json(
            &dir.join(MANIFEST_FILE),
            &self.manifest(),
            "assembly manifest",
        )?);

        info!(
            out = %dir.display(),
            stacks = self.stacks.len(),
            files = written.len(),
            "Wrote cloud assembly"
        );
        Ok(written)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> SynthResult<PathBuf> {
    let mut body = serde_json::to_string_pretty(value).map_err(|source| SynthError::Serialize {
        what: what.to_string(),
        source,
    })?;
    body.push('\n');
    fs::write(path, body).map_err(|source| SynthError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

fn environment_uri(stack: &Stack) -> String {
    format!(
        "aws://{}/{}",
        stack
            .environment
            .account
            .as_deref()
            .unwrap_or("unknown-account"),
        stack
            .environment
            .region
            .as_deref()
            .unwrap_or("unknown-region"),
    )
}

fn asset_manifest(stack: &Stack) -> AssetManifest {
    let mut files = BTreeMap::new();
    if let Some(code) = &stack.repository.code {
        files.insert(code.asset.hash.clone(), file_asset(&code.asset, &stack.asset_bucket));
    }
    AssetManifest {
        version: SCHEMA_VERSION.to_string(),
        files,
    }
}

fn file_asset(asset: &Asset, bucket: &str) -> FileAsset {
    let mut destinations = BTreeMap::new();
    destinations.insert(
        "current_account-current_region".to_string(),
        AssetDestination {
            bucket_name: bucket.to_string(),
            object_key: asset.object_key(),
        },
    );
    FileAsset {
        source: AssetSource {
            path: asset.source_path.clone(),
            packaging: asset.packaging.to_string(),
        },
        destinations,
    }
}
