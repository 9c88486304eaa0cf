//! Stack configuration parsing.

use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use shipyard_core::artifact::{BucketEncryption, RemovalPolicy};
use shipyard_core::iam::ServicePrincipal;
use shipyard_core::project::{BuildImage, BuildProject, ComputeType};
use shipyard_core::{ArtifactName, LogicalId, StackId};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration written by `shipyard init`; parses to [`StackConfig::default`].
pub const DEFAULT_CONFIG: &str = r#"// Shipyard delivery stack
stack "SoftwareDeliveryPipelineStack"

bucket "ArtifactBucket" versioned=#false removal-policy="retain"

repository "JavaProjectRepo" {
    name "java-project"
    seed "finalProject/SoftwareDeliveryPipeline/java-project.zip"
    branch "main"
}

build "JavaBuildProject" {
    buildspec "buildspec.yml"
    image "aws/codebuild/standard:5.0"
    compute "small"
    timeout-minutes 60
    artifacts include-build-id=#true package-zip=#true
}

role "CodePipelineServiceRole" {
    principal "codepipeline.amazonaws.com"
}

pipeline "DeliveryPipeline" {
    name "JavaProjectPipeline"

    stage "Source" {
        action "CodeCommit" type="codecommit" output="SourceOutput"
    }

    stage "Build" {
        action "CodeBuild" type="codebuild" input="SourceOutput" output="BuildOutput"
    }
}
"#;

/// A complete delivery stack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackSection,
    pub bucket: BucketConfig,
    pub repository: RepositoryConfig,
    pub build: BuildConfig,
    pub role: RoleConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSection {
    pub id: StackId,
    pub description: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    /// Overrides the default asset bucket name.
    pub asset_bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub logical_id: LogicalId,
    pub versioned: bool,
    pub encryption: BucketEncryption,
    pub removal_policy: RemovalPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub logical_id: LogicalId,
    pub name: String,
    pub description: Option<String>,
    /// Archive or directory holding the initial contents.
    pub seed: PathBuf,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub logical_id: LogicalId,
    pub buildspec: String,
    /// Build commands given in place, replacing the source file.
    pub inline_buildspec: Option<serde_json::Value>,
    pub image: String,
    pub compute: ComputeType,
    pub privileged: bool,
    pub timeout_minutes: u32,
    pub include_build_id: bool,
    pub package_zip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub logical_id: LogicalId,
    pub principal: String,
    pub managed_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub logical_id: LogicalId,
    pub name: Option<String>,
    pub restart_on_update: bool,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    CodeCommit,
    CodeBuild,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    pub action_type: ActionType,
    /// Source actions only; defaults to the repository branch.
    pub branch: Option<String>,
    pub input: Option<ArtifactName>,
    pub outputs: Vec<ArtifactName>,
}

// Every literal below is a valid identifier.
fn fixed<T: std::str::FromStr>(s: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    s.parse().expect("valid built-in identifier")
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack: StackSection {
                id: fixed("SoftwareDeliveryPipelineStack"),
                description: None,
                account: None,
                region: None,
                asset_bucket: None,
            },
            bucket: BucketConfig {
                logical_id: fixed("ArtifactBucket"),
                versioned: false,
                encryption: BucketEncryption::S3Managed,
                removal_policy: RemovalPolicy::Retain,
            },
            repository: RepositoryConfig {
                logical_id: fixed("JavaProjectRepo"),
                name: "java-project".to_string(),
                description: None,
                seed: PathBuf::from("finalProject/SoftwareDeliveryPipeline/java-project.zip"),
                branch: "main".to_string(),
            },
            build: BuildConfig {
                logical_id: fixed("JavaBuildProject"),
                buildspec: "buildspec.yml".to_string(),
                inline_buildspec: None,
                image: BuildImage::STANDARD_5_0.to_string(),
                compute: ComputeType::Small,
                privileged: false,
                timeout_minutes: BuildProject::DEFAULT_TIMEOUT_MINUTES,
                include_build_id: true,
                package_zip: true,
            },
            role: RoleConfig {
                logical_id: fixed("CodePipelineServiceRole"),
                principal: ServicePrincipal::CODEPIPELINE.to_string(),
                managed_policies: Vec::new(),
            },
            pipeline: PipelineConfig {
                logical_id: fixed("DeliveryPipeline"),
                name: Some("JavaProjectPipeline".to_string()),
                restart_on_update: false,
                stages: vec![
                    StageConfig {
                        name: "Source".to_string(),
                        actions: vec![ActionConfig {
                            name: "CodeCommit".to_string(),
                            action_type: ActionType::CodeCommit,
                            branch: None,
                            input: None,
                            outputs: vec![fixed("SourceOutput")],
                        }],
                    },
                    StageConfig {
                        name: "Build".to_string(),
                        actions: vec![ActionConfig {
                            name: "CodeBuild".to_string(),
                            action_type: ActionType::CodeBuild,
                            branch: None,
                            input: Some(fixed("SourceOutput")),
                            outputs: vec![fixed("BuildOutput")],
                        }],
                    },
                ],
            },
        }
    }
}

/// Read a configuration file. A relative seed path is resolved against the
/// file's directory.
pub fn load_stack_config(path: &Path) -> ConfigResult<StackConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_stack_config(&content)?;

    if config.repository.seed.is_relative() {
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        config.repository.seed = base.join(&config.repository.seed);
    }
    debug!(path = %path.display(), seed = %config.repository.seed.display(), "Loaded stack config");
    Ok(config)
}

/// Parse a stack configuration from KDL text, interpolating `${env.*}` from
/// the process environment.
pub fn parse_stack_config(kdl: &str) -> ConfigResult<StackConfig> {
    parse_stack_config_with(kdl, VariableContext::from_env())
}

/// Parse a stack configuration from KDL text with an explicit variable context.
pub fn parse_stack_config_with(kdl: &str, mut ctx: VariableContext) -> ConfigResult<StackConfig> {
    let doc: KdlDocument = kdl.parse()?;

    // The stack node feeds the variable context, so it is read first.
    let mut stack_nodes = doc.nodes().iter().filter(|n| n.name().value() == "stack");
    let stack_node = stack_nodes
        .next()
        .ok_or_else(|| ConfigError::MissingField("stack".to_string()))?;
    if stack_nodes.next().is_some() {
        return Err(ConfigError::Duplicate("stack".to_string()));
    }
    let stack = parse_stack_section(stack_node, &mut ctx)?;

    let mut bucket = None;
    let mut repository = None;
    let mut build = None;
    let mut role = None;
    let mut pipeline = None;

    for node in doc.nodes() {
        match node.name().value() {
            "bucket" => set_once(&mut bucket, "bucket", parse_bucket(node)?)?,
            "repository" => {
                set_once(&mut repository, "repository", parse_repository(node, &ctx)?)?
            }
            "build" => set_once(&mut build, "build", parse_build(node, &ctx)?)?,
            "role" => set_once(&mut role, "role", parse_role(node, &ctx)?)?,
            "pipeline" => set_once(&mut pipeline, "pipeline", parse_pipeline(node, &ctx)?)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(StackConfig {
        stack,
        bucket: bucket.ok_or_else(|| ConfigError::MissingField("bucket".to_string()))?,
        repository: repository
            .ok_or_else(|| ConfigError::MissingField("repository".to_string()))?,
        build: build.ok_or_else(|| ConfigError::MissingField("build".to_string()))?,
        role: role.ok_or_else(|| ConfigError::MissingField("role".to_string()))?,
        pipeline: pipeline.ok_or_else(|| ConfigError::MissingField("pipeline".to_string()))?,
    })
}

fn set_once<T>(slot: &mut Option<T>, section: &str, value: T) -> ConfigResult<()> {
    if slot.is_some() {
        return Err(ConfigError::Duplicate(section.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_stack_section(node: &KdlNode, ctx: &mut VariableContext) -> ConfigResult<StackSection> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stack name".to_string()))?;
    let id = StackId::new(id)?;

    ctx.stack.name = id.to_string();

    let mut description = None;
    let mut asset_bucket = None;

    if let Some(children) = node.children() {
        // env first: other values may refer to ${aws.*}
        for child in children.nodes().iter().filter(|c| c.name().value() == "env") {
            if let Some(account) = get_string_prop(child, "account") {
                ctx.aws.account = Some(ctx.interpolate(&account));
            }
            if let Some(region) = get_string_prop(child, "region") {
                ctx.aws.region = Some(ctx.interpolate(&region));
            }
        }
        for child in children.nodes() {
            match child.name().value() {
                "description" => {
                    description = get_first_string_arg(child).map(|s| ctx.interpolate(&s))
                }
                "asset-bucket" => {
                    if let Some(value) = get_first_string_arg(child) {
                        let value = ctx.interpolate(&value);
                        let unresolved = ctx.unresolved(&value);
                        if !unresolved.is_empty() {
                            return Err(ConfigError::InvalidValue {
                                field: "asset-bucket".to_string(),
                                message: format!(
                                    "unresolved variables: {}",
                                    unresolved.join(", ")
                                ),
                            });
                        }
                        asset_bucket = Some(value);
                    }
                }
                _ => {}
            }
        }
    }

    Ok(StackSection {
        id,
        description,
        account: ctx.aws.account.clone(),
        region: ctx.aws.region.clone(),
        asset_bucket,
    })
}

fn parse_bucket(node: &KdlNode) -> ConfigResult<BucketConfig> {
    let logical_id = section_id(node, "bucket")?;
    let versioned = get_bool_prop(node, "versioned").unwrap_or(false);
    let encryption = match get_string_prop(node, "encryption").as_deref() {
        None | Some("s3") => BucketEncryption::S3Managed,
        Some("kms") => BucketEncryption::KmsManaged,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "encryption".to_string(),
                message: format!("expected 's3' or 'kms', got '{}'", other),
            });
        }
    };
    let removal_policy = match get_string_prop(node, "removal-policy").as_deref() {
        None | Some("retain") => RemovalPolicy::Retain,
        Some("delete") => RemovalPolicy::Delete,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "removal-policy".to_string(),
                message: format!("expected 'retain' or 'delete', got '{}'", other),
            });
        }
    };

    Ok(BucketConfig {
        logical_id,
        versioned,
        encryption,
        removal_policy,
    })
}

fn parse_repository(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<RepositoryConfig> {
    let logical_id = section_id(node, "repository")?;

    let mut name = None;
    let mut description = None;
    let mut seed = None;
    let mut branch = "main".to_string();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = get_first_string_arg(child).map(|s| ctx.interpolate(&s));
            match child.name().value() {
                "name" => name = value,
                "description" => description = value,
                "seed" => seed = value,
                "branch" => {
                    if let Some(b) = value {
                        branch = b;
                    }
                }
                _ => {}
            }
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("name for repository '{}'", logical_id)))?;
    let seed = seed
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("seed for repository '{}'", logical_id)))?;
    if branch.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "branch".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    Ok(RepositoryConfig {
        logical_id,
        name,
        description,
        seed: PathBuf::from(seed),
        branch,
    })
}

fn parse_build(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<BuildConfig> {
    let logical_id = section_id(node, "build")?;

    let mut buildspec = "buildspec.yml".to_string();
    let mut inline_buildspec = None;
    let mut image = BuildImage::STANDARD_5_0.to_string();
    let mut compute = ComputeType::default();
    let mut privileged = false;
    let mut timeout_minutes = BuildProject::DEFAULT_TIMEOUT_MINUTES;
    let mut include_build_id = true;
    let mut package_zip = true;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "buildspec" => {
                    if let Some(s) = get_first_string_arg(child) {
                        buildspec = ctx.interpolate(&s);
                    }
                }
                "buildspec-inline" => {
                    let text = get_first_string_arg(child).unwrap_or_default();
                    let document = serde_json::from_str(&text).map_err(|e| {
                        ConfigError::InvalidValue {
                            field: "buildspec-inline".to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    inline_buildspec = Some(document);
                }
                "image" => {
                    if let Some(s) = get_first_string_arg(child) {
                        image = ctx.interpolate(&s);
                    }
                }
                "compute" => {
                    let value = get_first_string_arg(child).unwrap_or_default();
                    compute = value.parse().map_err(|message| ConfigError::InvalidValue {
                        field: "compute".to_string(),
                        message,
                    })?;
                }
                "privileged" => {
                    privileged = get_first_bool_arg(child).unwrap_or(false);
                }
                "timeout-minutes" => {
                    let value = get_first_integer_arg(child).ok_or_else(|| {
                        ConfigError::MissingField("timeout-minutes value".to_string())
                    })?;
                    timeout_minutes =
                        u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
                            field: "timeout-minutes".to_string(),
                            message: format!("{} is out of range", value),
                        })?;
                }
                "artifacts" => {
                    include_build_id = get_bool_prop(child, "include-build-id").unwrap_or(true);
                    package_zip = get_bool_prop(child, "package-zip").unwrap_or(true);
                }
                _ => {}
            }
        }
    }

    Ok(BuildConfig {
        logical_id,
        buildspec,
        inline_buildspec,
        image,
        compute,
        privileged,
        timeout_minutes,
        include_build_id,
        package_zip,
    })
}

fn parse_role(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<RoleConfig> {
    let logical_id = section_id(node, "role")?;

    let mut principal = ServicePrincipal::CODEPIPELINE.to_string();
    let mut managed_policies = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "principal" => {
                    if let Some(p) = get_first_string_arg(child) {
                        principal = ctx.interpolate(&p);
                    }
                }
                "managed-policy" => {
                    managed_policies.extend(get_all_string_args(child));
                }
                _ => {}
            }
        }
    }

    Ok(RoleConfig {
        logical_id,
        principal,
        managed_policies,
    })
}

fn parse_pipeline(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<PipelineConfig> {
    let logical_id = section_id(node, "pipeline")?;
    let restart_on_update = get_bool_prop(node, "restart-on-update").unwrap_or(false);

    let mut name = None;
    let mut stages = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => name = get_first_string_arg(child).map(|s| ctx.interpolate(&s)),
                "stage" => stages.push(parse_stage(child, ctx)?),
                _ => {}
            }
        }
    }

    Ok(PipelineConfig {
        logical_id,
        name,
        restart_on_update,
        stages,
    })
}

fn parse_stage(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<StageConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stage name".to_string()))?;

    let mut actions = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "action" {
                actions.push(parse_action(child, ctx)?);
            }
        }
    }

    Ok(StageConfig { name, actions })
}

fn parse_action(node: &KdlNode, ctx: &VariableContext) -> ConfigResult<ActionConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("action name".to_string()))?;

    let action_type = match get_string_prop(node, "type").as_deref() {
        Some("codecommit") => ActionType::CodeCommit,
        Some("codebuild") => ActionType::CodeBuild,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "action type".to_string(),
                message: format!("unknown action type: {}", other),
            });
        }
        None => {
            return Err(ConfigError::MissingField(format!(
                "type for action '{}'",
                name
            )));
        }
    };

    let branch = get_string_prop(node, "branch").map(|s| ctx.interpolate(&s));
    let input = get_string_prop(node, "input")
        .map(ArtifactName::new)
        .transpose()?;
    let outputs = get_string_list_prop(node, "output")
        .into_iter()
        .map(ArtifactName::new)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ActionConfig {
        name,
        action_type,
        branch,
        input,
        outputs,
    })
}

fn section_id(node: &KdlNode, section: &str) -> ConfigResult<LogicalId> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} id", section)))?;
    Ok(LogicalId::new(id)?)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    // Repeated properties (output="a" output="b") all count.
    node.entries()
        .iter()
        .filter(|e| e.name().is_some_and(|n| n.value() == name))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}
