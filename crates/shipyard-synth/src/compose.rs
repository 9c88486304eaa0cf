//! Stack composition: turn a configuration into a wired [`Stack`].

use shipyard_config::{ActionType, StackConfig};
use shipyard_core::artifact::ArtifactBucket;
use shipyard_core::iam::{ServicePrincipal, ServiceRole};
use shipyard_core::pipeline::{Action, Pipeline, Stage};
use shipyard_core::project::{BuildEnvironment, BuildImage, BuildProject, BuildSpec};
use shipyard_core::repository::SourceRepository;
use shipyard_core::stack::StackEnvironment;
use shipyard_core::{Error, Result, Stack};
use tracing::{debug, info};

use crate::asset::{contains_file, stage_asset};

/// Define the delivery stack described by `config`.
///
/// Either every resource is declared and wired, or an error is returned and
/// nothing is produced. The seed asset is staged before any resource is built.
pub fn define_stack(config: &StackConfig) -> Result<Stack> {
    info!(stack = %config.stack.id, "Defining stack");

    let asset = stage_asset(&config.repository.seed)?;

    let build_spec = match &config.build.inline_buildspec {
        Some(document) => BuildSpec::inline(document.clone()),
        None => BuildSpec::from_source_filename(config.build.buildspec.as_str())?,
    };
    if let Some(name) = build_spec.filename() {
        match contains_file(&asset, name) {
            Some(true) => {}
            Some(false) => {
                return Err(Error::BuildSpecNotFound {
                    spec: name.to_string(),
                    root: asset.source_path.clone(),
                });
            }
            None => {
                debug!(
                    spec = name,
                    seed = %asset.source_path.display(),
                    "Seed is an archive; build spec is checked at build time"
                );
            }
        }
    }

    let bucket = ArtifactBucket::new(config.bucket.logical_id.clone())
        .versioned(config.bucket.versioned)
        .encryption(config.bucket.encryption)
        .removal_policy(config.bucket.removal_policy);

    let mut repository =
        SourceRepository::new(config.repository.logical_id.clone(), &config.repository.name)?
            .with_code(asset, &config.repository.branch);
    if let Some(description) = &config.repository.description {
        repository = repository.with_description(description);
    }

    let project = BuildProject::builder(config.build.logical_id.clone())
        .source(&repository)
        .artifact_bucket(&bucket)
        .build_spec(build_spec)
        .environment(BuildEnvironment {
            image: BuildImage::new(&config.build.image)?,
            compute_type: config.build.compute,
            privileged: config.build.privileged,
        })
        .include_build_id(config.build.include_build_id)
        .package_zip(config.build.package_zip)
        .timeout_minutes(config.build.timeout_minutes)
        .build()?;

    let mut role = ServiceRole::new(
        config.role.logical_id.clone(),
        ServicePrincipal::new(&config.role.principal)?,
    );
    for policy in &config.role.managed_policies {
        role = role.with_managed_policy(policy)?;
    }

    let mut pipeline = Pipeline::builder(config.pipeline.logical_id.clone())
        .artifact_bucket(&bucket)
        .role(&role)
        .restart_execution_on_update(config.pipeline.restart_on_update);
    if let Some(name) = &config.pipeline.name {
        pipeline = pipeline.pipeline_name(name);
    }
    for stage_config in &config.pipeline.stages {
        let mut stage = Stage::new(&stage_config.name);
        for action in &stage_config.actions {
            let action = match action.action_type {
                ActionType::CodeCommit => {
                    let output = single_output(&action.name, &action.outputs)?;
                    let branch = action
                        .branch
                        .clone()
                        .unwrap_or_else(|| config.repository.branch.clone());
                    Action::codecommit_source(&action.name, &repository, branch, output)
                }
                ActionType::CodeBuild => {
                    let input = action.input.clone().ok_or_else(|| {
                        Error::InvalidPipeline(format!(
                            "build action '{}' has no input artifact",
                            action.name
                        ))
                    })?;
                    Action::codebuild(&action.name, &project, input, action.outputs.clone())
                }
            };
            stage = stage.action(action);
        }
        pipeline = pipeline.stage(stage);
    }
    let pipeline = pipeline.build()?;

    let mut stack = Stack::builder(config.stack.id.clone())
        .environment(StackEnvironment {
            account: config.stack.account.clone(),
            region: config.stack.region.clone(),
        })
        .bucket(bucket)
        .repository(repository)
        .project(project)
        .service_role(role)
        .pipeline(pipeline);
    if let Some(description) = &config.stack.description {
        stack = stack.description(description);
    }
    if let Some(asset_bucket) = &config.stack.asset_bucket {
        stack = stack.asset_bucket(asset_bucket);
    }
    let stack = stack.build()?;

    info!(
        stack = %stack.id,
        resources = stack.graph.nodes().len(),
        edges = stack.graph.edges().len(),
        "Stack defined"
    );
    Ok(stack)
}

fn single_output(
    action: &str,
    outputs: &[shipyard_core::ArtifactName],
) -> Result<shipyard_core::ArtifactName> {
    match outputs {
        [output] => Ok(output.clone()),
        _ => Err(Error::InvalidPipeline(format!(
            "source action '{}' must declare exactly one output artifact, got {}",
            action,
            outputs.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_config::{StageConfig, VariableContext, parse_stack_config_with};
    use shipyard_core::App;
    use std::fs;
    use std::path::Path;

    fn config_with_seed(seed: &Path) -> StackConfig {
        let mut config = StackConfig::default();
        config.repository.seed = seed.to_path_buf();
        config
    }

    fn zip_seed(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("java-project.zip");
        fs::write(&path, b"PK\x05\x06\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0").unwrap();
        path
    }

    #[test]
    fn test_define_default_stack() {
        let dir = tempfile::tempdir().unwrap();
        let stack = define_stack(&config_with_seed(&zip_seed(dir.path()))).unwrap();

        assert_eq!(stack.id.as_str(), "SoftwareDeliveryPipelineStack");
        assert_eq!(stack.graph.nodes().len(), 5);
        assert_eq!(stack.repository.repository_name, "java-project");
        assert_eq!(stack.pipeline.pipeline_name, "JavaProjectPipeline");
        assert_eq!(stack.pipeline.source_output(), stack.pipeline.build_input());
        assert_eq!(&stack.pipeline.artifact_bucket, stack.project.artifacts.bucket());
        assert!(stack.service_role.managed_policies.is_empty());

        let code = stack.repository.code.as_ref().unwrap();
        assert_eq!(code.branch, "main");
        assert_eq!(code.asset.hash.len(), 64);
    }

    #[test]
    fn test_missing_seed_fails_before_anything_is_built() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seed(&dir.path().join("missing.zip"));
        let result = define_stack(&config);
        assert!(matches!(result, Err(Error::AssetNotFound(_))));
    }

    #[test]
    fn test_duplicate_stack_definition() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_seed(&zip_seed(dir.path()));

        let mut app = App::new();
        app.add_stack(define_stack(&config).unwrap()).unwrap();
        let err = app.add_stack(define_stack(&config).unwrap()).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentifier(_)));
    }

    #[test]
    fn test_directory_seed_requires_build_spec() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        let config = config_with_seed(dir.path());

        let err = define_stack(&config).unwrap_err();
        assert!(matches!(err, Error::BuildSpecNotFound { .. }));

        fs::write(dir.path().join("buildspec.yml"), "version: 0.2\n").unwrap();
        let stack = define_stack(&config).unwrap();
        assert_eq!(
            stack.project.build_spec,
            BuildSpec::FromSourceFilename("buildspec.yml".to_string())
        );
    }

    #[test]
    fn test_administrator_access_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_seed(&zip_seed(dir.path()));
        config.role.managed_policies.push("AdministratorAccess".to_string());

        let err = define_stack(&config).unwrap_err();
        assert!(matches!(err, Error::OverlyBroadGrant(_)));
    }

    #[test]
    fn test_reordered_stages_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_seed(&zip_seed(dir.path()));
        config.pipeline.stages.reverse();

        let err = define_stack(&config).unwrap_err();
        assert!(matches!(err, Error::InvalidPipeline(_)));
    }

    #[test]
    fn test_third_stage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_seed(&zip_seed(dir.path()));
        let mut deploy: StageConfig = config.pipeline.stages[1].clone();
        deploy.name = "Deploy".to_string();
        config.pipeline.stages.push(deploy);

        let err = define_stack(&config).unwrap_err();
        assert!(matches!(err, Error::InvalidPipeline(_)));
    }

    #[test]
    fn test_source_branch_override() {
        let dir = tempfile::tempdir().unwrap();
        zip_seed(dir.path());
        let kdl = shipyard_config::DEFAULT_CONFIG
            .replace(
                "finalProject/SoftwareDeliveryPipeline/java-project.zip",
                &dir.path().join("java-project.zip").display().to_string(),
            )
            .replace(
                r#"type="codecommit""#,
                r#"type="codecommit" branch="release""#,
            );
        let config = parse_stack_config_with(&kdl, VariableContext::new()).unwrap();
        let stack = define_stack(&config).unwrap();

        let source = &stack.pipeline.stages[0].actions[0];
        match &source.kind {
            shipyard_core::pipeline::ActionKind::CodeCommitSource { branch, .. } => {
                assert_eq!(branch, "release")
            }
            other => panic!("unexpected action {:?}", other),
        }
    }
}
