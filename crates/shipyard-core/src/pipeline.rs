//! Delivery pipeline and stage definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::artifact::ArtifactBucket;
use crate::iam::ServiceRole;
use crate::project::BuildProject;
use crate::repository::SourceRepository;
use crate::{ArtifactName, Error, LogicalId, Result};

/// Stage names, in the only order a delivery pipeline accepts.
pub const STAGE_ORDER: [&str; 2] = ["Source", "Build"];

/// Category of a pipeline action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCategory {
    Source,
    Build,
}

impl std::fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionCategory::Source => write!(f, "Source"),
            ActionCategory::Build => write!(f, "Build"),
        }
    }
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Check out a branch of a repository.
    CodeCommitSource {
        repository: LogicalId,
        branch: String,
        output: ArtifactName,
    },
    /// Run a build project over an input artifact.
    CodeBuild {
        project: LogicalId,
        input: ArtifactName,
        outputs: Vec<ArtifactName>,
    },
}

/// A single action within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
}

impl Action {
    pub fn codecommit_source(
        name: impl Into<String>,
        repository: &SourceRepository,
        branch: impl Into<String>,
        output: ArtifactName,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::CodeCommitSource {
                repository: repository.logical_id.clone(),
                branch: branch.into(),
                output,
            },
        }
    }

    pub fn codebuild(
        name: impl Into<String>,
        project: &BuildProject,
        input: ArtifactName,
        outputs: Vec<ArtifactName>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::CodeBuild {
                project: project.logical_id.clone(),
                input,
                outputs,
            },
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self.kind {
            ActionKind::CodeCommitSource { .. } => ActionCategory::Source,
            ActionKind::CodeBuild { .. } => ActionCategory::Build,
        }
    }

    /// Provider name as the pipeline service spells it.
    pub fn provider(&self) -> &'static str {
        match self.kind {
            ActionKind::CodeCommitSource { .. } => "CodeCommit",
            ActionKind::CodeBuild { .. } => "CodeBuild",
        }
    }

    pub fn inputs(&self) -> Vec<&ArtifactName> {
        match &self.kind {
            ActionKind::CodeCommitSource { .. } => Vec::new(),
            ActionKind::CodeBuild { input, .. } => vec![input],
        }
    }

    pub fn outputs(&self) -> Vec<&ArtifactName> {
        match &self.kind {
            ActionKind::CodeCommitSource { output, .. } => vec![output],
            ActionKind::CodeBuild { outputs, .. } => outputs.iter().collect(),
        }
    }

    /// The stack resource the action operates on.
    pub fn target(&self) -> &LogicalId {
        match &self.kind {
            ActionKind::CodeCommitSource { repository, .. } => repository,
            ActionKind::CodeBuild { project, .. } => project,
        }
    }
}

/// An ordered phase of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// A delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub logical_id: LogicalId,
    pub pipeline_name: String,
    /// Bucket holding the artifacts passed between stages.
    pub artifact_bucket: LogicalId,
    /// Role the pipeline service assumes.
    pub role: LogicalId,
    pub stages: Vec<Stage>,
    pub restart_execution_on_update: bool,
}

impl Pipeline {
    pub const MAX_NAME_LEN: usize = 100;

    pub fn builder(logical_id: LogicalId) -> PipelineBuilder {
        PipelineBuilder {
            logical_id,
            pipeline_name: None,
            artifact_bucket: None,
            role: None,
            stages: Vec::new(),
            restart_execution_on_update: false,
        }
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.stages.iter().flat_map(|s| s.actions.iter())
    }

    /// Output artifact of the source stage.
    pub fn source_output(&self) -> Option<&ArtifactName> {
        self.stages
            .iter()
            .find(|s| s.name == STAGE_ORDER[0])
            .and_then(|s| s.actions.first())
            .and_then(|a| a.outputs().into_iter().next())
    }

    /// Input artifact of the build stage.
    pub fn build_input(&self) -> Option<&ArtifactName> {
        self.stages
            .iter()
            .find(|s| s.name == STAGE_ORDER[1])
            .and_then(|s| s.actions.first())
            .and_then(|a| a.inputs().into_iter().next())
    }

    /// Check stage order, action placement and artifact wiring.
    pub fn validate(&self) -> Result<()> {
        validate_pipeline_name(&self.pipeline_name)?;

        let names: Vec<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        if names != STAGE_ORDER {
            return Err(Error::InvalidPipeline(format!(
                "stages must be exactly {:?}, got {:?}",
                STAGE_ORDER, names
            )));
        }

        let mut produced: HashSet<&ArtifactName> = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.actions.is_empty() {
                return Err(Error::InvalidPipeline(format!(
                    "stage '{}' has no actions",
                    stage.name
                )));
            }

            let mut action_names = HashSet::new();
            let mut stage_outputs = Vec::new();
            for action in &stage.actions {
                if action.name.trim().is_empty() {
                    return Err(Error::InvalidPipeline(format!(
                        "stage '{}' has an action without a name",
                        stage.name
                    )));
                }
                if !action_names.insert(action.name.as_str()) {
                    return Err(Error::InvalidPipeline(format!(
                        "stage '{}' declares action '{}' twice",
                        stage.name, action.name
                    )));
                }

                let is_source = action.category() == ActionCategory::Source;
                if (index == 0) != is_source {
                    return Err(Error::InvalidPipeline(format!(
                        "{} action '{}' cannot run in stage '{}'",
                        action.category(),
                        action.name,
                        stage.name
                    )));
                }

                for input in action.inputs() {
                    if !produced.contains(input) {
                        return Err(Error::InvalidPipeline(format!(
                            "action '{}' consumes artifact '{}' which no earlier stage produces",
                            action.name, input
                        )));
                    }
                }
                for output in action.outputs() {
                    if produced.contains(output) || stage_outputs.contains(&output) {
                        return Err(Error::InvalidPipeline(format!(
                            "artifact '{}' is produced more than once",
                            output
                        )));
                    }
                    stage_outputs.push(output);
                }
            }
            produced.extend(stage_outputs);
        }

        Ok(())
    }
}

fn validate_pipeline_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > Pipeline::MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "pipeline name must be 1 to {} characters, got '{}'",
            Pipeline::MAX_NAME_LEN,
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-'))
    {
        return Err(Error::InvalidInput(format!(
            "pipeline name '{}' may only contain letters, digits, '.', '@', '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Builder for [`Pipeline`]. A pipeline cannot exist without its bucket and role.
#[derive(Debug)]
pub struct PipelineBuilder {
    logical_id: LogicalId,
    pipeline_name: Option<String>,
    artifact_bucket: Option<LogicalId>,
    role: Option<LogicalId>,
    stages: Vec<Stage>,
    restart_execution_on_update: bool,
}

impl PipelineBuilder {
    pub fn pipeline_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = Some(name.into());
        self
    }

    pub fn artifact_bucket(mut self, bucket: &ArtifactBucket) -> Self {
        self.artifact_bucket = Some(bucket.logical_id.clone());
        self
    }

    pub fn role(mut self, role: &ServiceRole) -> Self {
        self.role = Some(role.logical_id.clone());
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn restart_execution_on_update(mut self, restart: bool) -> Self {
        self.restart_execution_on_update = restart;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let role = self.role.ok_or_else(|| {
            Error::MissingDependency(format!("pipeline '{}' has no service role", self.logical_id))
        })?;
        let artifact_bucket = self.artifact_bucket.ok_or_else(|| {
            Error::MissingDependency(format!(
                "pipeline '{}' has no artifact bucket",
                self.logical_id
            ))
        })?;
        let pipeline_name = self
            .pipeline_name
            .unwrap_or_else(|| self.logical_id.to_string());

        let pipeline = Pipeline {
            logical_id: self.logical_id,
            pipeline_name,
            artifact_bucket,
            role,
            stages: self.stages,
            restart_execution_on_update: self.restart_execution_on_update,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::ServicePrincipal;
    use crate::project::BuildSpec;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn artifact(s: &str) -> ArtifactName {
        ArtifactName::new(s).unwrap()
    }

    struct Fixture {
        bucket: ArtifactBucket,
        repo: SourceRepository,
        project: BuildProject,
        role: ServiceRole,
    }

    fn fixture() -> Fixture {
        let bucket = ArtifactBucket::new(id("ArtifactBucket"));
        let repo = SourceRepository::new(id("JavaProjectRepo"), "java-project").unwrap();
        let project = BuildProject::builder(id("JavaBuildProject"))
            .source(&repo)
            .artifact_bucket(&bucket)
            .build_spec(BuildSpec::from_source_filename("buildspec.yml").unwrap())
            .build()
            .unwrap();
        let role =
            ServiceRole::new(id("CodePipelineServiceRole"), ServicePrincipal::codepipeline());
        Fixture {
            bucket,
            repo,
            project,
            role,
        }
    }

    fn source_stage(f: &Fixture, output: &str) -> Stage {
        Stage::new("Source").action(Action::codecommit_source(
            "CodeCommit",
            &f.repo,
            "main",
            artifact(output),
        ))
    }

    fn build_stage(f: &Fixture, input: &str, output: &str) -> Stage {
        Stage::new("Build").action(Action::codebuild(
            "CodeBuild",
            &f.project,
            artifact(input),
            vec![artifact(output)],
        ))
    }

    #[test]
    fn test_two_stage_pipeline() {
        let f = fixture();
        let pipeline = Pipeline::builder(id("DeliveryPipeline"))
            .pipeline_name("JavaProjectPipeline")
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build()
            .unwrap();

        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.source_output(), pipeline.build_input());
        assert_eq!(pipeline.artifact_bucket, f.project.artifacts.bucket().clone());
    }

    #[test]
    fn test_missing_role() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build();
        assert!(matches!(result, Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_missing_bucket() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build();
        assert!(matches!(result, Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_reordered_stages_rejected() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .stage(source_stage(&f, "SourceOutput"))
            .build();
        assert!(matches!(result, Err(Error::InvalidPipeline(_))));
    }

    #[test]
    fn test_extra_stage_rejected() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .stage(Stage::new("Deploy"))
            .build();
        assert!(matches!(result, Err(Error::InvalidPipeline(_))));
    }

    #[test]
    fn test_build_input_must_match_source_output() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "Checkout", "BuildOutput"))
            .build();
        let err = result.unwrap_err();
        assert!(matches!(err, Error::InvalidPipeline(_)));
        assert!(err.to_string().contains("Checkout"));
    }

    #[test]
    fn test_artifact_produced_twice() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "SourceOutput"))
            .build();
        assert!(matches!(result, Err(Error::InvalidPipeline(_))));
    }

    #[test]
    fn test_build_action_in_source_stage() {
        let f = fixture();
        let mut source = source_stage(&f, "SourceOutput");
        source.actions.push(Action::codebuild(
            "EarlyBuild",
            &f.project,
            artifact("SourceOutput"),
            vec![],
        ));
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source)
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build();
        assert!(matches!(result, Err(Error::InvalidPipeline(_))));
    }

    #[test]
    fn test_duplicate_action_names() {
        let f = fixture();
        let build = build_stage(&f, "SourceOutput", "BuildOutput").action(Action::codebuild(
            "CodeBuild",
            &f.project,
            artifact("SourceOutput"),
            vec![artifact("TestOutput")],
        ));
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build)
            .build();
        assert!(matches!(result, Err(Error::InvalidPipeline(_))));
    }

    #[test]
    fn test_pipeline_name_defaults_to_logical_id() {
        let f = fixture();
        let pipeline = Pipeline::builder(id("DeliveryPipeline"))
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build()
            .unwrap();
        assert_eq!(pipeline.pipeline_name, "DeliveryPipeline");
    }

    #[test]
    fn test_invalid_pipeline_name() {
        let f = fixture();
        let result = Pipeline::builder(id("DeliveryPipeline"))
            .pipeline_name("java project")
            .artifact_bucket(&f.bucket)
            .role(&f.role)
            .stage(source_stage(&f, "SourceOutput"))
            .stage(build_stage(&f, "SourceOutput", "BuildOutput"))
            .build();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
