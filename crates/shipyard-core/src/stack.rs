//! Stacks, their resource graph and the app that holds them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::artifact::ArtifactBucket;
use crate::iam::{self, ServicePrincipal, ServiceRole};
use crate::pipeline::{ActionKind, Pipeline};
use crate::project::BuildProject;
use crate::repository::SourceRepository;
use crate::{Error, LogicalId, Result, StackId};

/// Kind of a top-level resource in a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ArtifactBucket,
    SourceRepository,
    BuildProject,
    ServiceRole,
    Pipeline,
}

impl ResourceKind {
    /// CloudFormation resource type.
    pub fn cfn_type(&self) -> &'static str {
        match self {
            ResourceKind::ArtifactBucket => "AWS::S3::Bucket",
            ResourceKind::SourceRepository => "AWS::CodeCommit::Repository",
            ResourceKind::BuildProject => "AWS::CodeBuild::Project",
            ResourceKind::ServiceRole => "AWS::IAM::Role",
            ResourceKind::Pipeline => "AWS::CodePipeline::Pipeline",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::ArtifactBucket => write!(f, "artifact bucket"),
            ResourceKind::SourceRepository => write!(f, "source repository"),
            ResourceKind::BuildProject => write!(f, "build project"),
            ResourceKind::ServiceRole => write!(f, "service role"),
            ResourceKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// A resource and the resources it needs to exist first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: LogicalId,
    pub kind: ResourceKind,
    pub needs: Vec<LogicalId>,
}

/// Dependency graph between the top-level resources of a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Ids must be unique within the graph.
    pub fn add(&mut self, id: LogicalId, kind: ResourceKind, needs: Vec<LogicalId>) -> Result<()> {
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(Error::DuplicateIdentifier(format!(
                "resource '{}' is declared twice",
                id
            )));
        }
        self.nodes.push(ResourceNode { id, kind, needs });
        Ok(())
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn node(&self, id: &LogicalId) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Resources the given resource depends on.
    pub fn dependencies_of(&self, id: &LogicalId) -> &[LogicalId] {
        self.node(id).map(|n| n.needs.as_slice()).unwrap_or(&[])
    }

    /// All `(dependent, dependency)` pairs.
    pub fn edges(&self) -> Vec<(&LogicalId, &LogicalId)> {
        self.nodes
            .iter()
            .flat_map(|n| n.needs.iter().map(move |d| (&n.id, d)))
            .collect()
    }

    /// Check every edge points at a declared node and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for (dependent, dependency) in self.edges() {
            if self.node(dependency).is_none() {
                return Err(Error::MissingDependency(format!(
                    "'{}' depends on undeclared resource '{}'",
                    dependent, dependency
                )));
            }
        }
        if let Err(cycle) = detect_cycle(&self.nodes) {
            return Err(Error::CycleDetected(cycle));
        }
        Ok(())
    }

    /// Nodes ordered so every resource comes after the ones it needs.
    /// Ties keep declaration order.
    pub fn topological_order(&self) -> Result<Vec<&ResourceNode>> {
        self.validate()?;

        let mut placed: HashSet<&LogicalId> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        while order.len() < self.nodes.len() {
            let next = self
                .nodes
                .iter()
                .find(|n| !placed.contains(&n.id) && n.needs.iter().all(|d| placed.contains(d)))
                .ok_or_else(|| Error::CycleDetected("no resource is ready".to_string()))?;
            placed.insert(&next.id);
            order.push(next);
        }
        Ok(order)
    }
}

/// Detect cycles in the resource dependency graph using DFS.
fn detect_cycle(nodes: &[ResourceNode]) -> std::result::Result<(), String> {
    let mut visited = HashMap::new();
    let mut rec_stack = HashMap::new();

    let node_map: HashMap<&str, &ResourceNode> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    for node in nodes {
        if !visited.contains_key(node.id.as_str()) {
            if let Some(cycle) =
                dfs_detect_cycle(node.id.as_str(), &node_map, &mut visited, &mut rec_stack)
            {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    node_map: &'a HashMap<&'a str, &'a ResourceNode>,
    visited: &mut HashMap<&'a str, bool>,
    rec_stack: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    visited.insert(node, true);
    rec_stack.insert(node, true);

    if let Some(resource) = node_map.get(node) {
        for dep in &resource.needs {
            let dep_str: &'a str = dep.as_str();
            if !visited.contains_key(dep_str) {
                if let Some(cycle) = dfs_detect_cycle(dep_str, node_map, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep_str).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }
    }

    rec_stack.insert(node, false);
    None
}

/// Target account and region of a stack. Unset values stay environment-agnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEnvironment {
    pub account: Option<String>,
    pub region: Option<String>,
}

/// A fully wired delivery stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub description: Option<String>,
    pub environment: StackEnvironment,
    /// Bucket the seed asset is published to, in `Fn::Sub` syntax.
    pub asset_bucket: String,
    pub bucket: ArtifactBucket,
    pub repository: SourceRepository,
    pub project: BuildProject,
    /// Execution role owned by the build project.
    pub build_role: ServiceRole,
    /// Role the pipeline assumes.
    pub service_role: ServiceRole,
    pub pipeline: Pipeline,
    pub graph: ResourceGraph,
}

impl Stack {
    pub const DEFAULT_ASSET_BUCKET: &'static str = "cdk-assets-${AWS::AccountId}-${AWS::Region}";

    pub fn builder(id: StackId) -> StackBuilder {
        StackBuilder {
            id,
            description: None,
            environment: StackEnvironment::default(),
            asset_bucket: Self::DEFAULT_ASSET_BUCKET.to_string(),
            bucket: None,
            repository: None,
            project: None,
            service_role: None,
            pipeline: None,
        }
    }

    /// Logical id of the inline policy attached to a role.
    pub fn policy_id(role: &ServiceRole) -> Result<LogicalId> {
        role.logical_id.child("DefaultPolicy")
    }
}

/// Collects the five resources of a stack and wires them together.
#[derive(Debug)]
pub struct StackBuilder {
    id: StackId,
    description: Option<String>,
    environment: StackEnvironment,
    asset_bucket: String,
    bucket: Option<ArtifactBucket>,
    repository: Option<SourceRepository>,
    project: Option<BuildProject>,
    service_role: Option<ServiceRole>,
    pipeline: Option<Pipeline>,
}

impl StackBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn environment(mut self, environment: StackEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn asset_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.asset_bucket = bucket.into();
        self
    }

    pub fn bucket(mut self, bucket: ArtifactBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn repository(mut self, repository: SourceRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn project(mut self, project: BuildProject) -> Self {
        self.project = Some(project);
        self
    }

    pub fn service_role(mut self, role: ServiceRole) -> Self {
        self.service_role = Some(role);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<Stack> {
        let StackBuilder {
            id,
            description,
            environment,
            asset_bucket,
            bucket,
            repository,
            project,
            service_role,
            pipeline,
        } = self;

        if asset_bucket.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "stack '{}' has an empty asset bucket name",
                id
            )));
        }

        let missing =
            |what: &str| Error::MissingDependency(format!("stack '{}' has no {}", id, what));
        let bucket = bucket.ok_or_else(|| missing("artifact bucket"))?;
        let repository = repository.ok_or_else(|| missing("source repository"))?;
        let project = project.ok_or_else(|| missing("build project"))?;
        let mut service_role = service_role.ok_or_else(|| missing("service role"))?;
        let pipeline = pipeline.ok_or_else(|| missing("pipeline"))?;

        if project.source_repository != repository.logical_id {
            return Err(Error::MissingDependency(format!(
                "build project '{}' reads undeclared repository '{}'",
                project.logical_id, project.source_repository
            )));
        }
        if project.artifacts.bucket() != &bucket.logical_id {
            return Err(Error::MissingDependency(format!(
                "build project '{}' writes to undeclared bucket '{}'",
                project.logical_id,
                project.artifacts.bucket()
            )));
        }
        if pipeline.artifact_bucket != bucket.logical_id {
            return Err(Error::MissingDependency(format!(
                "pipeline '{}' stores artifacts in undeclared bucket '{}'",
                pipeline.logical_id, pipeline.artifact_bucket
            )));
        }
        if pipeline.role != service_role.logical_id {
            return Err(Error::MissingDependency(format!(
                "pipeline '{}' assumes undeclared role '{}'",
                pipeline.logical_id, pipeline.role
            )));
        }
        pipeline.validate()?;

        service_role.grant(iam::bucket_read_write(&bucket));
        for action in pipeline.actions() {
            match &action.kind {
                ActionKind::CodeCommitSource { repository: id, .. } => {
                    if id != &repository.logical_id {
                        return Err(Error::MissingDependency(format!(
                            "action '{}' checks out undeclared repository '{}'",
                            action.name, id
                        )));
                    }
                    service_role.grant(iam::repository_source_action(&repository));
                }
                ActionKind::CodeBuild { project: id, .. } => {
                    if id != &project.logical_id {
                        return Err(Error::MissingDependency(format!(
                            "action '{}' runs undeclared project '{}'",
                            action.name, id
                        )));
                    }
                    service_role.grant(iam::project_build_action(&project));
                }
            }
        }

        let mut build_role = ServiceRole::new(project.role.clone(), ServicePrincipal::codebuild());
        for statement in iam::build_project_statements(&project, &repository, &bucket) {
            build_role.grant(statement);
        }

        let mut graph = ResourceGraph::new();
        graph.add(bucket.logical_id.clone(), ResourceKind::ArtifactBucket, vec![])?;
        graph.add(repository.logical_id.clone(), ResourceKind::SourceRepository, vec![])?;
        graph.add(
            project.logical_id.clone(),
            ResourceKind::BuildProject,
            vec![repository.logical_id.clone(), bucket.logical_id.clone()],
        )?;
        graph.add(service_role.logical_id.clone(), ResourceKind::ServiceRole, vec![])?;
        graph.add(
            pipeline.logical_id.clone(),
            ResourceKind::Pipeline,
            vec![
                bucket.logical_id.clone(),
                repository.logical_id.clone(),
                project.logical_id.clone(),
                service_role.logical_id.clone(),
            ],
        )?;
        graph.validate()?;

        // Owned resources share the stack's logical id namespace.
        let mut seen: HashSet<LogicalId> = graph.nodes().iter().map(|n| n.id.clone()).collect();
        for owned in [
            build_role.logical_id.clone(),
            Stack::policy_id(&build_role)?,
            Stack::policy_id(&service_role)?,
        ] {
            if !seen.insert(owned.clone()) {
                return Err(Error::DuplicateIdentifier(format!(
                    "resource '{}' is declared twice",
                    owned
                )));
            }
        }

        Ok(Stack {
            id,
            description,
            environment,
            asset_bucket,
            bucket,
            repository,
            project,
            build_role,
            service_role,
            pipeline,
            graph,
        })
    }
}

/// The deployment scope: an ordered set of stacks with unique ids.
#[derive(Debug, Clone, Default)]
pub struct App {
    stacks: Vec<Stack>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stack. A second stack with the same id is refused and the
    /// app is left unchanged.
    pub fn add_stack(&mut self, stack: Stack) -> Result<()> {
        if self.stacks.iter().any(|s| s.id == stack.id) {
            return Err(Error::DuplicateIdentifier(format!(
                "stack '{}' is already defined in this app",
                stack.id
            )));
        }
        self.stacks.push(stack);
        Ok(())
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack(&self, id: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.id.as_str() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArtifactName;
    use crate::pipeline::{Action, Stage};
    use crate::project::BuildSpec;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn artifact(s: &str) -> ArtifactName {
        ArtifactName::new(s).unwrap()
    }

    fn builder(stack_id: &str) -> StackBuilder {
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
        let pipeline = Pipeline::builder(id("DeliveryPipeline"))
            .pipeline_name("JavaProjectPipeline")
            .artifact_bucket(&bucket)
            .role(&role)
            .stage(Stage::new("Source").action(Action::codecommit_source(
                "CodeCommit",
                &repo,
                "main",
                artifact("SourceOutput"),
            )))
            .stage(Stage::new("Build").action(Action::codebuild(
                "CodeBuild",
                &project,
                artifact("SourceOutput"),
                vec![artifact("BuildOutput")],
            )))
            .build()
            .unwrap();

        Stack::builder(StackId::new(stack_id).unwrap())
            .bucket(bucket)
            .repository(repo)
            .project(project)
            .service_role(role)
            .pipeline(pipeline)
    }

    #[test]
    fn test_stack_graph() {
        let stack = builder("SoftwareDeliveryPipelineStack").build().unwrap();

        assert_eq!(stack.graph.nodes().len(), 5);
        assert_eq!(stack.graph.edges().len(), 6);
        assert_eq!(
            stack.graph.dependencies_of(&id("JavaBuildProject")),
            &[id("JavaProjectRepo"), id("ArtifactBucket")]
        );
        assert!(stack.graph.dependencies_of(&id("CodePipelineServiceRole")).is_empty());

        let order: Vec<&str> = stack
            .graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order.last(), Some(&"DeliveryPipeline"));
        let build = order.iter().position(|n| *n == "JavaBuildProject").unwrap();
        let repo = order.iter().position(|n| *n == "JavaProjectRepo").unwrap();
        assert!(repo < build);
    }

    #[test]
    fn test_least_privilege_grants() {
        let stack = builder("SoftwareDeliveryPipelineStack").build().unwrap();

        assert!(stack.service_role.managed_policies.is_empty());
        assert_eq!(stack.service_role.statements.len(), 3);
        assert_eq!(
            stack.service_role.referenced_resources(),
            vec![&id("ArtifactBucket"), &id("JavaBuildProject"), &id("JavaProjectRepo")]
        );
        assert_eq!(stack.build_role.logical_id.as_str(), "JavaBuildProjectRole");
        assert_eq!(stack.build_role.assumed_by, ServicePrincipal::codebuild());
    }

    #[test]
    fn test_missing_role_in_stack() {
        let mut b = builder("SoftwareDeliveryPipelineStack");
        b.service_role = None;
        assert!(matches!(b.build(), Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_pipeline_must_share_bucket_with_project() {
        let mut b = builder("SoftwareDeliveryPipelineStack");
        if let Some(pipeline) = b.pipeline.as_mut() {
            pipeline.artifact_bucket = id("OtherBucket");
        }
        assert!(matches!(b.build(), Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_owned_resource_id_collision() {
        let mut b = builder("SoftwareDeliveryPipelineStack");
        if let Some(role) = b.service_role.as_mut() {
            role.logical_id = id("JavaBuildProjectRole");
        }
        if let Some(pipeline) = b.pipeline.as_mut() {
            pipeline.role = id("JavaBuildProjectRole");
        }
        assert!(matches!(b.build(), Err(Error::DuplicateIdentifier(_))));
    }

    #[test]
    fn test_duplicate_stack_in_app() {
        let mut app = App::new();
        app.add_stack(builder("SoftwareDeliveryPipelineStack").build().unwrap())
            .unwrap();
        let err = app
            .add_stack(builder("SoftwareDeliveryPipelineStack").build().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentifier(_)));
        assert_eq!(app.stacks().len(), 1);

        app.add_stack(builder("StagingDeliveryStack").build().unwrap())
            .unwrap();
        assert_eq!(app.stacks().len(), 2);
        assert!(app.stack("StagingDeliveryStack").is_some());
    }

    #[test]
    fn test_graph_cycle_detected() {
        let mut graph = ResourceGraph::new();
        graph.add(id("A"), ResourceKind::ServiceRole, vec![id("B")]).unwrap();
        graph.add(id("B"), ResourceKind::ServiceRole, vec![id("A")]).unwrap();
        assert!(matches!(graph.validate(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_graph_undeclared_dependency() {
        let mut graph = ResourceGraph::new();
        graph.add(id("A"), ResourceKind::Pipeline, vec![id("Missing")]).unwrap();
        assert!(matches!(graph.validate(), Err(Error::MissingDependency(_))));
    }
}
