//! Service roles and least-privilege policy statements.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactBucket;
use crate::project::BuildProject;
use crate::repository::SourceRepository;
use crate::{Error, LogicalId, Result};

/// Managed policies that grant administrator-equivalent access. None of these
/// may be attached to a pipeline or build role.
pub const ADMIN_EQUIVALENT_POLICIES: &[&str] =
    &["AdministratorAccess", "PowerUserAccess", "IAMFullAccess"];

/// An AWS service allowed to assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    pub const CODEPIPELINE: &'static str = "codepipeline.amazonaws.com";
    pub const CODEBUILD: &'static str = "codebuild.amazonaws.com";

    pub fn new(service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        if !service.ends_with(".amazonaws.com") || service.len() <= ".amazonaws.com".len() {
            return Err(Error::InvalidInput(format!(
                "service principal '{}' must look like '<service>.amazonaws.com'",
                service
            )));
        }
        Ok(Self(service))
    }

    pub fn codepipeline() -> Self {
        Self(Self::CODEPIPELINE.to_string())
    }

    pub fn codebuild() -> Self {
        Self(Self::CODEBUILD.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A resource a statement applies to, expressed against other resources in
/// the stack so it can be rendered as a template reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResource {
    /// The ARN of a resource in the stack.
    Arn(LogicalId),
    /// Every object inside a bucket in the stack (`<arn>/*`).
    BucketObjects(LogicalId),
    /// CodeBuild log groups of a project in the stack.
    BuildLogs(LogicalId),
}

impl PolicyResource {
    pub fn target(&self) -> &LogicalId {
        match self {
            PolicyResource::Arn(id)
            | PolicyResource::BucketObjects(id)
            | PolicyResource::BuildLogs(id) => id,
        }
    }
}

/// An allow statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<PolicyResource>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<PolicyResource>) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }
}

const BUCKET_READ_WRITE: &[&str] = &[
    "s3:GetObject*",
    "s3:GetBucket*",
    "s3:List*",
    "s3:PutObject",
    "s3:Abort*",
    "s3:DeleteObject*",
];

const REPOSITORY_SOURCE_ACTION: &[&str] = &[
    "codecommit:GetBranch",
    "codecommit:GetCommit",
    "codecommit:UploadArchive",
    "codecommit:GetUploadArchiveStatus",
    "codecommit:CancelUploadArchive",
];

const PROJECT_BUILD_ACTION: &[&str] = &[
    "codebuild:BatchGetBuilds",
    "codebuild:StartBuild",
    "codebuild:StopBuild",
];

const BUILD_LOGS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

/// Read and write access to a bucket and its objects.
pub fn bucket_read_write(bucket: &ArtifactBucket) -> PolicyStatement {
    PolicyStatement::allow(
        BUCKET_READ_WRITE,
        vec![
            PolicyResource::Arn(bucket.logical_id.clone()),
            PolicyResource::BucketObjects(bucket.logical_id.clone()),
        ],
    )
}

/// What a CodeCommit source action needs from its repository.
pub fn repository_source_action(repository: &SourceRepository) -> PolicyStatement {
    PolicyStatement::allow(
        REPOSITORY_SOURCE_ACTION,
        vec![PolicyResource::Arn(repository.logical_id.clone())],
    )
}

/// What a CodeBuild action needs to start and watch builds of a project.
pub fn project_build_action(project: &BuildProject) -> PolicyStatement {
    PolicyStatement::allow(
        PROJECT_BUILD_ACTION,
        vec![PolicyResource::Arn(project.logical_id.clone())],
    )
}

/// Logging, source pull and artifact upload for the project's own role.
pub fn build_project_statements(
    project: &BuildProject,
    repository: &SourceRepository,
    bucket: &ArtifactBucket,
) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(
            BUILD_LOGS,
            vec![PolicyResource::BuildLogs(project.logical_id.clone())],
        ),
        PolicyStatement::allow(
            &["codecommit:GitPull"],
            vec![PolicyResource::Arn(repository.logical_id.clone())],
        ),
        bucket_read_write(bucket),
    ]
}

/// An identity assumed by a managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRole {
    pub logical_id: LogicalId,
    pub assumed_by: ServicePrincipal,
    /// AWS managed policy names attached to the role.
    pub managed_policies: Vec<String>,
    /// Inline allow statements.
    pub statements: Vec<PolicyStatement>,
}

impl ServiceRole {
    pub fn new(logical_id: LogicalId, assumed_by: ServicePrincipal) -> Self {
        Self {
            logical_id,
            assumed_by,
            managed_policies: Vec::new(),
            statements: Vec::new(),
        }
    }

    /// Attach an AWS managed policy. Administrator-equivalent policies are refused.
    pub fn with_managed_policy(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if ADMIN_EQUIVALENT_POLICIES
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&name))
        {
            return Err(Error::OverlyBroadGrant(format!(
                "managed policy '{}' on role '{}'; grant the pipeline's actions instead",
                name, self.logical_id
            )));
        }
        if !self.managed_policies.contains(&name) {
            self.managed_policies.push(name);
        }
        Ok(self)
    }

    /// Add a statement unless an identical one is already present.
    pub fn grant(&mut self, statement: PolicyStatement) {
        if !self.statements.contains(&statement) {
            self.statements.push(statement);
        }
    }

    /// Logical ids this role's statements point at.
    pub fn referenced_resources(&self) -> Vec<&LogicalId> {
        let mut ids: Vec<&LogicalId> = self
            .statements
            .iter()
            .flat_map(|s| s.resources.iter().map(|r| r.target()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
