//! CloudFormation template rendering.

use serde_json::{Map, Value, json};
use shipyard_core::artifact::ArtifactBucket;
use shipyard_core::iam::{PolicyResource, ServiceRole};
use shipyard_core::pipeline::{Action, ActionKind, Pipeline};
use shipyard_core::project::{BuildArtifacts, BuildProject, BuildSpec};
use shipyard_core::repository::SourceRepository;
use shipyard_core::stack::ResourceKind;
use shipyard_core::{ArtifactName, LogicalId, Result, Stack};

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
const POLICY_VERSION: &str = "2012-10-17";

fn get_att(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}

fn reference(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

/// Render a stack as a CloudFormation template.
pub fn render_template(stack: &Stack) -> Result<Value> {
    let mut resources = Map::new();

    resources.insert(stack.bucket.logical_id.to_string(), bucket(&stack.bucket));
    resources.insert(
        stack.repository.logical_id.to_string(),
        repository(&stack.repository, &stack.asset_bucket),
    );

    let build_policy = Stack::policy_id(&stack.build_role)?;
    resources.insert(stack.build_role.logical_id.to_string(), role(&stack.build_role));
    resources.insert(
        build_policy.to_string(),
        policy(&stack.build_role, &build_policy),
    );

    let mut project_depends: Vec<&LogicalId> = stack
        .graph
        .dependencies_of(&stack.project.logical_id)
        .iter()
        .collect();
    project_depends.push(&stack.build_role.logical_id);
    project_depends.push(&build_policy);
    resources.insert(
        stack.project.logical_id.to_string(),
        with_depends_on(project(&stack.project), project_depends),
    );

    let service_policy = Stack::policy_id(&stack.service_role)?;
    resources.insert(stack.service_role.logical_id.to_string(), role(&stack.service_role));
    resources.insert(
        service_policy.to_string(),
        policy(&stack.service_role, &service_policy),
    );

    let mut pipeline_depends: Vec<&LogicalId> = stack
        .graph
        .dependencies_of(&stack.pipeline.logical_id)
        .iter()
        .collect();
    pipeline_depends.push(&service_policy);
    pipeline_depends.push(&build_policy);
    resources.insert(
        stack.pipeline.logical_id.to_string(),
        with_depends_on(pipeline(&stack.pipeline), pipeline_depends),
    );

    let outputs = json!({
        "ArtifactBucketName": {
            "Description": "Bucket holding pipeline artifacts",
            "Value": reference(&stack.bucket.logical_id),
        },
        "RepositoryCloneUrlHttp": {
            "Description": "HTTPS clone URL of the source repository",
            "Value": get_att(&stack.repository.logical_id, "CloneUrlHttp"),
        },
        "PipelineName": {
            "Description": "Name of the delivery pipeline",
            "Value": reference(&stack.pipeline.logical_id),
        },
    });

    let mut template = Map::new();
    template.insert(
        "AWSTemplateFormatVersion".to_string(),
        json!(TEMPLATE_FORMAT_VERSION),
    );
    if let Some(description) = &stack.description {
        template.insert("Description".to_string(), json!(description));
    }
    template.insert("Resources".to_string(), Value::Object(resources));
    template.insert("Outputs".to_string(), outputs);
    Ok(Value::Object(template))
}

fn with_depends_on(mut resource: Value, mut depends_on: Vec<&LogicalId>) -> Value {
    depends_on.sort();
    depends_on.dedup();
    if let Value::Object(map) = &mut resource {
        map.insert(
            "DependsOn".to_string(),
            json!(depends_on.iter().map(|id| id.as_str()).collect::<Vec<_>>()),
        );
    }
    resource
}

fn bucket(bucket: &ArtifactBucket) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "BucketEncryption".to_string(),
        json!({
            "ServerSideEncryptionConfiguration": [{
                "ServerSideEncryptionByDefault": {
                    "SSEAlgorithm": bucket.encryption.sse_algorithm(),
                },
            }],
        }),
    );
    if bucket.block_public_access {
        properties.insert(
            "PublicAccessBlockConfiguration".to_string(),
            json!({
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            }),
        );
    }
    if bucket.versioned {
        properties.insert(
            "VersioningConfiguration".to_string(),
            json!({ "Status": "Enabled" }),
        );
    }

    let policy = bucket.removal_policy.to_string();
    json!({
        "Type": ResourceKind::ArtifactBucket.cfn_type(),
        "Properties": properties,
        "DeletionPolicy": policy,
        "UpdateReplacePolicy": policy,
    })
}

fn repository(repository: &SourceRepository, asset_bucket: &str) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "RepositoryName".to_string(),
        json!(repository.repository_name),
    );
    if let Some(description) = &repository.description {
        properties.insert("RepositoryDescription".to_string(), json!(description));
    }
    if let Some(code) = &repository.code {
        properties.insert(
            "Code".to_string(),
            json!({
                "BranchName": code.branch,
                "S3": {
                    "Bucket": { "Fn::Sub": asset_bucket },
                    "Key": code.asset.object_key(),
                },
            }),
        );
    }

    json!({
        "Type": ResourceKind::SourceRepository.cfn_type(),
        "Properties": properties,
    })
}

/// Physical project name, also the suffix of its log group.
fn project_name(id: &LogicalId) -> String {
    format!("${{AWS::StackName}}-{}", id)
}

fn project(project: &BuildProject) -> Value {
    let mut source = json!({
        "Type": "CODECOMMIT",
        "Location": get_att(&project.source_repository, "CloneUrlHttp"),
    });
    source["BuildSpec"] = match &project.build_spec {
        BuildSpec::FromSourceFilename(name) => json!(name),
        BuildSpec::Inline(document) => json!(document.to_string()),
    };

    let artifacts = match &project.artifacts {
        BuildArtifacts::S3 {
            bucket,
            include_build_id,
            package_zip,
        } => json!({
            "Type": "S3",
            "Location": reference(bucket),
            "Name": project.logical_id.as_str(),
            "NamespaceType": if *include_build_id { "BUILD_ID" } else { "NONE" },
            "Packaging": if *package_zip { "ZIP" } else { "NONE" },
        }),
    };

    json!({
        "Type": ResourceKind::BuildProject.cfn_type(),
        "Properties": {
            "Name": { "Fn::Sub": project_name(&project.logical_id) },
            "Source": source,
            "Artifacts": artifacts,
            "Environment": {
                "Type": "LINUX_CONTAINER",
                "Image": project.environment.image.as_str(),
                "ComputeType": project.environment.compute_type.as_cfn(),
                "PrivilegedMode": project.environment.privileged,
                "ImagePullCredentialsType": "CODEBUILD",
            },
            "ServiceRole": get_att(&project.role, "Arn"),
            "TimeoutInMinutes": project.timeout_minutes,
            "EncryptionKey": "alias/aws/s3",
        },
    })
}

fn role(role: &ServiceRole) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "AssumeRolePolicyDocument".to_string(),
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": role.assumed_by.as_str() },
            }],
        }),
    );
    if !role.managed_policies.is_empty() {
        let arns: Vec<Value> = role
            .managed_policies
            .iter()
            .map(|name| {
                let arn = format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", name);
                json!({ "Fn::Sub": arn })
            })
            .collect();
        properties.insert("ManagedPolicyArns".to_string(), Value::Array(arns));
    }

    json!({
        "Type": ResourceKind::ServiceRole.cfn_type(),
        "Properties": properties,
    })
}

fn policy(role: &ServiceRole, policy_id: &LogicalId) -> Value {
    let statements: Vec<Value> = role
        .statements
        .iter()
        .map(|statement| {
            let resources: Vec<Value> = statement
                .resources
                .iter()
                .flat_map(policy_resource)
                .collect();
            json!({
                "Action": statement.actions,
                "Effect": "Allow",
                "Resource": resources,
            })
        })
        .collect();

    json!({
        "Type": "AWS::IAM::Policy",
        "Properties": {
            "PolicyName": policy_id.as_str(),
            "PolicyDocument": {
                "Version": POLICY_VERSION,
                "Statement": statements,
            },
            "Roles": [reference(&role.logical_id)],
        },
    })
}

fn policy_resource(resource: &PolicyResource) -> Vec<Value> {
    match resource {
        PolicyResource::Arn(id) => vec![get_att(id, "Arn")],
        PolicyResource::BucketObjects(id) => {
            vec![json!({ "Fn::Join": ["", [get_att(id, "Arn"), "/*"]] })]
        }
        PolicyResource::BuildLogs(id) => {
            // Must not reference the project resource: the project depends on this policy.
            let group = format!(
                "arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:{}",
                format_args!("log-group:/aws/codebuild/{}", project_name(id))
            );
            vec![
                json!({ "Fn::Sub": group.clone() }),
                json!({ "Fn::Sub": format!("{}:*", group) }),
            ]
        }
    }
}

fn pipeline(pipeline: &Pipeline) -> Value {
    let stages: Vec<Value> = pipeline
        .stages
        .iter()
        .map(|stage| {
            let actions: Vec<Value> = stage.actions.iter().map(action).collect();
            json!({ "Name": stage.name, "Actions": actions })
        })
        .collect();

    json!({
        "Type": ResourceKind::Pipeline.cfn_type(),
        "Properties": {
            "Name": pipeline.pipeline_name,
            "RoleArn": get_att(&pipeline.role, "Arn"),
            "ArtifactStore": {
                "Type": "S3",
                "Location": reference(&pipeline.artifact_bucket),
            },
            "RestartExecutionOnUpdate": pipeline.restart_execution_on_update,
            "Stages": stages,
        },
    })
}

fn action(action: &Action) -> Value {
    let configuration = match &action.kind {
        ActionKind::CodeCommitSource {
            repository, branch, ..
        } => json!({
            "RepositoryName": get_att(repository, "Name"),
            "BranchName": branch,
            "PollForSourceChanges": true,
        }),
        ActionKind::CodeBuild { project, .. } => json!({
            "ProjectName": reference(project),
        }),
    };

    let mut rendered = json!({
        "Name": action.name,
        "ActionTypeId": {
            "Category": action.category().to_string(),
            "Owner": "AWS",
            "Provider": action.provider(),
            "Version": "1",
        },
        "Configuration": configuration,
        "RunOrder": 1,
    });
    let inputs = artifact_refs(action.inputs());
    if !inputs.is_empty() {
        rendered["InputArtifacts"] = Value::Array(inputs);
    }
    let outputs = artifact_refs(action.outputs());
    if !outputs.is_empty() {
        rendered["OutputArtifacts"] = Value::Array(outputs);
    }
    rendered
}

fn artifact_refs(names: Vec<&ArtifactName>) -> Vec<Value> {
    names
        .into_iter()
        .map(|name| json!({ "Name": name.as_str() }))
        .collect()
}
