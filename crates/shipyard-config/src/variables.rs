//! Variable interpolation for stack configurations.
//!
//! Supports variables like:
//! - `${stack.name}` - Stack id
//! - `${aws.account}` - Target account from the `env` node
//! - `${aws.region}` - Target region from the `env` node
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//!
//! CloudFormation pseudo parameters such as `${AWS::Region}` do not match the
//! variable syntax and pass through untouched.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Stack-related variables
    pub stack: StackContext,
    /// Target environment variables
    pub aws: AwsContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

/// Stack context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct StackContext {
    pub name: String,
}

/// Account and region context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct AwsContext {
    pub account: Option<String>,
    pub region: Option<String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding the current process environment.
    pub fn from_env() -> Self {
        let mut ctx = Self::new();
        ctx.populate_env();
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["stack", "name"] => Some(self.stack.name.clone()).filter(|s| !s.is_empty()),

            ["aws", "account"] => self.aws.account.clone(),
            ["aws", "region"] => self.aws.region.clone(),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Variables in a string that this context cannot resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_stack(mut self, name: impl Into<String>) -> Self {
        self.ctx.stack.name = name.into();
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.ctx.aws.account = Some(account.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.ctx.aws.region = Some(region.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_and_aws_interpolation() {
        let ctx = VariableContextBuilder::new()
            .with_stack("SoftwareDeliveryPipelineStack")
            .with_account("123456789012")
            .with_region("us-east-1")
            .build();

        let result = ctx.interpolate("${stack.name} in ${aws.account}/${aws.region}");
        assert_eq!(
            result,
            "SoftwareDeliveryPipelineStack in 123456789012/us-east-1"
        );
    }

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("TEAM", "payments")
            .build();

        let result = ctx.interpolate("java-project-${env.TEAM}");
        assert_eq!(result, "java-project-payments");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
        assert_eq!(ctx.unresolved("${aws.region}-${x}"), vec!["aws.region", "x"]);
    }

    #[test]
    fn test_pseudo_parameters_untouched() {
        let ctx = VariableContextBuilder::new().with_region("eu-west-1").build();
        let result = ctx.interpolate("cdk-assets-${AWS::AccountId}-${aws.region}");
        assert_eq!(result, "cdk-assets-${AWS::AccountId}-eu-west-1");
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("project", "java-project");

        let result = ctx.interpolate("${project}-pipeline");
        assert_eq!(result, "java-project-pipeline");
    }

    #[test]
    fn test_date_variable() {
        let ctx = VariableContext::new();

        let result = ctx.interpolate("${date}");
        // Should be in YYYY-MM-DD format
        assert!(result.len() == 10);
        assert!(result.contains('-'));
    }
}
