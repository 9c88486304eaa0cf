//! KDL configuration parsing for Shipyard.
//!
//! This crate handles parsing of:
//! - Stack definitions (shipyard.kdl)
//! - Variable interpolation

pub mod error;
pub mod stack;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use stack::{
    ActionConfig, ActionType, BucketConfig, BuildConfig, DEFAULT_CONFIG, PipelineConfig,
    RepositoryConfig, RoleConfig, StackConfig, StackSection, StageConfig, load_stack_config,
    parse_stack_config, parse_stack_config_with,
};
pub use variables::{AwsContext, StackContext, VariableContext, VariableContextBuilder};
