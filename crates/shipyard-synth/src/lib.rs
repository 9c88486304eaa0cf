//! Stack composition and synthesis for Shipyard.
//!
//! This crate handles:
//! - Staging and fingerprinting the repository seed asset
//! - Composing a validated stack from configuration
//! - Rendering CloudFormation templates
//! - Writing the cloud assembly to disk

pub mod assembly;
pub mod asset;
pub mod compose;
pub mod error;
pub mod template;

pub use assembly::{CloudAssembly, Manifest, StackArtifact};
pub use asset::stage_asset;
pub use compose::define_stack;
pub use error::{SynthError, SynthResult};
pub use template::render_template;
