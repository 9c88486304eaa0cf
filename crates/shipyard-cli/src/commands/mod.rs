//! CLI command implementations.

pub mod graph;
pub mod synth;

use anyhow::{Context, Result, bail};
use shipyard_core::{App, Stack};
use std::path::Path;
use tracing::info;

/// Load the configuration and define its stack inside a fresh app.
pub fn load_app(config: &Path) -> Result<App> {
    let stack = load_stack(config)?;
    let mut app = App::new();
    app.add_stack(stack)?;
    Ok(app)
}

pub fn load_stack(config: &Path) -> Result<Stack> {
    let stack_config = shipyard_config::load_stack_config(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let stack = shipyard_synth::define_stack(&stack_config)
        .with_context(|| format!("failed to define stack '{}'", stack_config.stack.id))?;
    Ok(stack)
}

pub fn validate(config: &Path) -> Result<()> {
    let stack = load_stack(config)?;
    println!(
        "Stack '{}' is valid ({} resources)",
        stack.id,
        stack.graph.nodes().len()
    );
    Ok(())
}

pub fn init(config: &Path, force: bool) -> Result<()> {
    if config.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            config.display()
        );
    }
    std::fs::write(config, shipyard_config::DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", config.display()))?;
    info!(path = %config.display(), "Wrote default configuration");
    println!("Created {}", config.display());
    Ok(())
}
