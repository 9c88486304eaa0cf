//! Synth command.

use anyhow::{Context, Result};
use shipyard_synth::CloudAssembly;
use std::path::Path;

pub fn run(config: &Path, out: &Path) -> Result<()> {
    let app = super::load_app(config)?;
    let assembly = CloudAssembly::synth(&app).context("failed to render templates")?;
    let written = assembly
        .write_to(out)
        .with_context(|| format!("failed to write assembly to {}", out.display()))?;

    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project(dir: &Path) -> std::path::PathBuf {
        let config = dir.join("shipyard.kdl");
        crate::commands::init(&config, false).unwrap();
        let seed = dir.join("finalProject/SoftwareDeliveryPipeline/java-project.zip");
        fs::create_dir_all(seed.parent().unwrap()).unwrap();
        fs::write(&seed, b"PK\x05\x06").unwrap();
        config
    }

    #[test]
    fn test_synth_writes_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        let out = dir.path().join("cdk.out");

        run(&config, &out).unwrap();

        let mut files: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                "SoftwareDeliveryPipelineStack.assets.json",
                "SoftwareDeliveryPipelineStack.template.json",
                "manifest.json",
            ]
        );
    }

    #[test]
    fn test_synth_fails_without_seed() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("shipyard.kdl");
        crate::commands::init(&config, false).unwrap();
        let out = dir.path().join("cdk.out");

        assert!(run(&config, &out).is_err());
        assert!(!out.exists());
    }
}
