//! Graph command.

use anyhow::Result;
use std::path::Path;

pub fn run(config: &Path) -> Result<()> {
    let stack = super::load_stack(config)?;

    println!("{}", stack.id);
    for node in stack.graph.topological_order()? {
        if node.needs.is_empty() {
            println!("  {} ({})", node.id, node.kind.cfn_type());
        } else {
            let needs: Vec<&str> = node.needs.iter().map(|id| id.as_str()).collect();
            println!(
                "  {} ({}) <- {}",
                node.id,
                node.kind.cfn_type(),
                needs.join(", ")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_graph_of_default_stack() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("shipyard.kdl");
        crate::commands::init(&config, false).unwrap();
        assert!(run(&config).is_err());

        let seed = dir
            .path()
            .join("finalProject/SoftwareDeliveryPipeline/java-project.zip");
        fs::create_dir_all(seed.parent().unwrap()).unwrap();
        fs::write(&seed, b"PK\x05\x06").unwrap();
        run(&config).unwrap();
    }
}
