//! Config commands - check files before handing them to a node.

use std::path::Path;

use anyhow::{Context, Result, bail};
use sc_cluster::ClusterConfig;
use sc_core::load_config;

/// Validate a config document or, with `cluster`, a node config.
pub fn validate(file: &Path, cluster: bool) -> Result<()> {
    if !file.exists() {
        bail!("Config file not found: {}", file.display());
    }
    tracing::info!(file = %file.display(), cluster, "Validating config");

    if cluster {
        let config = ClusterConfig::from_file(file)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        if let Err(reason) = config.validate() {
            println!("✗ {}", reason);
            bail!("Node config validation failed");
        }
        println!("✓ Node config is valid");
        println!("  Node:       {}", config.node_id());
        println!("  Gossip:     {}", config.gossip_advertise_addr());
        println!("  Raft:       {}", config.raft_advertise_addr());
        println!("  Seeds:      {}", config.seeds.len());
        println!("  Data dir:   {}", config.data_dir.display());
        return Ok(());
    }

    let config = load_config(file).with_context(|| format!("Failed to parse {}", file.display()))?;

    let mut ids: Vec<&str> = config.projects.iter().map(|p| p.id.as_str()).collect();
    ids.sort_unstable();
    let duplicate = ids.windows(2).find(|pair| pair[0] == pair[1]).map(|pair| pair[0]);
    if let Some(id) = duplicate {
        println!("✗ Project {} is defined more than once", id);
        bail!("Config validation failed");
    }

    println!("✓ Config is valid");
    println!("  Projects:         {}", config.projects.len());
    for project in &config.projects {
        println!(
            "    - {} ({} databases, {} eventing rules)",
            project.id,
            project.modules.crud.len(),
            project.modules.eventing.rules.len()
        );
    }
    println!("  Static routes:    {}", config.static_config.routes.len());
    println!("  Internal routes:  {}", config.static_config.internal_routes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::{Config, Project, store_config};

    #[test]
    fn test_validate_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.upsert_project(Project::new("todo"));
        store_config(&config, &path).unwrap();

        validate(&path, false).unwrap();
    }

    #[test]
    fn test_rejects_duplicate_projects() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            projects: vec![Project::new("a"), Project::new("a")],
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        assert!(validate(&path, false).is_err());
    }

    #[test]
    fn test_validate_cluster_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, "raft_addr: 127.0.0.1:7001\nmax_tokens: 0\n").unwrap();

        assert!(validate(&path, true).is_err());
        assert!(validate(&dir.path().join("missing.yaml"), false).is_err());
    }
}
