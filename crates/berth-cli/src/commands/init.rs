use super::{fail, json_pretty, EXIT_SUCCESS};
use berth_core::{Engine, EngineConfig, PoolConfig};
use berth_runtime::{check_checkpoint_prereqs, format_missing};
use std::path::{Path, PathBuf};

/// Write a config when none exists, then register its pools and create the
/// default profile on the first one.
pub fn run(config_path: &Path, var_dir: Option<PathBuf>, json: bool) -> Result<u8, String> {
    let mut config = EngineConfig::load(config_path).map_err(|e| fail(&e))?;
    let written = !config_path.exists();
    if written {
        if let Some(dir) = var_dir {
            config.var_dir = dir;
        }
        if config.pools.is_empty() {
            config.pools.push(PoolConfig {
                name: "default".to_owned(),
                driver: "dir".to_owned(),
                source: config.var_dir.join("pools").join("default"),
            });
        }
        config.save(config_path).map_err(|e| fail(&e))?;
    }

    let pool = config
        .pools
        .first()
        .map(|p| p.name.clone())
        .ok_or_else(|| {
            format!(
                "no storage pools configured; add a [[pools]] entry to {}",
                config_path.display()
            )
        })?;
    let engine = Engine::from_config(&config).map_err(|e| fail(&e))?;
    let profile = engine.ensure_default_profile(&pool).map_err(|e| fail(&e))?;

    if json {
        let payload = serde_json::json!({
            "config": config_path,
            "config_written": written,
            "var_dir": config.var_dir,
            "pools": config.pools.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "default_profile": profile.name,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if written {
            println!("wrote {}", config_path.display());
        }
        println!(
            "initialized {} with default profile on pool '{pool}'",
            config.var_dir.display()
        );
        let missing = check_checkpoint_prereqs();
        if !missing.is_empty() {
            eprint!("note: stateful snapshots unavailable, {}", format_missing(&missing));
        }
    }
    Ok(EXIT_SUCCESS)
}
