use super::{colorize_kind, fail, json_pretty, EXIT_SUCCESS};
use berth_core::Engine;
use berth_runtime::{InstanceConfig, InstanceIdentity, InstanceStorage};
use serde::Serialize;

#[derive(Serialize)]
struct Row {
    name: String,
    kind: String,
    architecture: String,
    pool: String,
    snapshots: Vec<String>,
}

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let names = engine.catalog().list_containers().map_err(|e| fail(&e.into()))?;
    let mut rows = Vec::with_capacity(names.len());
    for name in &names {
        let inst = engine.load_by_name(name).map_err(|e| fail(&e))?;
        let snapshots = engine
            .catalog()
            .container_snapshots(name)
            .map_err(|e| fail(&e.into()))?;
        rows.push(Row {
            name: inst.name().to_owned(),
            kind: inst.record().kind.to_string(),
            architecture: inst.architecture().to_string(),
            pool: inst.pool().to_owned(),
            snapshots,
        });
    }

    if json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no containers found");
    } else {
        println!("{:<20} {:<10} {:<8} {:<12} SNAPSHOTS", "NAME", "KIND", "ARCH", "POOL");
        for row in &rows {
            println!(
                "{:<20} {:<10} {:<8} {:<12} {}",
                row.name,
                colorize_kind(&row.kind),
                row.architecture,
                row.pool,
                row.snapshots.len()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
