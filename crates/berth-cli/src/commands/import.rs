use super::{fail, json_pretty, with_spinner, EXIT_SUCCESS};
use berth_core::{read_index, Engine};
use berth_runtime::{InstanceIdentity, InstanceStorage};
use std::path::Path;

pub fn run(engine: &Engine, archive: &Path, json: bool) -> Result<u8, String> {
    let info = read_index(archive).map_err(|e| fail(&e))?;
    let inst = with_spinner(json, &format!("importing {}...", info.name), || {
        engine.create_from_backup(&info, archive)
    })?;

    if json {
        let payload = serde_json::json!({
            "name": inst.name(),
            "pool": inst.pool(),
            "snapshots": info.snapshots,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("imported '{}' into pool '{}'", inst.name(), inst.pool());
    }
    Ok(EXIT_SUCCESS)
}
