use super::{fail, json_pretty, with_spinner, EXIT_SUCCESS};
use berth_core::{snapshot_args, Engine};
use berth_runtime::{InstanceConfig, InstanceIdentity};

pub fn run(
    engine: &Engine,
    container: &str,
    name: &str,
    stateful: bool,
    json: bool,
) -> Result<u8, String> {
    let source = engine.load_by_name(container).map_err(|e| fail(&e))?;
    let args = snapshot_args(&source, name, stateful);
    let snap = with_spinner(json, &format!("snapshotting {container}..."), || {
        engine.create_as_snapshot(args, &source)
    })?;

    if json {
        let payload = serde_json::json!({
            "name": snap.name(),
            "stateful": snap.is_stateful(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("created snapshot '{}'", snap.name());
    }
    Ok(EXIT_SUCCESS)
}
