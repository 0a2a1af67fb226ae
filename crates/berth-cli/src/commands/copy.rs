use super::{fail, json_pretty, with_spinner, EXIT_SUCCESS};
use berth_core::{copy_args, Engine};
use berth_runtime::InstanceIdentity;

pub fn run(
    engine: &Engine,
    source: &str,
    target: &str,
    container_only: bool,
    json: bool,
) -> Result<u8, String> {
    let source = engine.load_by_name(source).map_err(|e| fail(&e))?;
    let args = copy_args(&source, target);
    let copy = with_spinner(json, &format!("copying {} to {target}...", source.name()), || {
        engine.create_as_copy(args, &source, container_only)
    })?;
    let snapshots = engine
        .catalog()
        .container_snapshots(copy.name())
        .map_err(|e| fail(&e.into()))?;

    if json {
        let payload = serde_json::json!({
            "source": source.name(),
            "name": copy.name(),
            "snapshots": snapshots,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "copied '{}' to '{}' ({} snapshot(s))",
            source.name(),
            copy.name(),
            snapshots.len()
        );
    }
    Ok(EXIT_SUCCESS)
}
