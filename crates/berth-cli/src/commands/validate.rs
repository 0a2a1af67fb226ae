use super::{fail, json_pretty, EXIT_SUCCESS};
use berth_core::{validate_config, validate_devices, validate_name, CoreError, Engine};
use berth_runtime::HostProbe;
use berth_schema::ContainerArgs;
use std::path::Path;

/// Check a JSON `ContainerArgs` document without creating anything.
pub fn run(engine: &Engine, args_path: &Path, json: bool) -> Result<u8, String> {
    let content = std::fs::read_to_string(args_path)
        .map_err(|e| format!("failed to read {}: {e}", args_path.display()))?;
    let args: ContainerArgs = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse {}: {e}", args_path.display()))?;

    check(engine, &args).map_err(|e| fail(&e))?;

    if json {
        let payload = serde_json::json!({ "name": args.name, "valid": true });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("'{}' is valid", args.name);
    }
    Ok(EXIT_SUCCESS)
}

fn check(engine: &Engine, args: &ContainerArgs) -> Result<(), CoreError> {
    if !args.is_snapshot() {
        validate_name(&args.name)?;
    }
    validate_config(engine.host(), &args.config, false, false)?;
    validate_devices(
        engine.catalog(),
        &HostProbe,
        engine.host(),
        &args.devices,
        false,
        false,
    )?;
    Ok(())
}
