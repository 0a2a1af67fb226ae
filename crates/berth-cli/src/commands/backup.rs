use super::{fail, json_pretty, with_spinner, EXIT_SUCCESS};
use berth_core::Engine;
use berth_runtime::InstanceConfig;
use berth_schema::BackupArgs;

pub fn run(
    engine: &Engine,
    container: &str,
    name: &str,
    container_only: bool,
    optimized: bool,
    json: bool,
) -> Result<u8, String> {
    let source = engine.load_by_name(container).map_err(|e| fail(&e))?;
    let args = BackupArgs {
        name: format!("{container}/{name}"),
        container_id: source.id(),
        creation_date: chrono::Utc::now(),
        expiry_date: None,
        container_only,
        optimized_storage: optimized,
    };
    let backup = with_spinner(json, &format!("backing up {container}..."), || {
        engine.backup_create(args, &source)
    })?;
    let archive = engine.archive_path(&backup.record.name);

    if json {
        let payload = serde_json::json!({
            "backup": backup.record,
            "archive": archive,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "backup '{}' written to {}",
            backup.short_name(),
            archive.display()
        );
    }
    Ok(EXIT_SUCCESS)
}
