pub mod backup;
pub mod copy;
pub mod create;
pub mod image;
pub mod import;
pub mod init;
pub mod list;
pub mod snapshot;
pub mod validate;

use berth_core::{CoreError, Engine, EngineConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_CATALOG_ERROR: u8 = 3;

const VALIDATION_PREFIX: &str = "invalid configuration:";
const CATALOG_PREFIX: &str = "catalog error:";

/// Render an engine error, prefixed so `exit_code` can classify it.
pub fn fail(e: &CoreError) -> String {
    match e {
        CoreError::Validation(_) => format!("{VALIDATION_PREFIX} {e}"),
        _ => e.to_string(),
    }
}

pub fn exit_code(msg: &str) -> u8 {
    if msg.starts_with(VALIDATION_PREFIX) {
        EXIT_VALIDATION_ERROR
    } else if msg.starts_with(CATALOG_PREFIX) {
        EXIT_CATALOG_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn open_engine(config_path: &Path) -> Result<Engine, String> {
    let config = EngineConfig::load(config_path).map_err(|e| fail(&e))?;
    Engine::from_config(&config).map_err(|e| fail(&e))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Parse repeated `key=value` arguments.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>, String> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .ok_or_else(|| format!("expected key=value, got '{pair}'"))
        })
        .collect()
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` behind a spinner unless JSON output was asked for.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    if json {
        return op().map_err(|e| fail(&e));
    }
    let pb = spinner(msg);
    match op() {
        Ok(value) => {
            spin_ok(&pb, msg);
            Ok(value)
        }
        Err(e) => {
            spin_fail(&pb, msg);
            Err(fail(&e))
        }
    }
}

pub fn colorize_kind(kind: &str) -> String {
    use console::Style;
    match kind {
        "container" => Style::new().green().apply_to(kind).to_string(),
        "snapshot" => Style::new().cyan().apply_to(kind).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::ValidationError;

    #[test]
    fn validation_errors_exit_with_2() {
        let e = CoreError::Validation(ValidationError::UnknownKey("foo".to_owned()));
        let msg = fail(&e);
        assert_eq!(msg, "invalid configuration: Unknown configuration key: foo");
        assert_eq!(exit_code(&msg), EXIT_VALIDATION_ERROR);
    }

    #[test]
    fn catalog_errors_exit_with_3() {
        let e = CoreError::Catalog(berth_store::StoreError::InvalidRecord("bad".to_owned()));
        assert_eq!(exit_code(&fail(&e)), EXIT_CATALOG_ERROR);
    }

    #[test]
    fn other_errors_exit_with_1() {
        let e = CoreError::AlreadyExists("Container 'web' already exists".to_owned());
        assert_eq!(exit_code(&fail(&e)), EXIT_FAILURE);
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_VALIDATION_ERROR);
        assert_ne!(EXIT_VALIDATION_ERROR, EXIT_CATALOG_ERROR);
    }

    #[test]
    fn pairs_are_parsed() {
        let pairs = parse_pairs(&["limits.cpu=2".to_owned(), "user.note=a=b".to_owned()]).unwrap();
        assert_eq!(pairs["limits.cpu"], "2");
        assert_eq!(pairs["user.note"], "a=b");
        assert!(parse_pairs(&["novalue".to_owned()]).is_err());
        assert!(parse_pairs(&["=x".to_owned()]).is_err());
    }

    #[test]
    fn colorize_kind_keeps_text() {
        assert!(colorize_kind("snapshot").contains("snapshot"));
        assert_eq!(colorize_kind("other"), "other");
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
