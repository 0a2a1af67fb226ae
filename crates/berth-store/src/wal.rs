use crate::layout::StoreLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

static OP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A single compensating action that undoes part of an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RollbackStep {
    /// Remove a directory tree (e.g. a snapshot state directory).
    RemoveDir(PathBuf),
    /// Remove a single file (e.g. an imported image file).
    RemoveFile(PathBuf),
    /// Remove a container or snapshot record from the catalog.
    RemoveContainer { name: String },
    /// Remove a backup record from the catalog.
    RemoveBackup { name: String },
    /// Delete an instance's volume from a storage pool.
    DeleteVolume { pool: String, name: String },
}

impl RollbackStep {
    /// Execute filesystem steps directly.
    ///
    /// Returns `false` for steps that need the catalog or a storage driver.
    pub fn apply_local(&self) -> bool {
        match self {
            RollbackStep::RemoveDir(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_dir_all(path) {
                        warn!("rollback: failed to remove dir {}: {e}", path.display());
                    } else {
                        debug!("rollback: removed dir {}", path.display());
                    }
                }
                true
            }
            RollbackStep::RemoveFile(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("rollback: failed to remove file {}: {e}", path.display());
                    } else {
                        debug!("rollback: removed file {}", path.display());
                    }
                }
                true
            }
            RollbackStep::RemoveContainer { .. }
            | RollbackStep::RemoveBackup { .. }
            | RollbackStep::DeleteVolume { .. } => false,
        }
    }
}

impl std::fmt::Display for RollbackStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStep::RemoveDir(p) => write!(f, "remove dir {}", p.display()),
            RollbackStep::RemoveFile(p) => write!(f, "remove file {}", p.display()),
            RollbackStep::RemoveContainer { name } => write!(f, "remove record '{name}'"),
            RollbackStep::RemoveBackup { name } => write!(f, "remove backup record '{name}'"),
            RollbackStep::DeleteVolume { pool, name } => {
                write!(f, "delete volume '{name}' on pool '{pool}'")
            }
        }
    }
}

/// The lifecycle operation being tracked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalOpKind {
    CreateEmpty,
    CreateEmptySnapshot,
    CreateFromImage,
    CreateAsCopy,
    CreateAsSnapshot,
    CreateFromBackup,
    BackupCreate,
}

impl std::fmt::Display for WalOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalOpKind::CreateEmpty => write!(f, "create-empty"),
            WalOpKind::CreateEmptySnapshot => write!(f, "create-empty-snapshot"),
            WalOpKind::CreateFromImage => write!(f, "create-from-image"),
            WalOpKind::CreateAsCopy => write!(f, "create-as-copy"),
            WalOpKind::CreateAsSnapshot => write!(f, "create-as-snapshot"),
            WalOpKind::CreateFromBackup => write!(f, "create-from-backup"),
            WalOpKind::BackupCreate => write!(f, "backup-create"),
        }
    }
}

/// A journal entry representing an in-flight operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: WalOpKind,
    /// Name of the container or backup the operation creates.
    pub target: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead log for crash recovery.
///
/// Lifecycle operations open an entry before their first side effect, append
/// a compensating step after each one, and remove the entry on commit or
/// after an in-process unwind. Entries left behind by a crash are replayed in
/// reverse on the next start.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            wal_dir: layout.wal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new entry for an operation. Returns the op_id.
    pub fn begin(&self, kind: WalOpKind, target: &str) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let seq = OP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{kind}:{target}:{}:{seq}", std::process::id());
        let op_id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%6f"),
            &blake3::hash(seed.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            kind,
            target: target.to_owned(),
            timestamp: now.to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("WAL begin: {kind} for {target} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Remove an entry once its operation completed or was unwound in process.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("WAL commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<WalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt WAL entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!("unreadable WAL entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Replay every incomplete entry's steps in reverse through `undo`, then
    /// drop the entry. Returns the number of entries rolled back.
    pub fn recover<F>(&self, mut undo: F) -> Result<usize, StoreError>
    where
        F: FnMut(&RollbackStep),
    {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in &entries {
            info!(
                "WAL recovery: rolling back {} of {} (op_id={})",
                entry.kind, entry.target, entry.op_id
            );
            for step in entry.rollback_steps.iter().rev() {
                undo(step);
            }
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("WAL recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.wal_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.wal_dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}
