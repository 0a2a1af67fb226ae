use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current catalog format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of the on-disk catalog.
///
/// Every record kind lives in its own directory under `<root>/catalog`.
/// Subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn catalog_dir(&self) -> PathBuf {
        self.root.join("catalog")
    }

    #[inline]
    pub fn containers_dir(&self) -> PathBuf {
        self.catalog_dir().join("containers")
    }

    #[inline]
    pub fn profiles_dir(&self) -> PathBuf {
        self.catalog_dir().join("profiles")
    }

    #[inline]
    pub fn pools_dir(&self) -> PathBuf {
        self.catalog_dir().join("pools")
    }

    #[inline]
    pub fn images_dir(&self) -> PathBuf {
        self.catalog_dir().join("images")
    }

    #[inline]
    pub fn backups_dir(&self) -> PathBuf {
        self.catalog_dir().join("backups")
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.catalog_dir().join("wal")
    }

    #[inline]
    pub fn sequence_file(&self) -> PathBuf {
        self.catalog_dir().join("sequence")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.catalog_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.containers_dir())?;
        fs::create_dir_all(self.profiles_dir())?;
        fs::create_dir_all(self.pools_dir())?;
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        fs::create_dir_all(self.wal_dir())?;

        let version_path = self.catalog_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let dir = self.catalog_dir();
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.catalog_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
