use crate::engine::Engine;
use crate::CoreError;
use berth_store::ImageRecord;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

impl Engine {
    /// Add an image tarball to this node's image store, keyed by its blake3
    /// fingerprint. Importing the same file twice yields the same record.
    pub fn import_image_file(
        &self,
        tarball: &Path,
        properties: BTreeMap<String, String>,
    ) -> Result<ImageRecord, CoreError> {
        let architecture = self.host.default_architecture().ok_or_else(|| {
            CoreError::NotFound("this host reports no supported architecture".to_owned())
        })?;
        let images_dir = self.images_dir();
        fs::create_dir_all(&images_dir)?;

        let mut tmp = NamedTempFile::new_in(&images_dir)?;
        let mut hasher = blake3::Hasher::new();
        let mut src = File::open(tarball)?;
        let size = io::copy(&mut src, &mut TeeWriter {
            file: tmp.as_file_mut(),
            hasher: &mut hasher,
        })?;
        tmp.as_file().sync_all()?;
        let fingerprint = hasher.finalize().to_hex().to_string();

        match self.catalog.get_image(&fingerprint) {
            Ok(existing) => {
                info!("image {fingerprint} already present");
                return Ok(existing);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        tmp.persist(images_dir.join(&fingerprint))
            .map_err(|e| CoreError::Io(e.error))?;
        File::open(&images_dir)?.sync_all()?;

        let record = ImageRecord {
            fingerprint: fingerprint.clone(),
            filename: tarball
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            architecture,
            properties,
            created_at: chrono::Utc::now(),
            last_use_date: None,
            nodes: vec![self.catalog.node_address().clone()],
        };
        self.catalog.put_image(&record)?;
        info!("added image {fingerprint} ({size} bytes)");
        Ok(record)
    }
}

/// Writes through to the file while hashing.
struct TeeWriter<'a> {
    file: &'a mut File,
    hasher: &'a mut blake3::Hasher,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
