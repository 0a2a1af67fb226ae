//! Image transfer between berth cluster nodes.
//!
//! When the catalog reports that an image file lives on another node, the
//! orchestrator pulls it through an `ImageTransfer` before materializing a
//! container from it. `HttpImageTransfer` fetches the export over HTTP with a
//! bearer token and verifies the blake3 fingerprint before keeping the file.

pub mod config;
pub mod http;

pub use config::ClusterConfig;
pub use http::HttpImageTransfer;

use berth_schema::NodeAddress;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Protocol version sent as `X-Berth-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cluster config error: {0}")]
    Config(String),
    #[error("integrity failure for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
}

pub trait ImageTransfer: Send + Sync {
    /// Fetch image `fingerprint` from `node` into `dest_dir`. Returns the path
    /// of the stored file.
    fn import_image(
        &self,
        node: &NodeAddress,
        fingerprint: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failure_display() {
        let e = RemoteError::IntegrityFailure {
            key: "abc".to_owned(),
            expected: "abc".to_owned(),
            actual: "def".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("def"));
    }
}
