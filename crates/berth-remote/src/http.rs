use crate::{ClusterConfig, ImageTransfer, RemoteError};
use berth_schema::NodeAddress;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Pulls image exports from peer nodes.
///
/// Expects each node to serve `GET /1.0/images/<fingerprint>/export` with the
/// raw image tarball. The fingerprint is the blake3 hex digest of that body.
pub struct HttpImageTransfer {
    config: ClusterConfig,
    agent: ureq::Agent,
}

impl HttpImageTransfer {
    pub fn new(config: ClusterConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn export_url(&self, node: &NodeAddress, fingerprint: &str) -> String {
        format!(
            "{}://{}/1.0/images/{fingerprint}/export",
            self.config.scheme, node
        )
    }

    fn open(&self, url: &str) -> Result<impl Read, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Berth-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Ok(resp.into_body().into_reader())
    }
}

impl ImageTransfer for HttpImageTransfer {
    fn import_image(
        &self,
        node: &NodeAddress,
        fingerprint: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteError> {
        let url = self.export_url(node, fingerprint);
        debug!("GET {url}");
        let mut reader = self.open(&url)?;

        std::fs::create_dir_all(dest_dir)?;
        let mut tmp = NamedTempFile::new_in(dest_dir)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            total += n as u64;
        }

        let actual = hasher.finalize().to_hex().to_string();
        if actual != fingerprint {
            return Err(RemoteError::IntegrityFailure {
                key: fingerprint.to_owned(),
                expected: fingerprint.to_owned(),
                actual,
            });
        }

        tmp.as_file().sync_all()?;
        let dest = dest_dir.join(fingerprint);
        tmp.persist(&dest).map_err(|e| RemoteError::Io(e.error))?;
        info!("imported image {fingerprint} from {node} ({total} bytes)");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        headers: HashMap<String, String>,
    }

    /// Serves fixed bodies by path; anything else is a 404.
    struct MockServer {
        node: NodeAddress,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(routes: HashMap<String, Vec<u8>>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let node = NodeAddress::new(listener.local_addr().unwrap().to_string());
            let routes = Arc::new(routes);
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            path: path.clone(),
                            headers,
                        });

                        if let Some(body) = routes.get(&path) {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            );
                            let _ = stream.write_all(head.as_bytes());
                            let _ = stream.write_all(body);
                        } else {
                            let _ = stream.write_all(
                                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            );
                        }
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                node,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn fingerprint(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    fn serve_image(data: &[u8]) -> (MockServer, String) {
        let fp = fingerprint(data);
        let mut routes = HashMap::new();
        routes.insert(format!("/1.0/images/{fp}/export"), data.to_vec());
        (MockServer::start(routes), fp)
    }

    fn transfer(token: Option<&str>) -> HttpImageTransfer {
        let mut config = ClusterConfig::default().with_scheme("http");
        if let Some(token) = token {
            config = config.with_token(token);
        }
        HttpImageTransfer::new(config)
    }

    #[test]
    fn import_stores_verified_image() {
        let (server, fp) = serve_image(b"image tarball bytes");
        let dest = tempfile::tempdir().unwrap();

        let path = transfer(None)
            .import_image(&server.node, &fp, dest.path())
            .unwrap();
        assert_eq!(path, dest.path().join(&fp));
        assert_eq!(std::fs::read(&path).unwrap(), b"image tarball bytes");
    }

    #[test]
    fn import_rejects_mismatched_content() {
        let fp = fingerprint(b"expected");
        let mut routes = HashMap::new();
        routes.insert(format!("/1.0/images/{fp}/export"), b"tampered".to_vec());
        let server = MockServer::start(routes);
        let dest = tempfile::tempdir().unwrap();

        let err = transfer(None)
            .import_image(&server.node, &fp, dest.path())
            .unwrap_err();
        assert!(matches!(err, RemoteError::IntegrityFailure { .. }));
        assert!(!dest.path().join(&fp).exists());
    }

    #[test]
    fn import_missing_image_is_not_found() {
        let server = MockServer::start(HashMap::new());
        let dest = tempfile::tempdir().unwrap();
        let err = transfer(None)
            .import_image(&server.node, "deadbeef", dest.path())
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn import_sends_bearer_token_and_protocol_header() {
        let (server, fp) = serve_image(b"data");
        let dest = tempfile::tempdir().unwrap();
        transfer(Some("secret-token-42"))
            .import_image(&server.node, &fp, dest.path())
            .unwrap();

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].path, format!("/1.0/images/{fp}/export"));
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer secret-token-42".to_owned())
        );
        assert_eq!(reqs[0].headers.get("x-berth-protocol"), Some(&"1".to_owned()));
    }

    #[test]
    fn import_without_token_sends_no_authorization() {
        let (server, fp) = serve_image(b"data");
        let dest = tempfile::tempdir().unwrap();
        transfer(None)
            .import_image(&server.node, &fp, dest.path())
            .unwrap();
        assert!(!server.captured_requests()[0]
            .headers
            .contains_key("authorization"));
    }

    #[test]
    fn connection_refused_returns_error() {
        let dest = tempfile::tempdir().unwrap();
        let result = transfer(None).import_image(
            &NodeAddress::new("127.0.0.1:1"),
            "deadbeef",
            dest.path(),
        );
        assert!(matches!(result, Err(RemoteError::Http(_))));
    }
}
