//! Firmware sources.
//!
//! An image comes either from a file the operator picked or from the asset
//! server. Both are normalised into a [`Firmware`]: the whole image in memory
//! plus a display name. No validation beyond "bytes were read" happens here.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::config::FlasherConfig;
use crate::error::{Error, Result};

/// File name used when an image has no name.
pub const FALLBACK_FILE_NAME: &str = "firmware.bin";

/// A firmware image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    data: Vec<u8>,
    name: String,
}

impl Firmware {
    /// Create an image from bytes and a display name.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            data,
            name: name.into(),
        }
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name passed to the loader, never empty.
    pub fn file_name(&self) -> &str {
        if self.name.is_empty() {
            FALLBACK_FILE_NAME
        } else {
            &self.name
        }
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fetches static assets by path.
pub trait AssetClient {
    /// GET the asset at `path`, relative to the asset root.
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Asset client over HTTP.
pub struct HttpAssetClient {
    agent: ureq::Agent,
    base_url: String,
    max_bytes: u64,
}

impl HttpAssetClient {
    /// Create a client for assets under `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into(),
            max_bytes,
        }
    }

    /// Create a client from the session configuration.
    pub fn from_config(config: &FlasherConfig) -> Self {
        Self::new(
            config.asset_base_url.clone(),
            config.http_timeout(),
            config.max_firmware_bytes,
        )
    }

    /// URL of an asset.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl AssetClient for HttpAssetClient {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(path);
        debug!("GET {url}");

        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(Error::HttpStatus(code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(Error::Http(transport.to_string()));
            },
        };

        let mut data = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut data)?;

        if data.len() as u64 > self.max_bytes {
            return Err(Error::Http(format!(
                "firmware larger than {} bytes",
                self.max_bytes
            )));
        }
        Ok(data)
    }
}

/// Download a firmware image from the asset server.
pub fn fetch_remote(client: &dyn AssetClient, name: &str) -> Result<Firmware> {
    let data = client.fetch(name)?;
    Ok(Firmware::new(name, data))
}

/// Read a firmware image the operator picked.
///
/// The file is read completely before a [`Firmware`] exists, so a failed read
/// never yields a partial image.
pub fn read_user_file(path: &Path) -> Result<Firmware> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Firmware::new(name, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAssets;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one HTTP response on loopback; the request line is sent back.
    fn serve_once(status: &str, body: Vec<u8>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/assets", listener.local_addr().unwrap());
        let status = status.to_string();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
            }
            tx.send(request_line.trim_end().to_string()).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            // The client may hang up early once the cap is reached.
            let _ = stream.write_all(&body);
        });

        (base, rx)
    }

    fn client(base: &str, max_bytes: u64) -> HttpAssetClient {
        HttpAssetClient::new(base, Duration::from_secs(5), max_bytes)
    }

    #[test]
    fn test_read_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink.bin");
        fs::write(&path, vec![0xE9; 512]).unwrap();

        let firmware = read_user_file(&path).unwrap();
        assert_eq!(firmware.len(), 512);
        assert_eq!(firmware.name(), "blink.bin");
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_user_file(&dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_fetch_remote_uses_name() {
        let assets = FakeAssets::default().with("app.bin", vec![1, 2, 3]);
        let firmware = fetch_remote(&assets, "app.bin").unwrap();
        assert_eq!(firmware.data(), &[1, 2, 3]);
        assert_eq!(firmware.name(), "app.bin");

        assert!(matches!(
            fetch_remote(&assets, "other.bin"),
            Err(Error::HttpStatus(404))
        ));
    }

    #[test]
    fn test_url_joining() {
        let client = HttpAssetClient::new("http://localhost:8050/assets/", Duration::from_secs(1), 1);
        assert_eq!(
            client.url_for("/fw.bin"),
            "http://localhost:8050/assets/fw.bin"
        );
    }

    #[test]
    fn test_unreachable_server_is_http_error() {
        // Port 9 (discard) on loopback is not expected to serve HTTP
        let client = HttpAssetClient::new("http://127.0.0.1:9", Duration::from_millis(200), 1024);
        assert!(matches!(client.fetch("fw.bin"), Err(Error::Http(_))));
    }

    #[test]
    fn test_fetch_requests_asset_path() {
        let (base, requests) = serve_once("200 OK", vec![0xE9; 16]);
        let data = client(&base, 1024).fetch("app.bin").unwrap();

        assert_eq!(data, vec![0xE9; 16]);
        assert_eq!(requests.recv().unwrap(), "GET /assets/app.bin HTTP/1.1");
    }

    #[test]
    fn test_not_found_is_status_error() {
        let (base, _requests) = serve_once("404 Not Found", b"missing".to_vec());
        let err = client(&base, 1024).fetch("app.bin").unwrap_err();

        assert!(matches!(err, Error::HttpStatus(404)));
        assert_eq!(err.to_string(), "HTTP error! status: 404");
    }

    #[test]
    fn test_download_over_cap_is_rejected() {
        let (base, _requests) = serve_once("200 OK", vec![0xA5; 2000]);
        let err = client(&base, 1024).fetch("app.bin").unwrap_err();

        match err {
            Error::Http(msg) => assert_eq!(msg, "firmware larger than 1024 bytes"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_download_at_cap_is_accepted() {
        let (base, _requests) = serve_once("200 OK", vec![0xA5; 1024]);
        let data = client(&base, 1024).fetch("app.bin").unwrap();
        assert_eq!(data.len(), 1024);
    }

    #[test]
    fn test_file_name_fallback() {
        assert_eq!(Firmware::new("", vec![0]).file_name(), FALLBACK_FILE_NAME);
        assert_eq!(Firmware::new("a.bin", vec![0]).file_name(), "a.bin");
    }
}
