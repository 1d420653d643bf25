use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::{Method, RequestBuilder, StatusCode};
use tempfile::TempDir;
use thiserror::Error;

use crate::config::Config;

/// Local name of the downloaded export inside the scratch directory.
pub const SNAPSHOT_FILENAME: &str = "gadgetbridge.sqlite";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("export file {filename} does not exist under {dir}")]
    ExportMissing { dir: String, filename: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("unexpected WebDAV response: {0}")]
    Protocol(String),

    #[error("scratch directory i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// The remote file store holding the export.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Names of the entries directly under `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>, FetchError>;

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), FetchError>;
}

/// Freshly created directory holding the downloaded export. Removed with
/// everything in it when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("gadgetbridge-").tempdir()?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.path().join(SNAPSHOT_FILENAME)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        debug!("Removing scratch directory {}", self.dir.path().display());
    }
}

/// Locate `filename` under `dir` on the store and download it into a new
/// scratch directory. A missing export is reported before anything is
/// created locally.
pub async fn fetch_export<S: RemoteStore>(
    store: &S,
    dir: &str,
    filename: &str,
) -> Result<ScratchDir, FetchError> {
    let entries = store.list(dir).await?;
    debug!("Remote listing of {dir}: {entries:?}");
    if !entries.iter().any(|entry| entry == filename) {
        return Err(FetchError::ExportMissing {
            dir: dir.to_string(),
            filename: filename.to_string(),
        });
    }

    let scratch = ScratchDir::create()?;
    let remote_path = join_remote(dir, filename);
    info!(
        "Downloading {remote_path} to {}",
        scratch.snapshot_path().display()
    );
    store.download(&remote_path, &scratch.snapshot_path()).await?;
    Ok(scratch)
}

fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Reduce a PROPFIND multistatus body to the entry names it lists, leaving
/// out the collection that was queried. Names come back decoded.
pub fn parse_listing(body: &str, dir: &str) -> Result<Vec<String>, FetchError> {
    let href = Regex::new(r"(?is)<(?:[a-z0-9_-]+:)?href[^>]*>(.*?)</(?:[a-z0-9_-]+:)?href>")
        .map_err(|err| FetchError::Protocol(err.to_string()))?;
    let queried: Vec<String> = dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    let mut names = Vec::new();
    for caps in href.captures_iter(body) {
        let Some(raw) = caps.get(1) else { continue };
        let segments = href_segments(raw.as_str())?;
        if !queried.is_empty() && segments.ends_with(&queried) {
            continue;
        }
        if let Some(name) = segments.last() {
            names.push(name.clone());
        }
    }
    Ok(names)
}

// Hrefs are XML-escaped and percent-encoded; decode each path segment so an
// encoded '/' stays inside its segment.
fn href_segments(raw: &str) -> Result<Vec<String>, FetchError> {
    let unescaped = html_escape::decode_html_entities(raw.trim());
    unescaped
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|err| FetchError::Protocol(format!("href {raw} is not UTF-8: {err}")))
        })
        .collect()
}

pub struct WebDavStore {
    client: reqwest::Client,
    base_url: String,
    user: Option<String>,
    pass: Option<String>,
}

impl WebDavStore {
    pub fn new(base_url: &str, user: Option<String>, pass: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user,
            pass,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.webdav_url,
            config.webdav_user.clone(),
            config.webdav_pass.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.user {
            Some(user) => request.basic_auth(user, self.pass.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = request.send().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

impl RemoteStore for WebDavStore {
    async fn list(&self, dir: &str) -> Result<Vec<String>, FetchError> {
        let url = self.url(dir);
        let propfind = Method::from_bytes(b"PROPFIND")
            .map_err(|err| FetchError::Protocol(err.to_string()))?;
        let request = self
            .request(propfind, &url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY);
        let body = self
            .send(request, &url)
            .await?
            .text()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;
        parse_listing(&body, dir)
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), FetchError> {
        let url = self.url(remote_path);
        let request = self.request(Method::GET, &url);
        let bytes = self
            .send(request, &url)
            .await?
            .bytes()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;
        tokio::fs::write(local_path, &bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), local_path.display());
        Ok(())
    }
}
