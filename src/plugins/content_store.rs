//! Content-addressed storage for specification documents and bundles.
//!
//! Pointers have the form `<scheme>://<cid>[/<path>]`. A bare identifier with no scheme is
//! accepted and resolved against the store's default scheme.

use crate::core::error::SynthesisError;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer {
    pub scheme: String,
    pub cid: String,
    pub path: Option<String>,
}

impl Pointer {
    pub fn parse(raw: &str) -> Result<Self, SynthesisError> {
        Self::parse_with_default(raw, "")
    }

    pub fn parse_with_default(raw: &str, default_scheme: &str) -> Result<Self, SynthesisError> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None if !default_scheme.is_empty() => (default_scheme, raw),
            None => {
                return Err(SynthesisError::ValidationError(format!(
                    "content pointer '{}' has no scheme",
                    raw
                )));
            }
        };
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(SynthesisError::ValidationError(format!(
                "content pointer '{}' has an invalid scheme",
                raw
            )));
        }
        let (cid, path) = match rest.split_once('/') {
            Some((cid, path)) => {
                let path = path.trim_matches('/');
                (cid, (!path.is_empty()).then(|| path.to_string()))
            }
            None => (rest, None),
        };
        if cid.is_empty() {
            return Err(SynthesisError::ValidationError(format!(
                "content pointer '{}' has no content id",
                raw
            )));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            cid: cid.to_string(),
            path,
        })
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.cid)?;
        if let Some(path) = &self.path {
            write!(f, "/{}", path)?;
        }
        Ok(())
    }
}

/// Name/value metadata attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTag {
    pub name: String,
    pub value: String,
}

impl ContentTag {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

pub trait ContentStore {
    fn get(&self, pointer: &Pointer) -> Result<Vec<u8>, SynthesisError>;

    fn put(&self, bytes: &[u8], tags: &[ContentTag]) -> Result<Pointer, SynthesisError>;

    /// Scheme used for bare identifiers.
    fn scheme(&self) -> &str;

    fn fetch(&self, raw_pointer: &str) -> Result<Vec<u8>, SynthesisError> {
        let pointer = Pointer::parse_with_default(raw_pointer, self.scheme())?;
        self.get(&pointer)
    }
}

pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reject absolute paths and `..` so bundle paths stay inside their directory.
fn safe_relative(path: &str) -> Result<PathBuf, SynthesisError> {
    let candidate = Path::new(path);
    if candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Ok(candidate.to_path_buf())
    } else {
        Err(SynthesisError::ValidationError(format!(
            "bundle path '{}' escapes its bundle",
            path
        )))
    }
}

/// Files on disk, one per CID; bundles are directories.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

pub const LOCAL_SCHEME: &str = "local";

impl LocalContentStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store several named files under one CID derived from their names and contents.
    pub fn put_bundle(&self, files: &[(&str, &[u8])]) -> Result<Pointer, SynthesisError> {
        let mut entries: Vec<(&str, &[u8])> = files.to_vec();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut hasher = Sha256::new();
        for (name, bytes) in &entries {
            safe_relative(name)?;
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(content_id(bytes).as_bytes());
        }
        let cid = hex::encode(hasher.finalize());
        let dir = self.root.join(&cid);
        for (name, bytes) in &entries {
            let target = dir.join(safe_relative(name)?);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, bytes)?;
        }
        debug!(cid = %cid, files = entries.len(), "bundle stored");
        Ok(Pointer {
            scheme: LOCAL_SCHEME.to_string(),
            cid,
            path: None,
        })
    }
}

impl ContentStore for LocalContentStore {
    fn get(&self, pointer: &Pointer) -> Result<Vec<u8>, SynthesisError> {
        let base = self.root.join(safe_relative(&pointer.cid)?);
        let target = match &pointer.path {
            Some(path) => base.join(safe_relative(path)?),
            None => base,
        };
        if !target.is_file() {
            return Err(SynthesisError::NotFound(format!("content {}", pointer)));
        }
        Ok(fs::read(target)?)
    }

    fn put(&self, bytes: &[u8], tags: &[ContentTag]) -> Result<Pointer, SynthesisError> {
        fs::create_dir_all(&self.root)?;
        let cid = content_id(bytes);
        fs::write(self.root.join(&cid), bytes)?;
        if !tags.is_empty() {
            fs::write(
                self.root.join(format!("{}.tags.json", cid)),
                serde_json::to_vec_pretty(tags)?,
            )?;
        }
        Ok(Pointer {
            scheme: LOCAL_SCHEME.to_string(),
            cid,
            path: None,
        })
    }

    fn scheme(&self) -> &str {
        LOCAL_SCHEME
    }
}

#[derive(Debug, Deserialize)]
struct UploadReceipt {
    id: String,
}

/// Read through an HTTP gateway (`GET <gateway>/<cid>[/<path>]`), upload by POSTing raw
/// bytes with tags as `X-Tag-<Name>` headers.
pub struct GatewayContentStore {
    client: HttpClient,
    gateway_url: String,
    upload_url: Option<String>,
    scheme: String,
}

impl GatewayContentStore {
    pub fn new(
        gateway_url: &str,
        upload_url: Option<&str>,
        scheme: &str,
        timeout: Duration,
    ) -> Result<Self, SynthesisError> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.map(|u| u.trim_end_matches('/').to_string()),
            scheme: scheme.to_string(),
        })
    }

    pub fn object_url(&self, pointer: &Pointer) -> String {
        match &pointer.path {
            Some(path) => format!("{}/{}/{}", self.gateway_url, pointer.cid, path),
            None => format!("{}/{}", self.gateway_url, pointer.cid),
        }
    }
}

impl ContentStore for GatewayContentStore {
    fn get(&self, pointer: &Pointer) -> Result<Vec<u8>, SynthesisError> {
        let url = self.object_url(pointer);
        debug!(url = %url, "fetching content");
        let response = self.client.get(&url).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SynthesisError::NotFound(format!("content {}", pointer)));
        }
        let bytes = response.error_for_status()?.bytes()?;
        Ok(bytes.to_vec())
    }

    fn put(&self, bytes: &[u8], tags: &[ContentTag]) -> Result<Pointer, SynthesisError> {
        let upload_url = self.upload_url.as_deref().ok_or_else(|| {
            SynthesisError::ConfigError("content.upload_url is not configured".into())
        })?;
        let mut request = self.client.post(upload_url).body(bytes.to_vec());
        for tag in tags {
            request = request.header(format!("X-Tag-{}", tag.name), tag.value.as_str());
        }
        let receipt: UploadReceipt = request.send()?.error_for_status()?.json()?;
        Ok(Pointer {
            scheme: self.scheme.clone(),
            cid: receipt.id,
            path: None,
        })
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }
}
