//! CronTab manifests on disk as a resource source.
//!
//! A manifest file holds one or more YAML documents. Each document is a
//! single `CronTab`, a sequence of them, or a `kind: List` with `items`.
//! The file is re-read on every listing, so edits show up at the next
//! relist.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use informer::{Resource, ResourceSource};
use serde::Deserialize;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crontab::CronTab;

/// Manifest loading errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Lists `CronTab`s from a manifest file.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResourceSource<CronTab> for ManifestSource {
    async fn list(&self) -> informer::Result<Vec<CronTab>> {
        let crontabs = load_manifests(&self.path)
            .await
            .map_err(|e| informer::Error::list_failed(CronTab::KIND, e.to_string()))?;
        debug!(path = %self.path.display(), count = crontabs.len(), "Listed manifests");
        Ok(crontabs)
    }
}

/// Read and parse the manifest file at `path`.
///
/// # Errors
///
/// Fails if the file cannot be read or is not valid YAML of the expected shape.
pub async fn load_manifests(path: &Path) -> Result<Vec<CronTab>, ManifestError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_manifests(&text).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse manifest text.
///
/// Documents of another kind are skipped. Objects without a resource
/// version get one derived from their content, so an unchanged object keeps
/// its version across reads.
///
/// # Errors
///
/// Fails on invalid YAML or on a `CronTab` document that does not match the schema.
pub fn parse_manifests(text: &str) -> Result<Vec<CronTab>, serde_yaml::Error> {
    let mut crontabs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        collect(Value::deserialize(document)?, &mut crontabs)?;
    }
    for crontab in &mut crontabs {
        if crontab.metadata.resource_version.is_empty() {
            crontab.metadata.resource_version = content_version(crontab);
        }
    }
    Ok(crontabs)
}

fn collect(value: Value, out: &mut Vec<CronTab>) -> Result<(), serde_yaml::Error> {
    match value {
        Value::Null => Ok(()),
        Value::Sequence(items) => items.into_iter().try_for_each(|item| collect(item, out)),
        Value::Mapping(mut mapping) => {
            let kind = mapping
                .get("kind")
                .and_then(Value::as_str)
                .map(str::to_owned);
            match kind.as_deref() {
                Some("List") => collect(mapping.remove("items").unwrap_or(Value::Null), out),
                Some(kind) if kind != CronTab::KIND => {
                    warn!(kind, "Skipping manifest document of another kind");
                    Ok(())
                }
                _ => {
                    out.push(serde_yaml::from_value(Value::Mapping(mapping))?);
                    Ok(())
                }
            }
        }
        other => {
            warn!(value = ?other, "Skipping manifest document that is not an object");
            Ok(())
        }
    }
}

/// Short hex digest of the object's canonical JSON form.
fn content_version(crontab: &CronTab) -> String {
    let canonical = serde_json::to_vec(crontab).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    digest.iter().take(8).fold(String::with_capacity(16), |mut hex, byte| {
        let _ = write!(hex, "{byte:02x}");
        hex
    })
}
