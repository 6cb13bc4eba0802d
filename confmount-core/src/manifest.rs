//! YAML manifests for locally stored resources.
//!
//! # Layout
//!
//! ```text
//! <store>/
//!   <namespace>/
//!     <name>.yaml
//! ```
//!
//! # Format
//!
//! ```yaml
//! kind: ConfigMap            # or Secret; optional
//! metadata:
//!   name: cfg                # optional, must match when present
//!   resourceVersion: "42"    # optional
//! data:
//!   app.conf: "x=1"
//! binaryData:                # ConfigMap only, base64
//!   logo.png: iVBORw0KGgo=
//! ```
//!
//! For a `Secret`, `data` values are base64 and `stringData` holds plain text
//! that overrides `data` on key collision.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::{io_err, ResourceError};
use crate::types::{ResourceKind, ResourceRef, Snapshot};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    binary_data: BTreeMap<String, String>,
    #[serde(default)]
    string_data: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    resource_version: Option<String>,
}

/// `<store>/<namespace>/<name>.yaml`. Pure, no I/O.
pub fn manifest_path(store: &Path, resource: &ResourceRef) -> PathBuf {
    store
        .join(&resource.namespace)
        .join(format!("{}.yaml", resource.name))
}

/// Read and decode the manifest for `resource`.
///
/// `fallback_version` is used when the manifest has no `resourceVersion`.
pub fn load_snapshot(
    path: &Path,
    resource: &ResourceRef,
    fallback_version: impl FnOnce() -> String,
) -> Result<Snapshot, ResourceError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResourceError::NotFound {
                kind: resource.kind.to_string(),
                key: resource.key(),
            })
        }
        Err(err) => return Err(io_err(path, err)),
    };
    parse_snapshot(&contents, resource, fallback_version).map_err(|err| match err {
        ResourceError::Parse { source, .. } => ResourceError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Decode manifest text into a snapshot.
pub fn parse_snapshot(
    contents: &str,
    resource: &ResourceRef,
    fallback_version: impl FnOnce() -> String,
) -> Result<Snapshot, ResourceError> {
    // An empty document is an object with no data.
    let manifest: Manifest = if contents.trim().is_empty() {
        Manifest::default()
    } else {
        serde_yaml::from_str(contents).map_err(|source| ResourceError::Parse {
            path: PathBuf::new(),
            source,
        })?
    };

    if let Some(kind) = manifest.kind.as_deref() {
        if kind != resource.kind.to_string() {
            return Err(ResourceError::Mismatch {
                expected: resource.kind.to_string(),
                found: kind.to_string(),
            });
        }
    }
    if let Some(name) = manifest.metadata.name.as_deref() {
        if name != resource.name {
            return Err(ResourceError::Mismatch {
                expected: resource.name.clone(),
                found: name.to_string(),
            });
        }
    }

    let data = match resource.kind {
        ResourceKind::ConfigMap => {
            let mut data: BTreeMap<String, Vec<u8>> = manifest
                .data
                .into_iter()
                .map(|(k, v)| (k, v.into_bytes()))
                .collect();
            for (key, encoded) in manifest.binary_data {
                let decoded = decode(&key, &encoded)?;
                data.insert(key, decoded);
            }
            data
        }
        ResourceKind::Secret => {
            let mut data = BTreeMap::new();
            for (key, encoded) in manifest.data {
                let decoded = decode(&key, &encoded)?;
                data.insert(key, decoded);
            }
            for (key, value) in manifest.string_data {
                data.insert(key, value.into_bytes());
            }
            data
        }
    };

    let version = manifest
        .metadata
        .resource_version
        .unwrap_or_else(fallback_version);
    Ok(Snapshot::new(data, version))
}

fn decode(key: &str, encoded: &str) -> Result<Vec<u8>, ResourceError> {
    let compact: String = encoded.split_whitespace().collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|source| ResourceError::Decode {
            key: key.to_string(),
            source,
        })
}
