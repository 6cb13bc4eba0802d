//! Domain types shared by the writer, the controller and the CLI.
//!
//! A [`Snapshot`] is the full payload of one resource at one point in time.
//! Equality of payloads is always decided on [`Snapshot::data`] alone; the
//! resource version is an opaque token and never takes part in comparisons.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

/// Permission bits applied to every projected file unless overridden.
pub const DEFAULT_FILE_MODE: u32 = 0o777;

// ---------------------------------------------------------------------------
// Resource identity
// ---------------------------------------------------------------------------

/// The kind of remote object being projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResourceKind {
    #[default]
    ConfigMap,
    Secret,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::ConfigMap => write!(f, "ConfigMap"),
            ResourceKind::Secret => write!(f, "Secret"),
        }
    }
}

/// Identity of the watched resource. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse `<name>` or `<name>.<namespace>`.
    ///
    /// Only the first `.` separates the namespace. `default_namespace` is
    /// consulted only when the input carries no namespace.
    pub fn parse(
        kind: ResourceKind,
        input: &str,
        default_namespace: impl FnOnce() -> String,
    ) -> Result<Self, ResourceError> {
        let trimmed = input.trim();
        let (name, namespace) = match trimmed.split_once('.') {
            Some((name, namespace)) => (name, Some(namespace)),
            None => (trimmed, None),
        };
        if name.is_empty() {
            return Err(ResourceError::InvalidReference {
                input: input.to_string(),
                reason: "name is empty",
            });
        }
        if name.contains('/') {
            return Err(ResourceError::InvalidReference {
                input: input.to_string(),
                reason: "name must not contain '/'",
            });
        }
        let namespace = match namespace {
            Some("") => {
                return Err(ResourceError::InvalidReference {
                    input: input.to_string(),
                    reason: "namespace after '.' is empty",
                })
            }
            Some(ns) if ns.contains('/') => {
                return Err(ResourceError::InvalidReference {
                    input: input.to_string(),
                    reason: "namespace must not contain '/'",
                })
            }
            Some("." | "..") => {
                return Err(ResourceError::InvalidReference {
                    input: input.to_string(),
                    reason: "namespace must not be '.' or '..'",
                })
            }
            Some(ns) => ns.to_string(),
            None => default_namespace(),
        };
        Ok(Self::new(kind, name, namespace))
    }

    /// Queue key: `<namespace>/<name>`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Snapshots and projections
// ---------------------------------------------------------------------------

/// Full key-value payload of a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: BTreeMap<String, Vec<u8>>,
    pub resource_version: String,
}

impl Snapshot {
    pub fn new(data: BTreeMap<String, Vec<u8>>, resource_version: impl Into<String>) -> Self {
        Self {
            data,
            resource_version: resource_version.into(),
        }
    }

    /// Build a snapshot from string values.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
        resource_version: impl Into<String>,
    ) -> Self {
        let data = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        Self::new(data, resource_version)
    }

    /// Key set and per-key bytes equal; metadata ignored.
    pub fn content_eq(&self, other: &Snapshot) -> bool {
        self.data == other.data
    }

    /// One projection per key, in key order.
    pub fn projections(&self, mode: u32) -> Vec<FileProjection> {
        self.data
            .iter()
            .map(|(key, value)| FileProjection {
                path: key.clone(),
                content: value.clone(),
                mode,
            })
            .collect()
    }
}

/// On-disk representation of one snapshot key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProjection {
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
}

// ---------------------------------------------------------------------------
// Change stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One item of a source's change stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub snapshot: Snapshot,
}

impl WatchEvent {
    pub fn new(kind: ChangeKind, snapshot: Snapshot) -> Self {
        Self { kind, snapshot }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
