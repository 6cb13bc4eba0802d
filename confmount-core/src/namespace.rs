//! Ambient namespace resolution.
//!
//! Order: `KUBE_NAMESPACE` (if non-empty), then the service-account namespace
//! file (trimmed, if non-empty), then [`DEFAULT_NAMESPACE`].

use std::path::Path;

pub const NAMESPACE_ENV: &str = "KUBE_NAMESPACE";
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resolve the namespace from the process environment and the well-known file.
pub fn resolve_namespace() -> String {
    resolve_namespace_with(std::env::var(NAMESPACE_ENV).ok(), Path::new(NAMESPACE_FILE))
}

/// Resolution with explicit inputs; used directly by tests.
pub fn resolve_namespace_with(env_value: Option<String>, namespace_file: &Path) -> String {
    if let Some(ns) = env_value {
        let ns = ns.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }
    if let Ok(contents) = std::fs::read_to_string(namespace_file) {
        let ns = contents.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }
    DEFAULT_NAMESPACE.to_string()
}
