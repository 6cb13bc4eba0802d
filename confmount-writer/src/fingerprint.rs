//! SHA-256 fingerprints of projected payloads.
//!
//! The digest covers every `(path, mode, content)` triple in path order, each
//! field length-prefixed so that no two distinct payloads share an encoding.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use confmount_core::FileProjection;

/// Hex digest of a payload given as `path -> (mode, content)`.
pub fn fingerprint_entries<'a>(
    entries: impl IntoIterator<Item = (&'a str, u32, &'a [u8])>,
) -> String {
    let sorted: BTreeMap<&str, (u32, &[u8])> = entries
        .into_iter()
        .map(|(path, mode, content)| (path, (mode, content)))
        .collect();

    let mut h = Sha256::new();
    for (path, (mode, content)) in sorted {
        h.update((path.len() as u64).to_be_bytes());
        h.update(path.as_bytes());
        h.update(mode.to_be_bytes());
        h.update((content.len() as u64).to_be_bytes());
        h.update(content);
    }
    hex::encode(h.finalize())
}

/// Hex digest of a projection set.
pub fn fingerprint(projections: &[FileProjection]) -> String {
    fingerprint_entries(
        projections
            .iter()
            .map(|p| (p.path.as_str(), p.mode, p.content.as_slice())),
    )
}
