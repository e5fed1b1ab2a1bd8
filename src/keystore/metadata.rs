//! The on-disk metadata table.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::KeyRecord;

/// Per-key metadata as stored in `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KeyMeta {
    pub name: String,
    pub email: String,
    pub is_default: bool,
    pub has_private_key: bool,
    pub from_hardware_token: bool,
}

/// The whole metadata document, keyed by canonical fingerprint.
///
/// The table is always rewritten in full. Writes go through a sibling temp
/// file followed by a rename, so a crash mid-write leaves either the old
/// document or the new one, never a torn mix.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct MetadataTable(pub BTreeMap<String, KeyMeta>);

impl MetadataTable {
    /// Load the table from disk. A missing file is an empty table.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the full table atomically.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Build a public record for a fingerprint, if present.
    pub(crate) fn record(&self, fingerprint: &str) -> Option<KeyRecord> {
        self.0.get(fingerprint).map(|meta| KeyRecord {
            fingerprint: fingerprint.to_string(),
            name: meta.name.clone(),
            email: meta.email.clone(),
            is_default: meta.is_default,
            has_private_key: meta.has_private_key,
            from_hardware_token: meta.from_hardware_token,
        })
    }

    /// The fingerprint currently marked default, if any.
    pub(crate) fn default_fingerprint(&self) -> Option<&String> {
        self.0
            .iter()
            .find(|(_, meta)| meta.is_default)
            .map(|(fp, _)| fp)
    }

    /// Clear the default flag on every entry.
    pub(crate) fn clear_defaults(&mut self) {
        for meta in self.0.values_mut() {
            meta.is_default = false;
        }
    }
}
