//! metadata.rs
//!
//! Client-side metadata index
//!
//! Maps project id to asset id to `{mime_type, filename?, role?}` so a
//! filename-based backend can resolve ids the primary backend assigned.
//! The index is one JSON document, loaded once per session and rewritten
//! in full after every mutation.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

/// Metadata recorded for one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Named role such as the project's settings file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

type ProjectAssets = BTreeMap<String, AssetMetadata>;

/// Persistent project -> asset -> metadata mapping
pub struct MetadataIndex {
    path: PathBuf,
    // Single writer: every mutation rewrites the whole document
    entries: Mutex<BTreeMap<String, ProjectAssets>>,
}

impl MetadataIndex {
    /// Load the index from `path`, starting empty when the file is absent
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let entries: BTreeMap<String, ProjectAssets> = serde_json::from_str(&content)?;
            info!("Loaded metadata index for {} projects from {}", entries.len(), path.display());
            entries
        } else {
            debug!("No metadata index at {}, starting empty", path.display());
            BTreeMap::new()
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, ProjectAssets>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    /// Record an asset. A role moves to this asset from any other asset of
    /// the same project.
    pub fn add_asset_metadata(
        &self,
        project_id: &str,
        asset_id: &str,
        mime_type: &str,
        filename: Option<&str>,
        role: Option<&str>,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let assets = entries.entry(project_id.to_string()).or_default();
        if let Some(role) = role {
            for entry in assets.values_mut() {
                if entry.role.as_deref() == Some(role) {
                    entry.role = None;
                }
            }
        }
        assets.insert(
            asset_id.to_string(),
            AssetMetadata {
                mime_type: mime_type.to_string(),
                filename: filename.map(str::to_string),
                role: role.map(str::to_string),
            },
        );
        debug!("Recorded asset {} ({}) for project {}", asset_id, mime_type, project_id);
        self.save(&entries)
    }

    /// Drop every entry of a project
    pub fn delete_project_metadata(&self, project_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(project_id).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }

    pub fn get(&self, project_id: &str, asset_id: &str) -> Option<AssetMetadata> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(project_id).and_then(|assets| assets.get(asset_id)).cloned()
    }

    /// Id of the project's asset currently holding `role`
    pub fn asset_with_role(&self, project_id: &str, role: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(project_id).and_then(|assets| {
            assets
                .iter()
                .find(|(_, entry)| entry.role.as_deref() == Some(role))
                .map(|(id, _)| id.clone())
        })
    }

    pub fn project_assets(&self, project_id: &str) -> BTreeMap<String, AssetMetadata> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(project_id).cloned().unwrap_or_default()
    }

    pub fn contains_project(&self, project_id: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(project_id)
    }
}
