//! Project Storage Layer Abstraction
//!
//! This module provides an abstraction over project/asset storage backends,
//! allowing projects to be written to the remote asset service, a local
//! directory tree, or an in-memory store without affecting the project layer.

pub mod asset_service;
pub mod config;
pub mod local_store;
pub mod mock_store;


use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ClientError, Result};
use crate::wire::generation::AssetUse;
use crate::wire::project::{ProjectAccess, ProjectStatus};

/// Name of the settings file inside a local project directory
pub const SETTINGS_FILENAME: &str = "project_settings.json";

/// Pointer to a project's settings-file asset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Backend-agnostic project record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub file: ProjectFile,
}

impl ProjectRecord {
    pub fn new(id: &str, title: &str, file_id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            file: ProjectFile { id: file_id.to_string(), uri: None },
        }
    }
}

/// Result of a write: the asset id and, when the backend stores it under a
/// different name, the path it was stored at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub id: String,
    pub path: Option<String>,
}

impl AssetRef {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), path: None }
    }

    pub fn with_path(id: &str, path: &str) -> Self {
        Self { id: id.to_string(), path: Some(path.to_string()) }
    }

    /// Parse the text artifact returned by an asset service PUT, which is
    /// either a bare id or a path ending in the id.
    pub fn from_remote_text(text: &str) -> Self {
        match text.rsplit_once('/') {
            Some((_, id)) => Self::with_path(id, text),
            None => Self::new(text),
        }
    }

    /// Name the backend stored the asset under
    pub fn filename(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.id)
    }
}

/// One asset as listed by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub id: String,
    /// Remote URI or local filename
    pub location: String,
    pub asset_use: Option<AssetUse>,
}

/// Roles a backend holds within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendFlags {
    /// Assigns asset and project ids; serves all reads
    pub primary: bool,
    /// Assigns the canonical local filename
    pub primary_fs: bool,
}

impl BackendFlags {
    pub fn new(primary: bool, primary_fs: bool) -> Self {
        Self { primary, primary_fs }
    }
}

/// Optional operations a backend may not implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    ReadImage,
    ReadVideo,
    ListAssets,
}

impl BackendCapability {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCapability::ReadImage => "image read",
            BackendCapability::ReadVideo => "video read",
            BackendCapability::ListAssets => "asset listing",
        }
    }
}

/// Trait defining the project storage interface.
///
/// Project identity operations act on the whole project store; settings and
/// asset operations are instance operations on one project. Reads of image
/// and video assets and asset listing are optional: a backend without them
/// keeps the default methods, which fail with `ClientError::Unsupported`.
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    fn flags(&self) -> BackendFlags;

    /// Create a project. `id_to_use` seeds a mirror with the id the primary
    /// already assigned.
    fn create_project(
        &self,
        title: &str,
        access: ProjectAccess,
        status: ProjectStatus,
        id_to_use: Option<&str>,
    ) -> Result<ProjectRecord>;

    fn get_project(&self, id: &str) -> Result<ProjectRecord>;

    fn delete_project(&self, id: &str) -> Result<()>;

    fn list_projects(&self) -> Result<Vec<ProjectRecord>>;

    /// Change the title and/or settings-file pointer of a project
    fn update_project(
        &self,
        project: &ProjectRecord,
        title: Option<&str>,
        file_id: Option<&str>,
        file_uri: Option<&str>,
    ) -> Result<()>;

    fn get_project_settings(&self, project: &ProjectRecord, asset_id: Option<&str>) -> Result<serde_json::Value>;

    fn put_project_settings(
        &self,
        project: &ProjectRecord,
        settings: &serde_json::Value,
        asset_id: Option<&str>,
    ) -> Result<AssetRef>;

    fn put_image_asset(
        &self,
        project: &ProjectRecord,
        png: &Bytes,
        asset_use: AssetUse,
        asset_id: Option<&str>,
    ) -> Result<AssetRef>;

    fn put_video_asset(&self, project: &ProjectRecord, video_path: &Path, asset_id: Option<&str>) -> Result<AssetRef>;

    fn supports(&self, _capability: BackendCapability) -> bool {
        false
    }

    fn get_image_asset(&self, _project: &ProjectRecord, _asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        Err(ClientError::unsupported(self.name(), BackendCapability::ReadImage.name()))
    }

    fn get_video_asset(&self, _project: &ProjectRecord, _asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        Err(ClientError::unsupported(self.name(), BackendCapability::ReadVideo.name()))
    }

    fn list_assets(&self, _project: &ProjectRecord) -> Result<Vec<AssetEntry>> {
        Err(ClientError::unsupported(self.name(), BackendCapability::ListAssets.name()))
    }
}

/// Video uploads must name an existing `.mp4` file
pub fn validate_video_path(path: &Path) -> Result<()> {
    let is_mp4 = path.extension().map_or(false, |ext| ext == "mp4");
    if !path.is_file() || !is_mp4 {
        return Err(ClientError::Validation(format!(
            "invalid video file path {}: must be an existing .mp4 file",
            path.display()
        )));
    }
    Ok(())
}

/// The id a write is stored under: the one supplied, or a fresh one when
/// this backend assigns identities. A mirror never invents ids.
pub fn resolve_asset_id(backend: &str, flags: BackendFlags, asset_id: Option<&str>) -> Result<String> {
    match asset_id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ if flags.primary => Ok(uuid::Uuid::new_v4().to_string()),
        _ => Err(ClientError::Validation(format!(
            "backend '{}' is not primary and cannot assign an asset id",
            backend
        ))),
    }
}
