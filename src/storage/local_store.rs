//! Local filesystem project storage
//!
//! Layout under the projects root:
//! `<id>/<id>` project record, `<id>/project_settings.json` settings,
//! `<id>/<asset>.png` images, `<id>/<asset>` videos.

use bytes::Bytes;
use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};
use crate::storage::{
    resolve_asset_id, validate_video_path, AssetEntry, AssetRef, BackendCapability, BackendFlags, ProjectRecord,
    StorageBackend, SETTINGS_FILENAME,
};
use crate::wire::generation::AssetUse;
use crate::wire::project::{ProjectAccess, ProjectStatus};

fn path_component<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(ClientError::Validation(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(value)
}

/// Backend keeping each project in its own directory
pub struct LocalFileBackend {
    root: PathBuf,
    flags: BackendFlags,
}

impl LocalFileBackend {
    pub fn new(root: impl Into<PathBuf>, flags: BackendFlags) -> Self {
        let root = root.into();
        info!("Using local projects root: {}", root.display());
        Self { root, flags }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(path_component("project id", project_id)?))
    }

    /// Path of a file inside a project directory
    ///
    /// Both parts must be plain names: ids that would climb out of the
    /// projects root or into a subdirectory are a validation error.
    pub fn path_for_asset(&self, project_id: &str, filename: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project_id)?.join(path_component("asset filename", filename)?))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn write_record(&self, record: &ProjectRecord, record_name: &str) -> Result<()> {
        let path = self.path_for_asset(&record.id, record_name)?;
        self.write_file(&path, serde_json::to_string(record)?.as_bytes())
    }

    fn read_record(&self, id: &str) -> Result<ProjectRecord> {
        let path = self.path_for_asset(id, id)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ClientError::Storage(format!("project {} not found", id)),
            _ => ClientError::Io(e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn read_asset(&self, project: &ProjectRecord, filename: &str) -> Result<Bytes> {
        let path = self.path_for_asset(&project.id, filename)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ClientError::Storage(format!(
                "asset {} not found in project {}",
                filename, project.id
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl StorageBackend for LocalFileBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn flags(&self) -> BackendFlags {
        self.flags
    }

    fn create_project(
        &self,
        title: &str,
        _access: ProjectAccess,
        _status: ProjectStatus,
        id_to_use: Option<&str>,
    ) -> Result<ProjectRecord> {
        let id = resolve_asset_id(self.name(), self.flags, id_to_use)?;
        // The record file shares the project id
        let record = ProjectRecord::new(&id, title, &id);
        self.write_record(&record, &id)?;
        info!("Created local project {} under {}", id, self.root.display());
        Ok(record)
    }

    fn get_project(&self, id: &str) -> Result<ProjectRecord> {
        self.read_record(id)
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        let dir = self.project_dir(id)?;
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                info!("Deleted local project {}", id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Local project {} already absent", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            // Directories without a record are skipped
            if !self.path_for_asset(&id, &id)?.is_file() {
                continue;
            }
            projects.push(self.read_record(&id)?);
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    fn update_project(
        &self,
        project: &ProjectRecord,
        title: Option<&str>,
        file_id: Option<&str>,
        _file_uri: Option<&str>,
    ) -> Result<()> {
        let mut record = project.clone();
        if let Some(title) = title {
            record.title = title.to_string();
        }
        if let Some(file_id) = file_id {
            record.file.id = file_id.to_string();
        }
        record.file.uri = None;
        self.write_record(&record, &project.id)
    }

    fn get_project_settings(&self, project: &ProjectRecord, _asset_id: Option<&str>) -> Result<serde_json::Value> {
        let path = self.path_for_asset(&project.id, SETTINGS_FILENAME)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ClientError::Storage(format!("missing settings file for project {}", project.id))
            }
            _ => ClientError::Io(e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn put_project_settings(
        &self,
        project: &ProjectRecord,
        settings: &serde_json::Value,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        let id = resolve_asset_id(self.name(), self.flags, asset_id)?;
        let path = self.path_for_asset(&project.id, SETTINGS_FILENAME)?;
        self.write_file(&path, serde_json::to_string(settings)?.as_bytes())?;
        Ok(AssetRef::with_path(&id, SETTINGS_FILENAME))
    }

    fn put_image_asset(
        &self,
        project: &ProjectRecord,
        png: &Bytes,
        _asset_use: AssetUse,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        let id = resolve_asset_id(self.name(), self.flags, asset_id)?;
        let path = self.path_for_asset(&project.id, &format!("{}.png", id))?;
        self.write_file(&path, png)?;
        Ok(AssetRef::with_path(&id, &id))
    }

    fn put_video_asset(&self, project: &ProjectRecord, video_path: &Path, asset_id: Option<&str>) -> Result<AssetRef> {
        validate_video_path(video_path)?;
        let id = resolve_asset_id(self.name(), self.flags, asset_id)?;
        let path = self.path_for_asset(&project.id, &id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(video_path, &path)?;
        Ok(AssetRef::with_path(&id, &id))
    }

    fn supports(&self, _capability: BackendCapability) -> bool {
        true
    }

    fn get_image_asset(&self, project: &ProjectRecord, asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        self.read_asset(project, &format!("{}.png", asset_id))
    }

    fn get_video_asset(&self, project: &ProjectRecord, asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        self.read_asset(project, asset_id)
    }

    fn list_assets(&self, project: &ProjectRecord) -> Result<Vec<AssetEntry>> {
        let mut assets = Vec::new();
        for entry in fs::read_dir(self.project_dir(&project.id)?)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if !entry.file_type()?.is_file() || filename == project.id || filename == SETTINGS_FILENAME {
                continue;
            }
            let id = filename.strip_suffix(".png").unwrap_or(&filename).to_string();
            assets.push(AssetEntry { id, location: filename, asset_use: None });
        }
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(assets)
    }
}
