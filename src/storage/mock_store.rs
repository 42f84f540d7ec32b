//! Mock implementation of StorageBackend for testing

use bytes::Bytes;
use log::info;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ClientError, Result};
use crate::storage::{
    resolve_asset_id, validate_video_path, AssetEntry, AssetRef, BackendCapability, BackendFlags, ProjectRecord,
    StorageBackend,
};
use crate::wire::generation::AssetUse;
use crate::wire::project::{ProjectAccess, ProjectStatus};

/// In-memory backend recording every call it receives
pub struct MockBackend {
    name: String,
    flags: BackendFlags,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    projects: Mutex<HashMap<String, ProjectRecord>>,
    settings: Mutex<HashMap<String, serde_json::Value>>,
    // project_id -> asset_id -> (data, use)
    assets: Mutex<HashMap<String, HashMap<String, (Bytes, AssetUse)>>>,
}

impl MockBackend {
    pub fn new(name: &str, flags: BackendFlags) -> Self {
        Self {
            name: name.to_string(),
            flags,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            projects: Mutex::new(HashMap::new()),
            settings: Mutex::new(HashMap::new()),
            assets: Mutex::new(HashMap::new()),
        }
    }

    /// Make every later call of the named operation fail
    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    /// Operation names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn project_count(&self) -> usize {
        self.projects.lock().unwrap().len()
    }

    pub fn asset_count(&self, project_id: &str) -> usize {
        self.assets.lock().unwrap().get(project_id).map(HashMap::len).unwrap_or(0)
    }

    pub fn has_asset(&self, project_id: &str, asset_id: &str) -> bool {
        self.assets
            .lock()
            .unwrap()
            .get(project_id)
            .map(|assets| assets.contains_key(asset_id))
            .unwrap_or(false)
    }

    fn record(&self, operation: &str) -> Result<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if self.failing.lock().unwrap().contains(operation) {
            return Err(ClientError::Storage(format!("{}: injected {} failure", self.name, operation)));
        }
        Ok(())
    }

    fn store(&self, project: &ProjectRecord, asset_id: Option<&str>, data: Bytes, asset_use: AssetUse) -> Result<AssetRef> {
        let id = resolve_asset_id(&self.name, self.flags, asset_id)?;
        self.assets
            .lock()
            .unwrap()
            .entry(project.id.clone())
            .or_default()
            .insert(id.clone(), (data, asset_use));
        info!("Mock {}: stored asset {} for project {}", self.name, id, project.id);
        Ok(AssetRef::with_path(&id, &format!("{}/{}", self.name, id)))
    }

    fn load(&self, project: &ProjectRecord, asset_id: &str) -> Result<Bytes> {
        self.assets
            .lock()
            .unwrap()
            .get(&project.id)
            .and_then(|assets| assets.get(asset_id))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| ClientError::Storage(format!("asset {} not found in project {}", asset_id, project.id)))
    }
}

impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
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
        self.record("create_project")?;
        let id = resolve_asset_id(&self.name, self.flags, id_to_use)?;
        let record = ProjectRecord::new(&id, title, &id);
        self.projects.lock().unwrap().insert(id, record.clone());
        Ok(record)
    }

    fn get_project(&self, id: &str) -> Result<ProjectRecord> {
        self.record("get_project")?;
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::Storage(format!("project {} not found", id)))
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.record("delete_project")?;
        self.projects.lock().unwrap().remove(id);
        self.settings.lock().unwrap().remove(id);
        self.assets.lock().unwrap().remove(id);
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.record("list_projects")?;
        let mut projects: Vec<_> = self.projects.lock().unwrap().values().cloned().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    fn update_project(
        &self,
        project: &ProjectRecord,
        title: Option<&str>,
        file_id: Option<&str>,
        file_uri: Option<&str>,
    ) -> Result<()> {
        self.record("update_project")?;
        let mut projects = self.projects.lock().unwrap();
        let record = projects
            .get_mut(&project.id)
            .ok_or_else(|| ClientError::Storage(format!("project {} not found", project.id)))?;
        if let Some(title) = title {
            record.title = title.to_string();
        }
        if let Some(file_id) = file_id {
            record.file.id = file_id.to_string();
        }
        if let Some(file_uri) = file_uri {
            record.file.uri = Some(file_uri.to_string());
        }
        Ok(())
    }

    fn get_project_settings(&self, project: &ProjectRecord, _asset_id: Option<&str>) -> Result<serde_json::Value> {
        self.record("get_project_settings")?;
        self.settings
            .lock()
            .unwrap()
            .get(&project.id)
            .cloned()
            .ok_or_else(|| ClientError::Storage(format!("missing settings file for project {}", project.id)))
    }

    fn put_project_settings(
        &self,
        project: &ProjectRecord,
        settings: &serde_json::Value,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        self.record("put_project_settings")?;
        let id = resolve_asset_id(&self.name, self.flags, asset_id)?;
        self.settings.lock().unwrap().insert(project.id.clone(), settings.clone());
        Ok(AssetRef::with_path(&id, &format!("{}/{}", self.name, id)))
    }

    fn put_image_asset(
        &self,
        project: &ProjectRecord,
        png: &Bytes,
        asset_use: AssetUse,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        self.record("put_image_asset")?;
        self.store(project, asset_id, png.clone(), asset_use)
    }

    fn put_video_asset(&self, project: &ProjectRecord, video_path: &Path, asset_id: Option<&str>) -> Result<AssetRef> {
        self.record("put_video_asset")?;
        validate_video_path(video_path)?;
        let data = Bytes::from(fs::read(video_path)?);
        self.store(project, asset_id, data, AssetUse::Input)
    }

    fn supports(&self, _capability: BackendCapability) -> bool {
        true
    }

    fn get_image_asset(&self, project: &ProjectRecord, asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        self.record("get_image_asset")?;
        self.load(project, asset_id)
    }

    fn get_video_asset(&self, project: &ProjectRecord, asset_id: &str, _asset_use: AssetUse) -> Result<Bytes> {
        self.record("get_video_asset")?;
        self.load(project, asset_id)
    }

    fn list_assets(&self, project: &ProjectRecord) -> Result<Vec<AssetEntry>> {
        self.record("list_assets")?;
        let mut assets: Vec<AssetEntry> = self
            .assets
            .lock()
            .unwrap()
            .get(&project.id)
            .map(|assets| {
                assets
                    .iter()
                    .map(|(id, (_, asset_use))| AssetEntry {
                        id: id.clone(),
                        location: format!("{}/{}", self.name, id),
                        asset_use: Some(*asset_use),
                    })
                    .collect()
            })
            .unwrap_or_default();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(assets)
    }
}

/// Backend implementing only the required operations
pub struct WriteOnlyBackend {
    inner: MockBackend,
}

impl WriteOnlyBackend {
    pub fn new(name: &str, flags: BackendFlags) -> Self {
        Self { inner: MockBackend::new(name, flags) }
    }
}

impl StorageBackend for WriteOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn flags(&self) -> BackendFlags {
        self.inner.flags()
    }

    fn create_project(
        &self,
        title: &str,
        access: ProjectAccess,
        status: ProjectStatus,
        id_to_use: Option<&str>,
    ) -> Result<ProjectRecord> {
        self.inner.create_project(title, access, status, id_to_use)
    }

    fn get_project(&self, id: &str) -> Result<ProjectRecord> {
        self.inner.get_project(id)
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.inner.delete_project(id)
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.inner.list_projects()
    }

    fn update_project(
        &self,
        project: &ProjectRecord,
        title: Option<&str>,
        file_id: Option<&str>,
        file_uri: Option<&str>,
    ) -> Result<()> {
        self.inner.update_project(project, title, file_id, file_uri)
    }

    fn get_project_settings(&self, project: &ProjectRecord, asset_id: Option<&str>) -> Result<serde_json::Value> {
        self.inner.get_project_settings(project, asset_id)
    }

    fn put_project_settings(
        &self,
        project: &ProjectRecord,
        settings: &serde_json::Value,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        self.inner.put_project_settings(project, settings, asset_id)
    }

    fn put_image_asset(
        &self,
        project: &ProjectRecord,
        png: &Bytes,
        asset_use: AssetUse,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        self.inner.put_image_asset(project, png, asset_use, asset_id)
    }

    fn put_video_asset(&self, project: &ProjectRecord, video_path: &Path, asset_id: Option<&str>) -> Result<AssetRef> {
        self.inner.put_video_asset(project, video_path, asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_call_log_and_injected_failure() {
        let backend = MockBackend::new("mock", BackendFlags::new(true, true));
        let project = backend
            .create_project("t", ProjectAccess::Private, ProjectStatus::Active, None)
            .unwrap();
        backend.fail_on("put_image_asset");
        let err = backend
            .put_image_asset(&project, &Bytes::from_static(b"png"), AssetUse::Project, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(backend.calls(), vec!["create_project", "put_image_asset"]);
        assert_eq!(backend.asset_count(&project.id), 0);
    }

    #[test]
    fn test_write_only_backend_reports_unsupported_reads() {
        let backend = WriteOnlyBackend::new("write-only", BackendFlags::new(true, true));
        let project = backend
            .create_project("t", ProjectAccess::Private, ProjectStatus::Active, None)
            .unwrap();
        assert!(!backend.supports(BackendCapability::ReadImage));
        let err = backend.get_image_asset(&project, "a", AssetUse::Project).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(backend.list_assets(&project).unwrap_err().kind(), ErrorKind::Unsupported);
    }
}
