//! Project aggregate
//!
//! A `Session` holds the registered storage backends and the metadata index.
//! `Project` operations fan writes out across every backend in registration
//! order and serve reads from the primary backend only. The primary assigns
//! ids; the primary_fs backend assigns filenames; both land in one metadata
//! entry per asset.

use bytes::Bytes;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::metadata::MetadataIndex;
use crate::storage::config::{create_backends, RemoteDeps};
use crate::storage::{AssetEntry, AssetRef, ProjectRecord, StorageBackend};
use crate::wire::generation::AssetUse;
use crate::wire::project::{ProjectAccess, ProjectStatus};

/// Metadata role of a project's settings file
pub const PROJECT_FILE_ROLE: &str = "project_file_id";

const SETTINGS_MIME: &str = "application/json";
const IMAGE_MIME: &str = "image/png";
const VIDEO_MIME: &str = "video/mp4";

/// Backends and metadata index shared by every project of a session
pub struct Session {
    backends: Vec<Arc<dyn StorageBackend>>,
    metadata: MetadataIndex,
}

impl Session {
    /// Requires exactly one primary, registered first, and exactly one
    /// primary_fs backend.
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>, metadata: MetadataIndex) -> Result<Self> {
        let first = backends
            .first()
            .ok_or_else(|| ClientError::Config("a session needs at least one storage backend".into()))?;
        let primaries = backends.iter().filter(|b| b.flags().primary).count();
        let primary_fs = backends.iter().filter(|b| b.flags().primary_fs).count();
        if primaries != 1 {
            return Err(ClientError::Config(format!("expected one primary backend, found {}", primaries)));
        }
        if primary_fs != 1 {
            return Err(ClientError::Config(format!("expected one primary_fs backend, found {}", primary_fs)));
        }
        if !first.flags().primary {
            return Err(ClientError::Config(format!(
                "primary backend must be registered first, found '{}'",
                first.name()
            )));
        }
        info!(
            "Session backends: {}",
            backends.iter().map(|b| b.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self { backends, metadata })
    }

    /// Backends from the configured layout and the index from its configured path
    pub fn from_config(config: &ClientConfig, remote: Option<RemoteDeps>) -> Result<Self> {
        let backends = create_backends(config.storage.layout, &config.storage, remote)?;
        let metadata = MetadataIndex::load(&config.storage.metadata_index_path)?;
        Self::new(backends, metadata)
    }

    pub fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    pub fn primary(&self) -> &dyn StorageBackend {
        // Validated in new(): the first backend is the primary
        self.backends[0].as_ref()
    }

    fn mirrors(&self) -> impl Iterator<Item = &dyn StorageBackend> {
        self.backends[1..].iter().map(|b| b.as_ref())
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }

    /// Run a write on the primary, then on each mirror with the primary's id,
    /// and record the asset in the metadata index. A mirror failure leaves
    /// the primary's write and the index entry in place.
    fn fan_out<F>(
        &self,
        project_id: &str,
        preferred_id: Option<&str>,
        mime_type: &str,
        role: Option<&str>,
        write: F,
    ) -> Result<AssetRef>
    where
        F: Fn(&dyn StorageBackend, Option<&str>) -> Result<AssetRef>,
    {
        let primary = self.primary();
        let stored = write(primary, preferred_id)?;
        let mut filename = primary.flags().primary_fs.then(|| stored.filename().to_string());

        let mut failure = None;
        for mirror in self.mirrors() {
            match write(mirror, Some(stored.id.as_str())) {
                Ok(mirrored) => {
                    if mirror.flags().primary_fs {
                        filename = Some(mirrored.filename().to_string());
                    }
                }
                Err(e) => {
                    failure = Some((mirror.name().to_string(), e));
                    break;
                }
            }
        }

        self.metadata
            .add_asset_metadata(project_id, &stored.id, mime_type, filename.as_deref(), role)?;

        match failure {
            Some((backend, source)) => {
                warn!("Asset {} stored on primary but mirror '{}' failed: {}", stored.id, backend, source);
                Err(ClientError::PartialMirror { asset_id: stored.id, backend, source: Box::new(source) })
            }
            None => Ok(stored),
        }
    }

    /// Apply an operation to every backend in order, stopping at the first failure
    fn for_each_backend<F>(&self, project_id: &str, op: F) -> Result<()>
    where
        F: Fn(&dyn StorageBackend) -> Result<()>,
    {
        op(self.primary())?;
        for mirror in self.mirrors() {
            if let Err(e) = op(mirror) {
                warn!("Mirror '{}' failed for project {}: {}", mirror.name(), project_id, e);
                return Err(ClientError::PartialMirror {
                    asset_id: project_id.to_string(),
                    backend: mirror.name().to_string(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }
}

/// A project as seen through a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    record: ProjectRecord,
}

impl Project {
    pub fn from_record(record: ProjectRecord) -> Self {
        Self { record }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn title(&self) -> &str {
        &self.record.title
    }

    pub fn file_id(&self) -> &str {
        &self.record.file.id
    }

    pub fn record(&self) -> &ProjectRecord {
        &self.record
    }

    /// Create the project on the primary, then on each mirror under the
    /// primary's id. The project record file is recorded under the
    /// settings-file role.
    pub fn create(session: &Session, title: &str) -> Result<Project> {
        Self::create_with(session, title, ProjectAccess::Private, ProjectStatus::Active)
    }

    pub fn create_with(session: &Session, title: &str, access: ProjectAccess, status: ProjectStatus) -> Result<Project> {
        let record = session.primary().create_project(title, access, status, None)?;
        let mut filename = session.primary().flags().primary_fs.then(|| record.id.clone());

        let mut failure = None;
        for mirror in session.mirrors() {
            match mirror.create_project(title, access, status, Some(record.id.as_str())) {
                Ok(mirrored) => {
                    if mirror.flags().primary_fs {
                        filename = Some(mirrored.id);
                    }
                }
                Err(e) => {
                    failure = Some((mirror.name().to_string(), e));
                    break;
                }
            }
        }

        session.metadata().add_asset_metadata(
            &record.id,
            &record.id,
            SETTINGS_MIME,
            filename.as_deref(),
            Some(PROJECT_FILE_ROLE),
        )?;
        info!("Created project {} ({})", record.id, record.title);

        match failure {
            Some((backend, source)) => Err(ClientError::PartialMirror {
                asset_id: record.id,
                backend,
                source: Box::new(source),
            }),
            None => Ok(Project { record }),
        }
    }

    pub fn get(session: &Session, id: &str) -> Result<Project> {
        Ok(Project { record: session.primary().get_project(id)? })
    }

    pub fn list(session: &Session) -> Result<Vec<Project>> {
        Ok(session
            .primary()
            .list_projects()?
            .into_iter()
            .map(Project::from_record)
            .collect())
    }

    /// Remove the project from every backend and drop its metadata
    pub fn delete(self, session: &Session) -> Result<()> {
        let result = session.for_each_backend(self.id(), |backend| backend.delete_project(self.id()));
        if let Err(ClientError::PartialMirror { .. }) | Ok(()) = &result {
            session.metadata().delete_project_metadata(self.id())?;
            info!("Deleted project {}", self.id());
        }
        result
    }

    /// Settings as stored by the primary, located through the settings-file role
    pub fn get_settings(&self, session: &Session) -> Result<serde_json::Value> {
        let asset_id = session.metadata().asset_with_role(self.id(), PROJECT_FILE_ROLE);
        session.primary().get_project_settings(&self.record, asset_id.as_deref())
    }

    /// Store settings on every backend and point the project at the new file
    pub fn save_settings(&mut self, session: &Session, settings: &serde_json::Value) -> Result<String> {
        let preferred = Some(self.file_id()).filter(|id| !id.is_empty());
        let record = &self.record;
        let stored = session.fan_out(self.id(), preferred, SETTINGS_MIME, Some(PROJECT_FILE_ROLE), |backend, id| {
            backend.put_project_settings(record, settings, id)
        })?;
        if stored.id != self.record.file.id {
            self.update_project(session, None, Some(&stored.id), stored.path.as_deref())?;
        }
        Ok(stored.id)
    }

    pub fn put_image_asset(&self, session: &Session, png: &Bytes, asset_use: AssetUse) -> Result<String> {
        let record = &self.record;
        let stored = session.fan_out(self.id(), None, IMAGE_MIME, None, |backend, id| {
            backend.put_image_asset(record, png, asset_use, id)
        })?;
        Ok(stored.id)
    }

    pub fn get_image_asset(&self, session: &Session, asset_id: &str, asset_use: AssetUse) -> Result<Bytes> {
        session.primary().get_image_asset(&self.record, asset_id, asset_use)
    }

    pub fn put_video_asset(&self, session: &Session, video_path: &Path) -> Result<String> {
        let record = &self.record;
        let stored = session.fan_out(self.id(), None, VIDEO_MIME, None, |backend, id| {
            backend.put_video_asset(record, video_path, id)
        })?;
        Ok(stored.id)
    }

    /// Video read through the primary; may be empty when the remote service
    /// returns no payload
    pub fn get_video_asset(&self, session: &Session, asset_id: &str, asset_use: AssetUse) -> Result<Bytes> {
        session.primary().get_video_asset(&self.record, asset_id, asset_use)
    }

    pub fn update_project(
        &mut self,
        session: &Session,
        title: Option<&str>,
        file_id: Option<&str>,
        file_uri: Option<&str>,
    ) -> Result<()> {
        let record = &self.record;
        let result = session.for_each_backend(&record.id, |backend| {
            backend.update_project(record, title, file_id, file_uri)
        });
        if let Err(e) = result {
            if !matches!(e, ClientError::PartialMirror { .. }) {
                return Err(e);
            }
            self.apply_update(title, file_id, file_uri);
            return Err(e);
        }
        self.apply_update(title, file_id, file_uri);
        Ok(())
    }

    fn apply_update(&mut self, title: Option<&str>, file_id: Option<&str>, file_uri: Option<&str>) {
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            self.record.title = title.to_string();
        }
        if let Some(file_id) = file_id.filter(|id| !id.is_empty()) {
            self.record.file.id = file_id.to_string();
        }
        if let Some(file_uri) = file_uri.filter(|uri| !uri.is_empty()) {
            self.record.file.uri = Some(file_uri.to_string());
        }
    }

    /// Assets registered for the project, as listed by the primary
    pub fn list_assets(&self, session: &Session) -> Result<Vec<AssetEntry>> {
        session.primary().list_assets(&self.record)
    }
}
