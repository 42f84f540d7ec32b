//! Remote asset service backend
//!
//! Every asset operation is a generation request against the asset engine,
//! carrying GET/PUT asset parameters and submitted through the orchestrator.
//! Project identity goes through the project service.

use bytes::Bytes;
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::decoder::Artifacts;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::orchestrator::Orchestrator;
use crate::storage::{
    validate_video_path, AssetEntry, AssetRef, BackendCapability, BackendFlags, ProjectFile, ProjectRecord,
    StorageBackend,
};
use crate::wire::generation::{Artifact, ArtifactType, AssetAction, AssetParameters, AssetUse, Prompt, Request};
use crate::wire::project::{
    CreateProjectRequest, Project, ProjectAccess, ProjectAsset, ProjectAssetUse, ProjectService, ProjectStatus,
    UpdateProjectRequest,
};

/// Backend storing projects and assets on the remote service
pub struct RemoteAssetBackend {
    orchestrator: Arc<Orchestrator>,
    endpoint: Endpoint,
    projects: Arc<dyn ProjectService>,
    flags: BackendFlags,
}

impl RemoteAssetBackend {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        endpoint: Endpoint,
        projects: Arc<dyn ProjectService>,
        flags: BackendFlags,
    ) -> Self {
        Self { orchestrator, endpoint, projects, flags }
    }

    fn asset_request(&self, project: &ProjectRecord, action: AssetAction, asset_use: AssetUse, artifact: Artifact) -> Request {
        let mut request = Request::new(self.endpoint.engine_id());
        request.prompt = vec![Prompt::Artifact(artifact)];
        request.asset = Some(AssetParameters { action, project_id: project.id.clone(), asset_use });
        request
    }

    fn submit(&self, request: Request) -> Result<Artifacts> {
        self.orchestrator.submit(&self.endpoint, request)
    }

    /// A PUT answers with the new asset id as text
    fn put(&self, project: &ProjectRecord, asset_use: AssetUse, artifact: Artifact, what: &str) -> Result<AssetRef> {
        let results = self.submit(self.asset_request(project, AssetAction::Put, asset_use, artifact))?;
        let text = results
            .texts()
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Storage(format!("failed to store {} for project {}", what, project.id)))?;
        let asset = AssetRef::from_remote_text(&text);
        info!("Stored {} {} for project {}", what, asset.id, project.id);
        Ok(asset)
    }
}

impl From<Project> for ProjectRecord {
    fn from(project: Project) -> Self {
        let file = project
            .file
            .map(|file| ProjectFile { id: file.id, uri: Some(file.uri) })
            .unwrap_or_default();
        ProjectRecord { id: project.id, title: project.title, file }
    }
}

impl From<ProjectAssetUse> for AssetUse {
    fn from(asset_use: ProjectAssetUse) -> Self {
        match asset_use {
            ProjectAssetUse::Undefined => AssetUse::Undefined,
            ProjectAssetUse::Input => AssetUse::Input,
            ProjectAssetUse::Output => AssetUse::Output,
            ProjectAssetUse::Intermediate => AssetUse::Intermediate,
            ProjectAssetUse::Project => AssetUse::Project,
        }
    }
}

impl StorageBackend for RemoteAssetBackend {
    fn name(&self) -> &str {
        "asset-service"
    }

    fn flags(&self) -> BackendFlags {
        self.flags
    }

    fn create_project(
        &self,
        title: &str,
        access: ProjectAccess,
        status: ProjectStatus,
        id_to_use: Option<&str>,
    ) -> Result<ProjectRecord> {
        if let Some(id) = id_to_use {
            debug!("Project service assigns its own ids, ignoring {}", id);
        }
        let project = self
            .projects
            .create(&CreateProjectRequest { title: title.to_string(), access, status })
            .map_err(ClientError::Transport)?;
        info!("Created remote project {} ({})", project.id, project.title);
        Ok(project.into())
    }

    fn get_project(&self, id: &str) -> Result<ProjectRecord> {
        Ok(self.projects.get(id).map_err(ClientError::Transport)?.into())
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.projects.delete(id).map_err(ClientError::Transport)?;
        info!("Deleted remote project {}", id);
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut projects: Vec<ProjectRecord> = self
            .projects
            .list("")
            .map_err(ClientError::Transport)?
            .into_iter()
            .map(ProjectRecord::from)
            .collect();
        projects.sort_by_key(|project| project.title.to_lowercase());
        Ok(projects)
    }

    fn update_project(
        &self,
        project: &ProjectRecord,
        title: Option<&str>,
        file_id: Option<&str>,
        file_uri: Option<&str>,
    ) -> Result<()> {
        // The service only accepts a file pointer with both parts present
        let file = match (file_id, file_uri) {
            (Some(id), Some(uri)) if !id.is_empty() && !uri.is_empty() => Some(ProjectAsset {
                id: id.to_string(),
                uri: uri.to_string(),
                asset_use: ProjectAssetUse::Project,
            }),
            _ => None,
        };
        self.projects
            .update(&UpdateProjectRequest {
                id: project.id.clone(),
                title: title.map(str::to_string),
                file,
            })
            .map_err(ClientError::Transport)?;
        Ok(())
    }

    fn get_project_settings(&self, project: &ProjectRecord, asset_id: Option<&str>) -> Result<serde_json::Value> {
        let asset_id = asset_id.filter(|id| !id.is_empty()).unwrap_or(&project.file.id);
        let artifact = Artifact::reference(ArtifactType::Text, "application/json", asset_id);
        let results = self.submit(self.asset_request(project, AssetAction::Get, AssetUse::Project, artifact))?;
        let text = results
            .texts()
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Storage(format!("failed to load project file for {}", project.id)))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn put_project_settings(
        &self,
        project: &ProjectRecord,
        settings: &serde_json::Value,
        asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        let uuid = asset_id.unwrap_or(&project.file.id);
        let artifact = Artifact::text("application/json", serde_json::to_string(settings)?).with_uuid(uuid);
        self.put(project, AssetUse::Project, artifact, "project file")
    }

    fn put_image_asset(
        &self,
        project: &ProjectRecord,
        png: &Bytes,
        asset_use: AssetUse,
        _asset_id: Option<&str>,
    ) -> Result<AssetRef> {
        let artifact = Artifact::binary(ArtifactType::Image, "image/png", png.clone());
        self.put(project, asset_use, artifact, "image asset")
    }

    fn put_video_asset(&self, project: &ProjectRecord, video_path: &Path, _asset_id: Option<&str>) -> Result<AssetRef> {
        validate_video_path(video_path)?;
        let data = Bytes::from(fs::read(video_path)?);
        let artifact = Artifact::binary(ArtifactType::Video, "video/mp4", data);
        self.put(project, AssetUse::Input, artifact, "video asset")
    }

    fn supports(&self, _capability: BackendCapability) -> bool {
        true
    }

    fn get_image_asset(&self, project: &ProjectRecord, asset_id: &str, asset_use: AssetUse) -> Result<Bytes> {
        let artifact = Artifact::reference(ArtifactType::Image, "image/png", asset_id);
        let results = self.submit(self.asset_request(project, AssetAction::Get, asset_use, artifact))?;
        results.images().into_iter().next().ok_or_else(|| {
            ClientError::Storage(format!("failed to load image asset {} for project {}", asset_id, project.id))
        })
    }

    /// The service has been seen to answer with the video kind present but
    /// no payload; that comes back as empty bytes.
    fn get_video_asset(&self, project: &ProjectRecord, asset_id: &str, asset_use: AssetUse) -> Result<Bytes> {
        let artifact = Artifact::reference(ArtifactType::Video, "video/mp4", asset_id);
        let results = self.submit(self.asset_request(project, AssetAction::Get, asset_use, artifact))?;
        if !results.contains(ArtifactType::Video) {
            return Err(ClientError::Storage(format!(
                "failed to load video asset {} for project {}",
                asset_id, project.id
            )));
        }
        let video = results.binaries(ArtifactType::Video).into_iter().next().unwrap_or_default();
        if video.is_empty() {
            warn!("Video asset {} for project {} came back empty", asset_id, project.id);
        }
        Ok(video)
    }

    fn list_assets(&self, project: &ProjectRecord) -> Result<Vec<AssetEntry>> {
        let assets = self.projects.query_assets(&project.id).map_err(ClientError::Transport)?;
        Ok(assets
            .into_iter()
            .map(|asset| AssetEntry {
                id: asset.id,
                location: asset.uri,
                asset_use: Some(asset.asset_use.into()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::endpoint::Capability;
    use crate::error::ErrorKind;
    use crate::mock_service::{without_payload, MockGenerationService, MockProjectService};
    use crate::wire::generation::{RpcCode, RpcError};
    use std::time::Duration;

    struct Harness {
        generation: Arc<MockGenerationService>,
        projects: Arc<MockProjectService>,
        backend: RemoteAssetBackend,
    }

    fn harness() -> Harness {
        let generation = Arc::new(MockGenerationService::new());
        let projects = Arc::new(MockProjectService::new());
        let orchestrator = Orchestrator::new(&RetryConfig { max_retries: 2, ..Default::default() })
            .with_sleeper(Arc::new(|_: Duration| {}));
        let backend = RemoteAssetBackend::new(
            Arc::new(orchestrator),
            Endpoint::new(Capability::Asset, "asset-service", generation.clone()),
            projects.clone(),
            BackendFlags::new(true, false),
        );
        Harness { generation, projects, backend }
    }

    fn create(h: &Harness, title: &str) -> ProjectRecord {
        h.backend
            .create_project(title, ProjectAccess::Private, ProjectStatus::Active, None)
            .unwrap()
    }

    #[test]
    fn test_image_put_get_roundtrip_through_asset_engine() {
        let h = harness();
        let project = create(&h, "Roundtrip");
        let stored = h
            .backend
            .put_image_asset(&project, &Bytes::from_static(b"png"), AssetUse::Project, None)
            .unwrap();
        assert_eq!(stored.id, "asset-1");
        assert_eq!(stored.path.as_deref(), Some("proj-1/asset-1"));

        let image = h.backend.get_image_asset(&project, &stored.id, AssetUse::Project).unwrap();
        assert_eq!(image, Bytes::from_static(b"png"));

        let sent = h.generation.requests();
        assert!(sent.iter().all(|r| r.engine_id == "asset-service"));
        assert_eq!(sent[0].asset.as_ref().unwrap().action, AssetAction::Put);
        assert_eq!(sent[1].asset.as_ref().unwrap().action, AssetAction::Get);
    }

    #[test]
    fn test_settings_roundtrip_uses_project_file_id() {
        let h = harness();
        let project = create(&h, "Settings");
        let settings = serde_json::json!({"fps": 12, "prompt": "a lighthouse"});
        let stored = h.backend.put_project_settings(&project, &settings, Some("file-1")).unwrap();
        assert_eq!(stored.id, "file-1");

        let loaded = h.backend.get_project_settings(&project, Some("file-1")).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_list_projects_sorted_case_insensitively() {
        let h = harness();
        create(&h, "beta");
        create(&h, "Alpha");
        create(&h, "gamma");
        let titles: Vec<_> = h.backend.list_projects().unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_update_sends_file_only_with_id_and_uri() {
        let h = harness();
        let project = create(&h, "Update");
        h.backend.update_project(&project, Some("Renamed"), Some("file-9"), None).unwrap();
        let fetched = h.backend.get_project(&project.id).unwrap();
        assert_eq!(fetched.title, "Renamed");
        assert_eq!(fetched.file.id, "");

        h.backend
            .update_project(&project, None, Some("file-9"), Some("s3://bucket/file-9"))
            .unwrap();
        let fetched = h.backend.get_project(&project.id).unwrap();
        assert_eq!(fetched.file.id, "file-9");
        assert_eq!(fetched.file.uri.as_deref(), Some("s3://bucket/file-9"));
    }

    #[test]
    fn test_empty_video_payload_is_returned_not_invented() {
        let h = harness();
        let project = create(&h, "Video");
        let stored = Artifact::binary(ArtifactType::Video, "video/mp4", Bytes::from_static(b"mp4"));
        h.generation.push_answers(vec![without_payload(&stored)]);

        let video = h.backend.get_video_asset(&project, "v1", AssetUse::Input).unwrap();
        assert!(video.is_empty());
    }

    #[test]
    fn test_missing_video_kind_is_a_storage_failure() {
        let h = harness();
        let project = create(&h, "Video");
        h.generation.push_answers(vec![]);
        let err = h.backend.get_video_asset(&project, "v1", AssetUse::Input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_put_video_rejects_non_mp4_before_any_call() {
        let h = harness();
        let project = create(&h, "Video");
        let err = h
            .backend
            .put_video_asset(&project, Path::new("/nonexistent/clip.avi"), None)
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(h.generation.call_count(), 0);
    }

    #[test]
    fn test_transport_errors_pass_through() {
        let h = harness();
        let project = create(&h, "Errors");
        h.generation.push_error(RpcError::new(RpcCode::ResourceExhausted, "no credits"));
        let err = h
            .backend
            .put_image_asset(&project, &Bytes::from_static(b"png"), AssetUse::Project, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
    }

    #[test]
    fn test_list_assets_queries_project_service() {
        let h = harness();
        let project = create(&h, "Assets");
        h.projects.add_asset(
            &project.id,
            ProjectAsset { id: "a1".into(), uri: "s3://a1".into(), asset_use: ProjectAssetUse::Output },
        );
        let assets = h.backend.list_assets(&project).unwrap();
        assert_eq!(
            assets,
            vec![AssetEntry { id: "a1".into(), location: "s3://a1".into(), asset_use: Some(AssetUse::Output) }]
        );
    }
}
