use bytes::Bytes;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use gen_relay::config::{ClientConfig, RetryConfig};
use gen_relay::metadata::MetadataIndex;
use gen_relay::mock_service::{MockGenerationService, MockProjectService};
use gen_relay::orchestrator::Orchestrator;
use gen_relay::params::ImageParams;
use gen_relay::project::PROJECT_FILE_ROLE;
use gen_relay::storage::config::BackendLayout;
use gen_relay::storage::SETTINGS_FILENAME;
use gen_relay::wire::generation::{
    Artifact, ArtifactType, AssetUse, ClassifierAction, ClassifierCategory, ClassifierConcept, ClassifierParameters,
    RpcCode, RpcError,
};
use gen_relay::{Client, ClientError, ErrorKind, Project, PromptSet, Session};

struct Harness {
    dir: TempDir,
    generation: Arc<MockGenerationService>,
    projects: Arc<MockProjectService>,
    client: Client,
    config: ClientConfig,
}

fn quiet_orchestrator(retry: &RetryConfig) -> Orchestrator {
    Orchestrator::new(retry).with_sleeper(Arc::new(|_: Duration| {}))
}

fn harness(layout: BackendLayout) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = ClientConfig::default();
    config.retry.max_retries = 2;
    config.storage.layout = layout;
    config.storage.projects_root = dir.path().join("projects").display().to_string();
    config.storage.metadata_index_path = dir.path().join("metadata_index.json").display().to_string();

    let generation = Arc::new(MockGenerationService::new());
    let projects = Arc::new(MockProjectService::new());
    let client = Client::new(generation.clone(), &config).with_orchestrator(quiet_orchestrator(&config.retry));
    Harness { dir, generation, projects, client, config }
}

fn session(h: &Harness) -> Session {
    Session::from_config(&h.config, Some(h.client.remote_deps(h.projects.clone()))).unwrap()
}

fn png(data: &'static [u8]) -> Bytes {
    Bytes::from_static(data)
}

#[test]
fn test_generate_retries_transient_failure() {
    let h = harness(BackendLayout::Mock);
    h.generation.push_error(RpcError::new(RpcCode::Unavailable, "restarting"));
    h.generation
        .push_answers(vec![Artifact::binary(ArtifactType::Image, "image/png", png(b"cat"))]);

    let results = h
        .client
        .generate(&PromptSet::new().text("a cat", 1.0), &ImageParams::new().seed(7))
        .unwrap();
    assert_eq!(results.images(), vec![png(b"cat")]);
    assert_eq!(h.generation.requests().len(), 2);
    assert_eq!(h.generation.requests()[0], h.generation.requests()[1]);
}

#[test]
fn test_quota_exhaustion_is_not_retried() {
    let h = harness(BackendLayout::Mock);
    h.generation.push_error(RpcError::new(RpcCode::ResourceExhausted, "no credits"));

    let err = h
        .client
        .generate(&PromptSet::new().text("a cat", 1.0), &ImageParams::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
    assert_eq!(h.generation.call_count(), 1);
}

#[test]
fn test_obfuscation_resubmits_with_next_seed() {
    let mut h = harness(BackendLayout::Mock);
    h.config.retry.retry_obfuscation = true;
    h.client = Client::new(h.generation.clone(), &h.config).with_orchestrator(quiet_orchestrator(&h.config.retry));

    let flagged = ClassifierParameters {
        exceeds: vec![ClassifierCategory {
            name: "nsfw".into(),
            concepts: vec![ClassifierConcept { concept: "nudity".into(), threshold: Some(0.5) }],
        }],
        realized_action: Some(ClassifierAction::Obfuscate),
    };
    h.generation.push_answers(vec![
        Artifact::binary(ArtifactType::Image, "image/png", png(b"blurred")),
        Artifact::classifier(flagged),
    ]);
    h.generation
        .push_answers(vec![Artifact::binary(ArtifactType::Image, "image/png", png(b"clean"))]);

    let results = h
        .client
        .generate(&PromptSet::new().text("a statue", 1.0), &ImageParams::new().seed(41))
        .unwrap();
    assert_eq!(results.images(), vec![png(b"clean")]);

    let requests = h.generation.requests();
    assert_eq!(requests[0].image.as_ref().unwrap().seed, vec![41]);
    assert_eq!(requests[1].image.as_ref().unwrap().seed, vec![42]);
}

#[test]
fn test_remote_with_local_mirror_session() {
    let h = harness(BackendLayout::RemoteWithLocalMirror);
    let session = session(&h);
    assert_eq!(session.backends().len(), 2);
    assert_eq!(session.primary().name(), "asset-service");

    let mut project = Project::create(&session, "Mirrored").unwrap();
    assert_eq!(h.projects.project_count(), 1);
    let local_dir = h.dir.path().join("projects").join(project.id());
    assert!(local_dir.join(project.id()).is_file());

    let settings = serde_json::json!({"canvas": {"width": 512, "height": 512}});
    let file_id = project.save_settings(&session, &settings).unwrap();
    assert_eq!(project.file_id(), file_id);
    assert!(local_dir.join(SETTINGS_FILENAME).is_file());
    assert_eq!(
        session.metadata().asset_with_role(project.id(), PROJECT_FILE_ROLE).as_deref(),
        Some(file_id.as_str())
    );
    assert_eq!(
        session.metadata().get(project.id(), &file_id).unwrap().filename.as_deref(),
        Some(SETTINGS_FILENAME)
    );
    assert_eq!(project.get_settings(&session).unwrap(), settings);

    let asset_id = project.put_image_asset(&session, &png(b"layer"), AssetUse::Project).unwrap();
    assert_eq!(fs::read(local_dir.join(format!("{}.png", asset_id))).unwrap(), b"layer");
    assert_eq!(
        project.get_image_asset(&session, &asset_id, AssetUse::Project).unwrap(),
        png(b"layer")
    );
    assert!(h.generation.stored_asset_count() >= 2);

    let reloaded = MetadataIndex::load(&h.config.storage.metadata_index_path).unwrap();
    assert_eq!(reloaded.get(project.id(), &asset_id).unwrap().mime_type, "image/png");

    let id = project.id().to_string();
    project.delete(&session).unwrap();
    assert_eq!(h.projects.project_count(), 0);
    assert!(!local_dir.exists());
    assert!(!session.metadata().contains_project(&id));
}

#[test]
fn test_local_only_session_survives_restart() {
    let h = harness(BackendLayout::Local);
    let id = {
        let session = session(&h);
        let mut project = Project::create(&session, "Local").unwrap();
        project
            .save_settings(&session, &serde_json::json!({"zoom": 2}))
            .unwrap();
        project.id().to_string()
    };

    let session = session(&h);
    let project = Project::get(&session, &id).unwrap();
    assert_eq!(project.title(), "Local");
    assert_eq!(project.get_settings(&session).unwrap(), serde_json::json!({"zoom": 2}));
    assert_eq!(Project::list(&session).unwrap().len(), 1);
}

#[test]
fn test_remote_layout_requires_remote_services() {
    let h = harness(BackendLayout::Remote);
    let err = Session::from_config(&h.config, None).err().unwrap();
    assert!(matches!(err, ClientError::Config(_)));
}
