//! In-memory implementations of the remote service traits for testing

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use log::info;

use crate::decoder::Artifacts;
use crate::wire::dashboard::{DashboardService, Organization, User};
use crate::wire::generation::{
    Answer, AnswerStream, Artifact, ArtifactPayload, ArtifactType, AssetAction, ChainRequest, GenerationService,
    Prompt, Request, RpcCode, RpcError, StageAction,
};
use crate::wire::project::{
    CreateProjectRequest, Project, ProjectAsset, ProjectService, UpdateProjectRequest,
};

/// Computes the artifacts a request produces when nothing is scripted
pub type Handler = Box<dyn Fn(&Request) -> Result<Vec<Artifact>, RpcError> + Send + Sync>;

enum Scripted {
    Answers(Vec<Artifact>),
    Error(RpcError),
    PartialThenError(Vec<Artifact>, RpcError),
}

/// Mock generation service.
///
/// Scripted responses are consumed first, in order, by both unary and chain
/// calls. Once the script is empty, asset requests are served from an
/// in-memory asset store and everything else goes to the handler. Chains are
/// then executed stage by stage: a PASS appends the stage's primary artifact
/// to the target stage's prompts.
pub struct MockGenerationService {
    script: Mutex<VecDeque<Scripted>>,
    handler: Option<Handler>,
    assets: Mutex<HashMap<String, Artifact>>,
    next_asset: AtomicU64,
    requests: Mutex<Vec<Request>>,
    chains: Mutex<Vec<ChainRequest>>,
}

impl MockGenerationService {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            handler: None,
            assets: Mutex::new(HashMap::new()),
            next_asset: AtomicU64::new(1),
            requests: Mutex::new(Vec::new()),
            chains: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn push_answers(&self, artifacts: Vec<Artifact>) {
        self.script.lock().unwrap().push_back(Scripted::Answers(artifacts));
    }

    pub fn push_error(&self, error: RpcError) {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
    }

    /// One answer arrives, then the stream fails
    pub fn push_partial_then_error(&self, artifacts: Vec<Artifact>, error: RpcError) {
        self.script.lock().unwrap().push_back(Scripted::PartialThenError(artifacts, error));
    }

    /// Unary requests received so far
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Chains received so far
    pub fn chains(&self) -> Vec<ChainRequest> {
        self.chains.lock().unwrap().clone()
    }

    /// Total number of calls, unary and chain
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len() + self.chains.lock().unwrap().len()
    }

    /// Number of assets held by the in-memory asset store
    pub fn stored_asset_count(&self) -> usize {
        self.assets.lock().unwrap().len()
    }

    fn next_scripted(&self) -> Option<Scripted> {
        self.script.lock().unwrap().pop_front()
    }

    fn stream(answers: Vec<Result<Answer, RpcError>>) -> AnswerStream {
        Box::new(answers.into_iter())
    }

    fn scripted_stream(scripted: Scripted) -> Result<AnswerStream, RpcError> {
        match scripted {
            Scripted::Answers(artifacts) => Ok(Self::stream(vec![Ok(Answer { answer_id: "scripted".into(), artifacts })])),
            Scripted::Error(error) => Err(error),
            Scripted::PartialThenError(artifacts, error) => Ok(Self::stream(vec![
                Ok(Answer { answer_id: "partial".into(), artifacts }),
                Err(error),
            ])),
        }
    }

    fn respond(&self, request: &Request) -> Result<Vec<Artifact>, RpcError> {
        if request.asset.is_some() {
            return self.serve_asset(request);
        }
        match &self.handler {
            Some(handler) => handler(request),
            None => Err(RpcError::new(RpcCode::Unimplemented, "no scripted response or handler")),
        }
    }

    fn serve_asset(&self, request: &Request) -> Result<Vec<Artifact>, RpcError> {
        let Some(asset) = request.asset.as_ref() else {
            return Err(RpcError::new(RpcCode::InvalidArgument, "missing asset parameters"));
        };
        let artifact = request
            .prompt
            .iter()
            .find_map(Prompt::artifact)
            .ok_or_else(|| RpcError::new(RpcCode::InvalidArgument, "asset request without artifact"))?;

        let mut assets = self.assets.lock().unwrap();
        match asset.action {
            AssetAction::Put => {
                let id = match artifact.uuid.as_deref() {
                    Some(uuid) if !uuid.is_empty() => uuid.to_string(),
                    _ => format!("asset-{}", self.next_asset.fetch_add(1, Ordering::SeqCst)),
                };
                assets.insert(format!("{}/{}", asset.project_id, id), artifact.clone());
                info!("Mock: stored asset {} for project {}", id, asset.project_id);
                Ok(vec![Artifact::text("text/plain", format!("{}/{}", asset.project_id, id))])
            }
            AssetAction::Get => {
                let uuid = artifact.uuid.clone().unwrap_or_default();
                assets
                    .get(&format!("{}/{}", asset.project_id, uuid))
                    .cloned()
                    .map(|stored| vec![stored])
                    .ok_or_else(|| RpcError::new(RpcCode::NotFound, format!("asset {} not found", uuid)))
            }
        }
    }

    fn execute_chain(&self, chain: &ChainRequest) -> Result<Vec<Artifact>, RpcError> {
        let mut index = 0;
        let mut passed: Option<Artifact> = None;
        for _ in 0..chain.stage.len() {
            let stage = &chain.stage[index];
            let mut request = stage.request.clone();
            if let Some(artifact) = passed.take() {
                request.prompt.push(Prompt::Artifact(artifact));
            }
            let artifacts = self.respond(&request)?;

            let transition = stage.on_status.first();
            let returns = transition.map_or(true, |t| t.action.contains(&StageAction::Return));
            if returns {
                return Ok(artifacts);
            }

            let mut decoded = Artifacts::new();
            for artifact in artifacts {
                decoded.push(artifact);
            }
            passed = decoded.primary_artifact();
            let target = transition.and_then(|t| t.target.clone()).unwrap_or_default();
            index = chain
                .stage
                .iter()
                .position(|s| s.id == target)
                .ok_or_else(|| RpcError::new(RpcCode::InvalidArgument, format!("unknown stage {}", target)))?;
        }
        Err(RpcError::new(RpcCode::InvalidArgument, "chain never returned"))
    }
}

impl Default for MockGenerationService {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationService for MockGenerationService {
    fn generate(&self, request: &Request) -> Result<AnswerStream, RpcError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.next_scripted() {
            return Self::scripted_stream(scripted);
        }
        let artifacts = self.respond(request)?;
        Ok(Self::stream(vec![Ok(Answer { answer_id: "mock".into(), artifacts })]))
    }

    fn chain_generate(&self, chain: &ChainRequest) -> Result<AnswerStream, RpcError> {
        self.chains.lock().unwrap().push(chain.clone());
        if let Some(scripted) = self.next_scripted() {
            return Self::scripted_stream(scripted);
        }
        let artifacts = self.execute_chain(chain)?;
        Ok(Self::stream(vec![Ok(Answer { answer_id: chain.request_id.clone(), artifacts })]))
    }
}

/// Mock project service keeping projects in memory
pub struct MockProjectService {
    projects: Mutex<HashMap<String, Project>>,
    assets: Mutex<HashMap<String, Vec<ProjectAsset>>>,
    next_id: AtomicU64,
}

impl MockProjectService {
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
            assets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn project_count(&self) -> usize {
        self.projects.lock().unwrap().len()
    }

    /// Register an asset as the remote service would after a PUT
    pub fn add_asset(&self, project_id: &str, asset: ProjectAsset) {
        self.assets
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .push(asset);
    }

    fn not_found(id: &str) -> RpcError {
        RpcError::new(RpcCode::NotFound, format!("project {} not found", id))
    }
}

impl Default for MockProjectService {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectService for MockProjectService {
    fn create(&self, request: &CreateProjectRequest) -> Result<Project, RpcError> {
        let id = format!("proj-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let project = Project {
            id: id.clone(),
            title: request.title.clone(),
            owner_id: "owner".into(),
            access: request.access,
            status: request.status,
            file: None,
        };
        self.projects.lock().unwrap().insert(id, project.clone());
        Ok(project)
    }

    fn get(&self, id: &str) -> Result<Project, RpcError> {
        self.projects.lock().unwrap().get(id).cloned().ok_or_else(|| Self::not_found(id))
    }

    fn delete(&self, id: &str) -> Result<(), RpcError> {
        self.assets.lock().unwrap().remove(id);
        self.projects.lock().unwrap().remove(id).map(|_| ()).ok_or_else(|| Self::not_found(id))
    }

    fn list(&self, _owner_id: &str) -> Result<Vec<Project>, RpcError> {
        Ok(self.projects.lock().unwrap().values().cloned().collect())
    }

    fn update(&self, request: &UpdateProjectRequest) -> Result<Project, RpcError> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects.get_mut(&request.id).ok_or_else(|| Self::not_found(&request.id))?;
        if let Some(title) = &request.title {
            project.title = title.clone();
        }
        if let Some(file) = &request.file {
            project.file = Some(file.clone());
        }
        Ok(project.clone())
    }

    fn query_assets(&self, id: &str) -> Result<Vec<ProjectAsset>, RpcError> {
        if !self.projects.lock().unwrap().contains_key(id) {
            return Err(Self::not_found(id));
        }
        Ok(self.assets.lock().unwrap().get(id).cloned().unwrap_or_default())
    }
}

/// Mock dashboard service with a single user and organization
pub struct MockDashboardService {
    user: User,
    organization: Organization,
    me_calls: AtomicU64,
}

impl MockDashboardService {
    pub fn new(user: User, organization: Organization) -> Self {
        Self { user, organization, me_calls: AtomicU64::new(0) }
    }

    pub fn me_calls(&self) -> u64 {
        self.me_calls.load(Ordering::SeqCst)
    }
}

impl DashboardService for MockDashboardService {
    fn get_me(&self) -> Result<User, RpcError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.user.clone())
    }

    fn get_organization(&self, id: &str) -> Result<Organization, RpcError> {
        if id == self.organization.id {
            Ok(self.organization.clone())
        } else {
            Err(RpcError::new(RpcCode::NotFound, format!("organization {} not found", id)))
        }
    }
}

/// Stored artifact with its payload dropped, as the video read path has been
/// observed to return
pub fn without_payload(artifact: &Artifact) -> Artifact {
    Artifact {
        artifact_type: artifact.artifact_type,
        mime: artifact.mime.clone(),
        uuid: artifact.uuid.clone(),
        payload: ArtifactPayload::Empty,
    }
}
