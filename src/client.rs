//! Generation client
//!
//! High level calls (generate, inpaint, interpolate, transform) built on the
//! endpoint registry, the chain builder and the orchestrator.

use bytes::Bytes;
use log::{debug, info};
use std::sync::{Arc, Mutex};

use crate::chain::{depth_chain, linear_chain, run_unchained};
use crate::config::ClientConfig;
use crate::decoder::Artifacts;
use crate::endpoint::{Capability, EndpointRegistry};
use crate::error::{ClientError, Result};
use crate::orchestrator::{Orchestrator, Submission};
use crate::params::ImageParams;
use crate::storage::config::RemoteDeps;
use crate::wire::dashboard::DashboardService;
use crate::wire::generation::{
    ArtifactType, ChainRequest, GenerationService, ImageParameters, InterpolateMode, InterpolateParameters,
    MaskedAreaInit, Prompt, Request, TransformParameters,
};
use crate::wire::project::ProjectService;

/// Free-form request extras forwarded to the transform engine
pub type Extras = serde_json::Map<String, serde_json::Value>;

/// Weighted text prompts plus optional init image, mask and depth map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSet {
    texts: Vec<(String, f32)>,
    init_image: Option<Bytes>,
    mask: Option<Bytes>,
    depth: Option<Bytes>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair prompts with weights; an empty weight list weighs every prompt 1.0
    pub fn from_texts(prompts: &[&str], weights: &[f32]) -> Result<Self> {
        if !weights.is_empty() && weights.len() != prompts.len() {
            return Err(ClientError::Validation(format!(
                "{} prompts but {} weights",
                prompts.len(),
                weights.len()
            )));
        }
        let texts = prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| (prompt.to_string(), weights.get(i).copied().unwrap_or(1.0)))
            .collect();
        Ok(Self { texts, ..Self::default() })
    }

    pub fn text(mut self, prompt: &str, weight: f32) -> Self {
        self.texts.push((prompt.to_string(), weight));
        self
    }

    pub fn init_image(mut self, png: Bytes) -> Self {
        self.init_image = Some(png);
        self
    }

    pub fn mask(mut self, png: Bytes) -> Self {
        self.mask = Some(png);
        self
    }

    pub fn depth(mut self, png: Bytes) -> Self {
        self.depth = Some(png);
        self
    }

    /// Text prompts first, then init image, mask and depth
    fn to_prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self.texts.iter().map(|(text, weight)| Prompt::text(text, *weight)).collect();
        prompts.extend(self.init_image.clone().map(Prompt::image));
        prompts.extend(self.mask.clone().map(Prompt::mask));
        prompts.extend(self.depth.clone().map(Prompt::depth));
        prompts
    }
}

/// Output of a transform: images followed by depth maps, and masks when the
/// transform produced any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub images: Vec<Bytes>,
    pub masks: Option<Vec<Bytes>>,
}

impl From<&Artifacts> for TransformOutput {
    fn from(results: &Artifacts) -> Self {
        let mut images = results.images();
        images.extend(results.binaries(ArtifactType::Depth));
        let masks = results
            .contains(ArtifactType::Mask)
            .then(|| results.binaries(ArtifactType::Mask));
        Self { images, masks }
    }
}

/// Account summary from the dashboard service
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    /// Balance in credits (service balance times 100)
    pub credits: f64,
    pub profile_picture: String,
}

#[derive(Debug, Clone)]
struct CachedUser {
    organization_id: String,
    profile_picture: String,
}

pub struct Client {
    registry: EndpointRegistry,
    orchestrator: Arc<Orchestrator>,
    dashboard: Option<Arc<dyn DashboardService>>,
    debug_no_chains: bool,
    user: Mutex<Option<CachedUser>>,
}

impl Client {
    pub fn new(service: Arc<dyn GenerationService>, config: &ClientConfig) -> Self {
        Self {
            registry: EndpointRegistry::new(service, &config.endpoints),
            orchestrator: Arc::new(Orchestrator::new(&config.retry)),
            dashboard: None,
            debug_no_chains: config.retry.debug_no_chains,
            user: Mutex::new(None),
        }
    }

    /// Replace the orchestrator, e.g. one with a recording sleeper
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = Arc::new(orchestrator);
        self
    }

    pub fn with_dashboard(mut self, dashboard: Arc<dyn DashboardService>) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    /// Run chains stage by stage on the client instead of on the server
    pub fn with_debug_no_chains(mut self, debug_no_chains: bool) -> Self {
        self.debug_no_chains = debug_no_chains;
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Collaborators the remote asset backend needs, sharing this client's
    /// orchestrator and asset endpoint
    pub fn remote_deps(&self, projects: Arc<dyn ProjectService>) -> RemoteDeps {
        RemoteDeps {
            orchestrator: Arc::clone(&self.orchestrator),
            asset_endpoint: self.registry.get(Capability::Asset).clone(),
            projects,
        }
    }

    /// Submit a request or chain to the endpoint of a capability
    pub fn submit(&self, capability: Capability, submission: impl Into<Submission>) -> Result<Artifacts> {
        self.orchestrator.submit(self.registry.get(capability), submission)
    }

    /// Run a chain server side, or stage by stage in unchained mode
    fn run_chain(&self, chain: ChainRequest) -> Result<Artifacts> {
        if self.debug_no_chains {
            debug!("Running {} without server side chaining", chain.request_id);
            run_unchained(&self.orchestrator, &self.registry, &chain)
        } else {
            self.submit(Capability::Transform, chain)
        }
    }

    fn image_request(&self, capability: Capability, prompts: &PromptSet, image: ImageParameters) -> Request {
        let mut request = Request::new(self.registry.get(capability).engine_id());
        request.prompt = prompts.to_prompts();
        request.image = Some(image);
        request
    }

    /// The generation request `generate` would submit. Only the empty prompt
    /// set is rejected here.
    pub fn build_generate_request(&self, prompts: &PromptSet, params: &ImageParams) -> Result<Request> {
        if prompts.texts.is_empty() && prompts.init_image.is_none() {
            return Err(ClientError::Validation("prompt and/or init image must be provided".into()));
        }
        Ok(self.image_request(Capability::Generate, prompts, params.build()))
    }

    /// Generate images from weighted prompts
    pub fn generate(&self, prompts: &PromptSet, params: &ImageParams) -> Result<Artifacts> {
        if prompts.mask.is_some() && prompts.init_image.is_none() {
            return Err(ClientError::Validation("a mask requires an init image".into()));
        }
        let request = self.build_generate_request(prompts, params)?;
        self.submit(Capability::Generate, request)
    }

    /// Inpaint the masked area of `image`. The masked area starts from zero
    /// unless `params` chooses otherwise.
    pub fn inpaint(&self, image: Bytes, mask: Bytes, prompts: &PromptSet, params: &ImageParams) -> Result<Artifacts> {
        let prompts = prompts.clone().init_image(image).mask(mask);
        let image = params.build_with_masked_default(MaskedAreaInit::Zero);
        let request = self.image_request(Capability::Inpaint, &prompts, image);
        self.submit(Capability::Inpaint, request)
    }

    /// One image per ratio between two input images. A single ratio of
    /// exactly 0 or 1 returns the matching input without a remote call.
    pub fn interpolate(&self, images: &[Bytes], ratios: &[f32], mode: InterpolateMode) -> Result<Vec<Bytes>> {
        if images.len() != 2 {
            return Err(ClientError::Validation(format!(
                "interpolation needs exactly two images, got {}",
                images.len()
            )));
        }
        if ratios.is_empty() {
            return Err(ClientError::Validation("interpolation needs at least one ratio".into()));
        }
        if let [ratio] = ratios {
            if *ratio == 0.0 {
                return Ok(vec![images[0].clone()]);
            }
            if *ratio == 1.0 {
                return Ok(vec![images[1].clone()]);
            }
        }

        let mut request = Request::new(self.registry.get(Capability::Interpolate).engine_id());
        request.prompt = images.iter().cloned().map(Prompt::image).collect();
        request.interpolate = Some(InterpolateParameters { ratios: ratios.to_vec(), mode });
        Ok(self.submit(Capability::Interpolate, request)?.images())
    }

    fn transform_request(&self, prompts: Vec<Prompt>, params: TransformParameters) -> Request {
        let mut request = Request::new(self.registry.get(Capability::Transform).engine_id());
        request.prompt = prompts;
        request.transform = Some(params);
        request
    }

    /// Apply one transform, or several as a chain where only the first
    /// stage receives the input images.
    pub fn transform(
        &self,
        images: &[Bytes],
        params: &[TransformParameters],
        extras: Option<Extras>,
    ) -> Result<TransformOutput> {
        if images.is_empty() {
            return Err(ClientError::Validation("transform needs at least one image".into()));
        }
        let image_prompts: Vec<Prompt> = images.iter().cloned().map(Prompt::image).collect();

        let results = match params {
            [] => return Err(ClientError::Validation("transform needs at least one parameter block".into())),
            [single] => {
                let mut request = self.transform_request(image_prompts, single.clone());
                request.extras = extras;
                self.submit(Capability::Transform, request)?
            }
            _ => {
                if extras.is_some() {
                    return Err(ClientError::Validation("extras are not supported on transform chains".into()));
                }
                let stages = params
                    .iter()
                    .enumerate()
                    .map(|(index, param)| {
                        let prompts = if index == 0 { image_prompts.clone() } else { Vec::new() };
                        self.transform_request(prompts, param.clone())
                    })
                    .collect();
                self.run_chain(linear_chain("xform_chain", stages, None)?)?
            }
        };
        Ok(TransformOutput::from(&results))
    }

    /// Transform `image` into a tensor chain feeding a final generation
    /// request; returns the first generated image
    pub fn transform_and_generate(
        &self,
        image: Bytes,
        params: &[TransformParameters],
        generate: Request,
        extras: Option<Extras>,
    ) -> Result<Bytes> {
        let results = if params.is_empty() {
            self.submit(Capability::Generate, generate)?
        } else {
            let stages = params
                .iter()
                .enumerate()
                .map(|(index, param)| {
                    let prompts = if index == 0 { vec![Prompt::image(image.clone())] } else { Vec::new() };
                    let mut request = self.transform_request(prompts, param.clone());
                    request.requested_type = Some(ArtifactType::Tensor);
                    request.extras = extras.clone();
                    request
                })
                .collect();
            self.run_chain(linear_chain("xform_gen_chain", stages, Some(generate))?)?
        };
        results
            .images()
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Storage("generation returned no image".into()))
    }

    /// Depth estimation on the first image feeding a resample or camera pose
    /// transform of every image. The depth tensor follows the image prompts.
    pub fn transform_3d(
        &self,
        images: &[Bytes],
        depth_calc: TransformParameters,
        transform: TransformParameters,
        extras: Option<Extras>,
    ) -> Result<TransformOutput> {
        let first = images
            .first()
            .ok_or_else(|| ClientError::Validation("3d transform needs at least one image".into()))?;
        let mut depth = self.transform_request(vec![Prompt::image(first.clone())], depth_calc);
        depth.requested_type = Some(ArtifactType::Tensor);
        let mut warp = self.transform_request(images.iter().cloned().map(Prompt::image).collect(), transform);
        warp.extras = extras;

        let results = self.run_chain(depth_chain(depth, warp)?)?;
        Ok(TransformOutput::from(&results))
    }

    /// Credits remaining and profile picture. The organization is looked up
    /// once and cached.
    pub fn get_user_info(&self) -> Result<UserInfo> {
        let dashboard = self
            .dashboard
            .as_ref()
            .ok_or_else(|| ClientError::Config("no dashboard service configured".into()))?;

        let mut cached = self.user.lock().unwrap_or_else(|e| e.into_inner());
        let user = match cached.as_ref() {
            Some(user) => user.clone(),
            None => {
                let me = dashboard.get_me().map_err(ClientError::Transport)?;
                let organization_id = me
                    .organizations
                    .first()
                    .map(|member| member.organization.id.clone())
                    .ok_or_else(|| ClientError::Validation(format!("user {} has no organization", me.id)))?;
                info!("Caching organization {} for user {}", organization_id, me.id);
                let user = CachedUser { organization_id, profile_picture: me.profile_picture };
                *cached = Some(user.clone());
                user
            }
        };
        drop(cached);

        let organization = dashboard
            .get_organization(&user.organization_id)
            .map_err(ClientError::Transport)?;
        Ok(UserInfo { credits: organization.balance * 100.0, profile_picture: user.profile_picture })
    }
}
