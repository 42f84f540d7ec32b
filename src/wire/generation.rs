//! Generation service contract
//!
//! Request, chain and answer shapes exchanged with the remote generation
//! service, plus the blocking call trait the orchestrator dispatches through.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a single output or input artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactType {
    Image,
    Mask,
    Depth,
    Tensor,
    Text,
    Video,
    Classifications,
}

impl ArtifactType {
    /// Kinds whose payload is an encoded binary blob
    pub fn is_binary(&self) -> bool {
        matches!(self, ArtifactType::Image | ArtifactType::Mask | ArtifactType::Depth | ArtifactType::Video)
    }
}

/// Structured tensor payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub data: Bytes,
}

/// Payload carried by an artifact
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    Empty,
    Binary(Bytes),
    Text(String),
    Tensor(Tensor),
    Classifier(ClassifierParameters),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub artifact_type: ArtifactType,
    pub mime: String,
    /// Asset identifier, used when an artifact refers to stored content
    pub uuid: Option<String>,
    pub payload: ArtifactPayload,
}

impl Artifact {
    pub fn binary(artifact_type: ArtifactType, mime: &str, data: Bytes) -> Self {
        Self {
            artifact_type,
            mime: mime.to_string(),
            uuid: None,
            payload: ArtifactPayload::Binary(data),
        }
    }

    pub fn text(mime: &str, text: String) -> Self {
        Self {
            artifact_type: ArtifactType::Text,
            mime: mime.to_string(),
            uuid: None,
            payload: ArtifactPayload::Text(text),
        }
    }

    pub fn tensor(tensor: Tensor) -> Self {
        Self {
            artifact_type: ArtifactType::Tensor,
            mime: String::new(),
            uuid: None,
            payload: ArtifactPayload::Tensor(tensor),
        }
    }

    pub fn classifier(classifier: ClassifierParameters) -> Self {
        Self {
            artifact_type: ArtifactType::Classifications,
            mime: String::new(),
            uuid: None,
            payload: ArtifactPayload::Classifier(classifier),
        }
    }

    /// Reference to a stored asset by id, with no inline payload
    pub fn reference(artifact_type: ArtifactType, mime: &str, uuid: &str) -> Self {
        Self {
            artifact_type,
            mime: mime.to_string(),
            uuid: Some(uuid.to_string()),
            payload: ArtifactPayload::Empty,
        }
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }
}

/// One entry of a request's ordered prompt list
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text { text: String, weight: f32 },
    Artifact(Artifact),
}

impl Prompt {
    pub fn text(text: &str, weight: f32) -> Self {
        Prompt::Text { text: text.to_string(), weight }
    }

    pub fn image(png: Bytes) -> Self {
        Prompt::Artifact(Artifact::binary(ArtifactType::Image, "image/png", png))
    }

    pub fn mask(png: Bytes) -> Self {
        Prompt::Artifact(Artifact::binary(ArtifactType::Mask, "image/png", png))
    }

    pub fn depth(png: Bytes) -> Self {
        Prompt::Artifact(Artifact::binary(ArtifactType::Depth, "image/png", png))
    }

    pub fn tensor(tensor: Tensor) -> Self {
        Prompt::Artifact(Artifact::tensor(tensor))
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Prompt::Artifact(artifact) => Some(artifact),
            Prompt::Text { .. } => None,
        }
    }
}

/// Error raised by a wire enum lookup from a user supplied name
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {kind}: {name}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => [$($alias:literal),+]),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl std::str::FromStr for $name {
            type Err = UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($($alias)|+ => Ok($name::$variant),)+
                    _ => Err(UnknownName { kind: $kind, name: s.to_string() }),
                }
            }
        }
    };
}

named_enum!(DiffusionSampler, "sampler", {
    Ddim => ["ddim"],
    Ddpm => ["plms", "ddpm"],
    KEuler => ["k_euler"],
    KEulerAncestral => ["k_euler_ancestral"],
    KHeun => ["k_heun"],
    KDpm2 => ["k_dpm_2"],
    KDpm2Ancestral => ["k_dpm_2_ancestral"],
    KLms => ["k_lms"],
    KDpmpp2m => ["k_dpmpp_2m"],
    KDpmpp2sAncestral => ["k_dpmpp_2s_ancestral"],
});

named_enum!(GuidancePreset, "guidance preset", {
    None => ["none"],
    Simple => ["simple"],
    FastBlue => ["fastblue"],
    FastGreen => ["fastgreen"],
});

named_enum!(MaskedAreaInit, "masked area init", {
    Zero => ["zero"],
    RandomNoise => ["random_noise", "noise"],
    Original => ["original"],
});

named_enum!(InterpolateMode, "interpolation mode", {
    Film => ["film"],
    Linear => ["mix", "linear"],
    Rife => ["rife"],
    VaeLinear => ["vae-lerp"],
    VaeSlerp => ["vae-slerp"],
});

named_enum!(BorderMode, "border mode", {
    Replicate => ["replicate"],
    Reflect => ["reflect"],
    Wrap => ["wrap"],
    Zero => ["zero"],
    Prefill => ["prefill"],
});

named_enum!(ColorMatchMode, "color space", {
    Hsv => ["hsv"],
    Lab => ["lab"],
    Rgb => ["rgb"],
});

named_enum!(CameraType, "camera type", {
    Perspective => ["perspective"],
    Orthographic => ["orthographic"],
});

named_enum!(RenderMode, "render mode", {
    Mesh => ["mesh"],
    PointCloud => ["pointcloud"],
});

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleParameters {
    pub start: Option<f32>,
    pub end: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerParameters {
    pub cfg_scale: f32,
    pub init_noise_scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CutoutParameters {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceInstanceParameters {
    pub cutouts: Option<CutoutParameters>,
    pub guidance_strength: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceParameters {
    pub guidance_preset: GuidancePreset,
    pub instances: Vec<GuidanceInstanceParameters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepParameter {
    pub scaled_step: f32,
    pub sampler: Option<SamplerParameters>,
    pub schedule: Option<ScheduleParameters>,
    pub guidance: Option<GuidanceParameters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageParameters {
    pub height: u32,
    pub width: u32,
    pub seed: Vec<u32>,
    pub samples: u32,
    pub steps: u32,
    pub sampler: DiffusionSampler,
    pub masked_area_init: MaskedAreaInit,
    pub parameters: Vec<StepParameter>,
}

/// Per-operation transform parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TransformParameters {
    DepthCalc {
        blend_weight: f32,
        blur_radius: u32,
        reverse: bool,
    },
    Resample {
        border_mode: BorderMode,
        transform: Vec<f32>,
        prev_transform: Option<Vec<f32>>,
        depth_warp: f32,
        export_mask: bool,
    },
    CameraPose {
        world_to_view: Vec<f32>,
        camera_type: CameraType,
        near_plane: f32,
        far_plane: f32,
        fov: f32,
        render_mode: RenderMode,
        do_prefill: bool,
    },
    ColorAdjust {
        brightness: f32,
        contrast: f32,
        hue: f32,
        saturation: f32,
        lightness: f32,
        match_mode: Option<ColorMatchMode>,
        noise_amount: f32,
        noise_seed: u32,
    },
}

impl TransformParameters {
    /// Name of the operation this parameter block selects
    pub fn op_name(&self) -> &'static str {
        match self {
            TransformParameters::DepthCalc { .. } => "depth_calc",
            TransformParameters::Resample { .. } => "resample",
            TransformParameters::CameraPose { .. } => "camera_pose",
            TransformParameters::ColorAdjust { .. } => "color_adjust",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolateParameters {
    pub ratios: Vec<f32>,
    pub mode: InterpolateMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetAction {
    Get,
    Put,
}

/// Intended use of a stored asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetUse {
    Undefined,
    Input,
    Output,
    Intermediate,
    Project,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetParameters {
    pub action: AssetAction,
    pub project_id: String,
    pub asset_use: AssetUse,
}

/// A single generation call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub engine_id: String,
    pub requested_type: Option<ArtifactType>,
    pub prompt: Vec<Prompt>,
    pub image: Option<ImageParameters>,
    pub transform: Option<TransformParameters>,
    pub interpolate: Option<InterpolateParameters>,
    pub asset: Option<AssetParameters>,
    pub extras: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Request {
    pub fn new(engine_id: &str) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    Pass,
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnStatus {
    pub action: Vec<StageAction>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub id: String,
    pub request: Request,
    pub on_status: Vec<OnStatus>,
}

/// Server side pipeline of stages linked by PASS / RETURN edges
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRequest {
    pub request_id: String,
    pub stage: Vec<Stage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierAction {
    Passthrough,
    Regenerate,
    Obfuscate,
    Discard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConcept {
    pub concept: String,
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierCategory {
    pub name: String,
    pub concepts: Vec<ClassifierConcept>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierParameters {
    pub exceeds: Vec<ClassifierCategory>,
    pub realized_action: Option<ClassifierAction>,
}

/// One message of a response stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Answer {
    pub answer_id: String,
    pub artifacts: Vec<Artifact>,
}

/// Status codes a remote call can fail with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
}

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rpc error {code:?}: {details}")]
pub struct RpcError {
    pub code: RpcCode,
    pub details: String,
}

impl RpcError {
    pub fn new(code: RpcCode, details: impl Into<String>) -> Self {
        Self { code, details: details.into() }
    }
}

/// Streamed answers of a call, terminated when the iterator ends
pub type AnswerStream = Box<dyn Iterator<Item = Result<Answer, RpcError>> + Send>;

/// Blocking client side of the generation service
pub trait GenerationService: Send + Sync {
    /// Unary request, streamed response
    fn generate(&self, request: &Request) -> Result<AnswerStream, RpcError>;

    /// Multi-stage chain, streamed response of the returning stage
    fn chain_generate(&self, chain: &ChainRequest) -> Result<AnswerStream, RpcError>;
}
