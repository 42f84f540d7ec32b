//! Endpoint registry: capability name to remote call target

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::wire::generation::GenerationService;

/// Logical capability of the remote generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Generate,
    Inpaint,
    Interpolate,
    Transform,
    Asset,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Generate,
        Capability::Inpaint,
        Capability::Interpolate,
        Capability::Transform,
        Capability::Asset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Generate => "generate",
            Capability::Inpaint => "inpaint",
            Capability::Interpolate => "interpolate",
            Capability::Transform => "transform",
            Capability::Asset => "asset",
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|capability| capability.name() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

lazy_static! {
    /// Engine ids used when the configuration does not override them
    pub static ref DEFAULT_ENGINES: HashMap<Capability, &'static str> = {
        let mut engines = HashMap::new();
        engines.insert(Capability::Generate, "stable-diffusion-v1-5");
        engines.insert(Capability::Inpaint, "stable-inpainting-512-v2-0");
        engines.insert(Capability::Interpolate, "interpolation-server-v1");
        engines.insert(Capability::Transform, "transform-server-v1");
        engines.insert(Capability::Asset, "asset-service");
        engines
    };
}

/// Call target for one capability. Immutable once built.
#[derive(Clone)]
pub struct Endpoint {
    capability: Capability,
    engine_id: String,
    service: Arc<dyn GenerationService>,
}

impl Endpoint {
    pub fn new(capability: Capability, engine_id: &str, service: Arc<dyn GenerationService>) -> Self {
        Self {
            capability,
            engine_id: engine_id.to_string(),
            service,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn service(&self) -> &dyn GenerationService {
        self.service.as_ref()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("capability", &self.capability)
            .field("engine_id", &self.engine_id)
            .finish()
    }
}

/// One endpoint per capability, created once per session
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    generate: Endpoint,
    inpaint: Endpoint,
    interpolate: Endpoint,
    transform: Endpoint,
    asset: Endpoint,
}

impl EndpointRegistry {
    pub fn new(service: Arc<dyn GenerationService>, config: &EndpointConfig) -> Self {
        let endpoint = |capability: Capability| {
            Endpoint::new(capability, config.engine_for(capability), Arc::clone(&service))
        };
        Self {
            generate: endpoint(Capability::Generate),
            inpaint: endpoint(Capability::Inpaint),
            interpolate: endpoint(Capability::Interpolate),
            transform: endpoint(Capability::Transform),
            asset: endpoint(Capability::Asset),
        }
    }

    pub fn get(&self, capability: Capability) -> &Endpoint {
        match capability {
            Capability::Generate => &self.generate,
            Capability::Inpaint => &self.inpaint,
            Capability::Interpolate => &self.interpolate,
            Capability::Transform => &self.transform,
            Capability::Asset => &self.asset,
        }
    }

    /// Endpoint serving the given engine id, if any
    pub fn by_engine(&self, engine_id: &str) -> Option<&Endpoint> {
        Capability::ALL
            .iter()
            .map(|capability| self.get(*capability))
            .find(|endpoint| endpoint.engine_id() == engine_id)
    }
}
