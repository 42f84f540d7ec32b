//! Chain builder
//!
//! Composes per-stage requests into a `ChainRequest` whose stages PASS in
//! order and whose last stage RETURNs, validates chain shape, and can run a
//! chain on the client one stage at a time (unchained mode).

use log::debug;
use std::collections::HashSet;

use crate::decoder::Artifacts;
use crate::endpoint::EndpointRegistry;
use crate::error::{ClientError, Result};
use crate::orchestrator::Orchestrator;
use crate::wire::generation::{ChainRequest, OnStatus, Prompt, Request, Stage, StageAction};

/// Builds a sequential chain from stages added in order
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    request_id: String,
    stages: Vec<(String, Request)>,
}

impl ChainBuilder {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, id: &str, request: Request) -> Self {
        self.stages.push((id.to_string(), request));
        self
    }

    /// Link each stage to the next with PASS; the last one RETURNs
    pub fn build(self) -> Result<ChainRequest> {
        let ids: Vec<String> = self.stages.iter().map(|(id, _)| id.clone()).collect();
        let stage = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(index, (id, request))| {
                let on_status = match ids.get(index + 1) {
                    Some(next) => OnStatus { action: vec![StageAction::Pass], target: Some(next.clone()) },
                    None => OnStatus { action: vec![StageAction::Return], target: None },
                };
                Stage { id, request, on_status: vec![on_status] }
            })
            .collect();
        let chain = ChainRequest { request_id: self.request_id, stage };
        chain.validate()?;
        Ok(chain)
    }
}

/// Transform stages feeding each other, optionally ending in a terminal
/// generation request. Stage ids are their positions.
pub fn linear_chain(request_id: &str, stages: Vec<Request>, terminal: Option<Request>) -> Result<ChainRequest> {
    let builder = stages
        .into_iter()
        .chain(terminal)
        .enumerate()
        .fold(ChainBuilder::new(request_id), |builder, (index, request)| {
            builder.stage(&index.to_string(), request)
        });
    builder.build()
}

/// Depth estimation passing its tensor into a transform stage keyed by the
/// transform's operation name.
pub fn depth_chain(depth: Request, transform: Request) -> Result<ChainRequest> {
    let op_id = transform
        .transform
        .as_ref()
        .map(|params| params.op_name())
        .ok_or_else(|| ClientError::Validation("3d transform stage has no transform parameters".into()))?;
    ChainBuilder::new(&format!("{}_3d_chain", op_id))
        .stage("depth_calc", depth)
        .stage(op_id, transform)
        .build()
}

fn stage_error(chain: &ChainRequest, message: String) -> ClientError {
    ClientError::Validation(format!("chain '{}': {}", chain.request_id, message))
}

impl ChainRequest {
    /// Stages in execution order, from the first stage to the returning one.
    ///
    /// Fails unless ids are unique, every target exists, exactly one stage
    /// returns, and that stage is reached from the first via PASS edges.
    pub fn execution_path(&self) -> Result<Vec<&Stage>> {
        if self.stage.is_empty() {
            return Err(stage_error(self, "no stages".into()));
        }

        let mut ids = HashSet::new();
        for stage in &self.stage {
            if !ids.insert(stage.id.as_str()) {
                return Err(stage_error(self, format!("duplicate stage id '{}'", stage.id)));
            }
        }

        let mut returning = 0;
        for stage in &self.stage {
            for status in &stage.on_status {
                if status.action.contains(&StageAction::Return) {
                    returning += 1;
                } else if let Some(target) = &status.target {
                    if !ids.contains(target.as_str()) {
                        return Err(stage_error(self, format!("stage '{}' targets unknown '{}'", stage.id, target)));
                    }
                }
            }
        }
        if returning != 1 {
            return Err(stage_error(self, format!("expected one returning stage, found {}", returning)));
        }

        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut current = &self.stage[0];
        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(stage_error(self, format!("cycle through stage '{}'", current.id)));
            }
            path.push(current);
            if next_stage_id(current).is_none() {
                return Ok(path);
            }
            let target = next_stage_id(current).flatten().ok_or_else(|| {
                stage_error(self, format!("stage '{}' neither passes nor returns", current.id))
            })?;
            current = self
                .stage
                .iter()
                .find(|stage| stage.id == target)
                .ok_or_else(|| stage_error(self, format!("unknown stage '{}'", target)))?;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.execution_path().map(|_| ())
    }
}

/// `None` for a returning stage, `Some(target)` for a passing one
fn next_stage_id(stage: &Stage) -> Option<Option<&str>> {
    if stage.on_status.iter().any(|status| status.action.contains(&StageAction::Return)) {
        return None;
    }
    Some(
        stage
            .on_status
            .iter()
            .find(|status| status.action.contains(&StageAction::Pass))
            .and_then(|status| status.target.as_deref()),
    )
}

/// Run a chain one stage at a time. Each stage is submitted to the endpoint
/// serving its engine, and its primary artifact is appended to the next
/// stage's prompts, as the server does for PASS edges.
pub fn run_unchained(
    orchestrator: &Orchestrator,
    registry: &EndpointRegistry,
    chain: &ChainRequest,
) -> Result<Artifacts> {
    let path = chain.execution_path()?;
    let mut passed = None;
    let mut results = Artifacts::new();
    for (index, stage) in path.iter().enumerate() {
        let mut request = stage.request.clone();
        if let Some(artifact) = passed.take() {
            request.prompt.push(Prompt::Artifact(artifact));
        }
        let endpoint = registry.by_engine(&request.engine_id).ok_or_else(|| {
            ClientError::Validation(format!("no endpoint serves engine '{}'", request.engine_id))
        })?;
        debug!("Running stage '{}' of {} on {}", stage.id, chain.request_id, endpoint.engine_id());
        results = orchestrator.submit(endpoint, request)?;

        if index + 1 < path.len() {
            passed = Some(results.primary_artifact().ok_or_else(|| {
                ClientError::Storage(format!("stage '{}' produced nothing to pass on", stage.id))
            })?);
        }
    }
    Ok(results)
}
