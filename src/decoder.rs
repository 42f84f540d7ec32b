//! Artifact decoder
//!
//! Folds a response stream into a mapping from artifact kind to the ordered
//! list of decoded values. Image, mask and depth payloads stay encoded; codec
//! work belongs to the caller.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::wire::generation::{
    AnswerStream, Artifact, ArtifactPayload, ArtifactType, ClassifierAction, ClassifierParameters, RpcError, Tensor,
};

/// Decoded value of a single artifact
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    Binary(Bytes),
    Tensor(Tensor),
    Text(String),
    Classification(ClassifierParameters),
}

/// Decoded results of one call, keyed by artifact kind
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Artifacts {
    by_type: BTreeMap<ArtifactType, Vec<ArtifactValue>>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one artifact. The kind becomes present even when the payload
    /// carries nothing decodable for it.
    pub fn push(&mut self, artifact: Artifact) {
        let kind = artifact.artifact_type;
        let values = self.by_type.entry(kind).or_default();
        let value = match artifact.payload {
            ArtifactPayload::Classifier(classifier) => Some(ArtifactValue::Classification(classifier)),
            ArtifactPayload::Tensor(tensor) => Some(ArtifactValue::Tensor(tensor)),
            ArtifactPayload::Text(text) => Some(ArtifactValue::Text(text)),
            ArtifactPayload::Binary(data) => Some(ArtifactValue::Binary(data)),
            ArtifactPayload::Empty if kind.is_binary() => Some(ArtifactValue::Binary(Bytes::new())),
            ArtifactPayload::Empty => None,
        };
        if let Some(value) = value {
            values.push(value);
        }
    }

    pub fn contains(&self, kind: ArtifactType) -> bool {
        self.by_type.contains_key(&kind)
    }

    pub fn get(&self, kind: ArtifactType) -> &[ArtifactValue] {
        self.by_type.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn kinds(&self) -> impl Iterator<Item = ArtifactType> + '_ {
        self.by_type.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Binary payloads of the given kind, in arrival order
    pub fn binaries(&self, kind: ArtifactType) -> Vec<Bytes> {
        self.get(kind)
            .iter()
            .filter_map(|value| match value {
                ArtifactValue::Binary(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> Vec<Bytes> {
        self.binaries(ArtifactType::Image)
    }

    pub fn tensors(&self) -> Vec<Tensor> {
        self.get(ArtifactType::Tensor)
            .iter()
            .filter_map(|value| match value {
                ArtifactValue::Tensor(tensor) => Some(tensor.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.get(ArtifactType::Text)
            .iter()
            .filter_map(|value| match value {
                ArtifactValue::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn classifications(&self) -> Vec<&ClassifierParameters> {
        self.get(ArtifactType::Classifications)
            .iter()
            .filter_map(|value| match value {
                ArtifactValue::Classification(classifier) => Some(classifier),
                _ => None,
            })
            .collect()
    }

    /// First classification whose realized action is obfuscation
    pub fn obfuscation(&self) -> Option<&ClassifierParameters> {
        self.classifications()
            .into_iter()
            .find(|classifier| classifier.realized_action == Some(ClassifierAction::Obfuscate))
    }

    /// The artifact a stage hands to the next one: first tensor, else first
    /// image, else first depth map.
    pub fn primary_artifact(&self) -> Option<Artifact> {
        if let Some(tensor) = self.tensors().into_iter().next() {
            return Some(Artifact::tensor(tensor));
        }
        for kind in [ArtifactType::Image, ArtifactType::Depth] {
            if let Some(data) = self.binaries(kind).into_iter().next() {
                return Some(Artifact::binary(kind, "image/png", data));
            }
        }
        None
    }
}

/// Drain a response stream. A failure part way through discards whatever
/// was decoded so far.
pub fn decode(stream: AnswerStream) -> Result<Artifacts, RpcError> {
    let mut results = Artifacts::new();
    for answer in stream {
        for artifact in answer?.artifacts {
            results.push(artifact);
        }
    }
    Ok(results)
}
