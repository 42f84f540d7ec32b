//! Request orchestrator
//!
//! Owns the retry loop around a single request or a chain. Each attempt is
//! dispatched, decoded and checked for classifier obfuscation; the retry
//! policy decides what happens after a failure. Results of a failed attempt
//! are dropped, never merged with a later attempt.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::decoder::{decode, Artifacts};
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::wire::generation::{ChainRequest, Request, RpcError};

/// What gets dispatched on each attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Single(Request),
    Chain(ChainRequest),
}

impl Submission {
    fn label(&self) -> String {
        match self {
            Submission::Single(request) => request.engine_id.clone(),
            Submission::Chain(chain) => chain.request_id.clone(),
        }
    }
}

impl From<Request> for Submission {
    fn from(request: Request) -> Self {
        Submission::Single(request)
    }
}

impl From<ChainRequest> for Submission {
    fn from(chain: ChainRequest) -> Self {
        Submission::Chain(chain)
    }
}

/// Blocks the calling thread between attempts
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Removes the log context keys when a submission ends
struct MdcScope;

impl MdcScope {
    fn enter(request_id: &str) -> Self {
        log_mdc::insert("request_id", request_id);
        MdcScope
    }

    fn attempt(&self, attempt: u32) {
        log_mdc::insert("attempt", attempt.to_string());
    }
}

impl Drop for MdcScope {
    fn drop(&mut self) {
        log_mdc::remove("request_id");
        log_mdc::remove("attempt");
    }
}

pub struct Orchestrator {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl Orchestrator {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config),
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the backoff sleep, e.g. to record delays instead of waiting
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit a request or chain and return the decoded artifacts of the
    /// first successful attempt.
    pub fn submit(&self, endpoint: &Endpoint, submission: impl Into<Submission>) -> Result<Artifacts> {
        let mut submission = submission.into();
        match &submission {
            Submission::Single(request) if request.engine_id != endpoint.engine_id() => {
                return Err(ClientError::Validation(format!(
                    "request targets engine '{}' but endpoint serves '{}'",
                    request.engine_id,
                    endpoint.engine_id()
                )));
            }
            Submission::Chain(chain) => {
                chain.validate()?;
            }
            Submission::Single(_) => {}
        }

        let scope = MdcScope::enter(&submission.label());
        let mut attempt: u32 = 0;
        loop {
            scope.attempt(attempt);
            debug!("Dispatching {} to {} (attempt {})", submission.label(), endpoint.engine_id(), attempt);

            let decision = match self.dispatch(endpoint, &submission) {
                Ok(results) => match results.obfuscation() {
                    None => {
                        if attempt > 0 {
                            info!("{} succeeded after {} retries", submission.label(), attempt);
                        }
                        return Ok(results);
                    }
                    Some(classifier) => {
                        let classifier = classifier.clone();
                        self.policy.on_rejection(classifier, &mut submission, attempt)
                    }
                },
                Err(error) => self.policy.on_transport_error(error, attempt),
            };

            match decision {
                RetryDecision::Backoff(delay) => (self.sleeper)(delay),
                RetryDecision::Resubmit => {}
                RetryDecision::GiveUp(error) => return Err(error),
            }
            attempt += 1;
        }
    }

    fn dispatch(&self, endpoint: &Endpoint, submission: &Submission) -> std::result::Result<Artifacts, RpcError> {
        let stream = match submission {
            Submission::Single(request) => endpoint.service().generate(request)?,
            Submission::Chain(chain) => endpoint.service().chain_generate(chain)?,
        };
        decode(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Capability;
    use crate::error::ErrorKind;
    use crate::mock_service::MockGenerationService;
    use crate::params::ImageParams;
    use crate::wire::generation::{
        Artifact, ArtifactType, ClassifierAction, ClassifierCategory, ClassifierConcept, ClassifierParameters,
        RpcCode,
    };
    use bytes::Bytes;
    use std::sync::Mutex;

    struct Harness {
        service: Arc<MockGenerationService>,
        endpoint: Endpoint,
        orchestrator: Orchestrator,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    fn harness(max_retries: u32, retry_obfuscation: bool) -> Harness {
        let service = Arc::new(MockGenerationService::new());
        let endpoint = Endpoint::new(Capability::Generate, "engine", service.clone());
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&sleeps);
        let orchestrator = Orchestrator::new(&RetryConfig {
            max_retries,
            retry_delay_secs: 1.0,
            retry_obfuscation,
            retry_schedule_offset: 0.1,
            debug_no_chains: false,
        })
        .with_sleeper(Arc::new(move |delay| recorded.lock().unwrap().push(delay)));
        Harness { service, endpoint, orchestrator, sleeps }
    }

    fn obfuscated() -> Artifact {
        Artifact::classifier(ClassifierParameters {
            exceeds: vec![ClassifierCategory {
                name: "nsfw".into(),
                concepts: vec![ClassifierConcept { concept: "nudity".into(), threshold: Some(0.8) }],
            }],
            realized_action: Some(ClassifierAction::Obfuscate),
        })
    }

    fn image(data: &'static [u8]) -> Artifact {
        Artifact::binary(ArtifactType::Image, "image/png", Bytes::from_static(data))
    }

    fn image_request() -> Request {
        let mut request = Request::new("engine");
        request.image = Some(ImageParams::new().seeds(vec![7, 9]).init_strength(0.5).build());
        request
    }

    #[test]
    fn test_success_first_attempt() {
        let h = harness(5, false);
        h.service.push_answers(vec![image(b"png")]);

        let results = h.orchestrator.submit(&h.endpoint, Request::new("engine")).unwrap();
        assert_eq!(results.images(), vec![Bytes::from_static(b"png")]);
        assert_eq!(h.service.call_count(), 1);
        assert!(h.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transport_failures_exhaust_retries_with_doubling_delay() {
        let h = harness(3, false);
        for _ in 0..4 {
            h.service.push_error(RpcError::new(RpcCode::Unavailable, "down"));
        }

        let err = h.orchestrator.submit(&h.endpoint, Request::new("engine")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(h.service.call_count(), 4);
        assert_eq!(
            *h.sleeps.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_transport_recovers_and_discards_partial_results() {
        let h = harness(3, false);
        h.service.push_partial_then_error(vec![image(b"partial")], RpcError::new(RpcCode::Internal, "reset"));
        h.service.push_answers(vec![image(b"final")]);

        let results = h.orchestrator.submit(&h.endpoint, Request::new("engine")).unwrap();
        assert_eq!(results.images(), vec![Bytes::from_static(b"final")]);
    }

    #[test]
    fn test_out_of_credits_never_retries() {
        let h = harness(5, true);
        h.service.push_error(RpcError::new(RpcCode::ResourceExhausted, "balance is zero"));
        h.service.push_answers(vec![image(b"never")]);

        let err = h.orchestrator.submit(&h.endpoint, Request::new("engine")).unwrap_err();
        assert!(matches!(err, ClientError::OutOfCredits(ref d) if d == "balance is zero"));
        assert_eq!(h.service.call_count(), 1);
    }

    #[test]
    fn test_obfuscation_retry_adjusts_seeds_and_schedule() {
        let h = harness(5, true);
        h.service.push_answers(vec![obfuscated()]);
        h.service.push_answers(vec![obfuscated()]);
        h.service.push_answers(vec![image(b"clean")]);

        let results = h.orchestrator.submit(&h.endpoint, image_request()).unwrap();
        assert_eq!(results.images(), vec![Bytes::from_static(b"clean")]);

        let sent = h.service.requests();
        assert_eq!(sent.len(), 3);
        let seeds: Vec<_> = sent.iter().map(|r| r.image.as_ref().unwrap().seed.clone()).collect();
        assert_eq!(seeds, vec![vec![7, 9], vec![8, 10], vec![9, 11]]);

        let starts: Vec<f32> = sent
            .iter()
            .map(|r| r.image.as_ref().unwrap().parameters[0].schedule.as_ref().unwrap().start.unwrap())
            .collect();
        assert_eq!(starts[0], 0.5);
        assert_eq!(starts[1], 0.5);
        assert!((starts[2] - 0.6).abs() < 1e-6);
        assert!(h.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_obfuscation_without_image_parameters_fails_immediately() {
        let h = harness(5, true);
        h.service.push_answers(vec![obfuscated()]);

        let err = h.orchestrator.submit(&h.endpoint, Request::new("engine")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyRejection);
        assert_eq!(h.service.call_count(), 1);
    }

    #[test]
    fn test_obfuscation_retry_disabled_surfaces_classifier() {
        let h = harness(5, false);
        h.service.push_answers(vec![obfuscated()]);

        match h.orchestrator.submit(&h.endpoint, image_request()).unwrap_err() {
            ClientError::ClassifierRejection(classifier) => assert_eq!(classifier.exceeds[0].name, "nsfw"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_obfuscation_on_final_attempt_is_terminal() {
        let h = harness(1, true);
        h.service.push_answers(vec![obfuscated()]);
        h.service.push_answers(vec![obfuscated()]);

        let err = h.orchestrator.submit(&h.endpoint, image_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyRejection);
        assert_eq!(h.service.call_count(), 2);
    }

    #[test]
    fn test_engine_mismatch_is_rejected_before_dispatch() {
        let h = harness(5, false);
        let err = h.orchestrator.submit(&h.endpoint, Request::new("other-engine")).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(h.service.call_count(), 0);
    }
}
