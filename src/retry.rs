//! Retry and classifier policy
//!
//! Decides what the orchestrator does after a failed attempt: back off and
//! resubmit, resubmit an adjusted request, or give up with a terminal error.

use log::warn;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ClientError;
use crate::orchestrator::Submission;
use crate::wire::generation::{ClassifierParameters, Request, RpcCode, RpcError};

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug)]
pub enum RetryDecision {
    /// Sleep for the given delay, then resubmit unchanged
    Backoff(Duration),
    /// The submission was adjusted in place; resubmit immediately
    Resubmit,
    /// Terminal failure for the caller
    GiveUp(ClientError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    retry_obfuscation: bool,
    schedule_offset: f32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.retry_delay_secs.max(0.0)),
            retry_obfuscation: config.retry_obfuscation,
            schedule_offset: config.retry_schedule_offset,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the retry that follows the given attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Quota exhaustion is terminal at once; anything else backs off until the
    /// attempt ceiling, after which the transport error is returned as is.
    pub fn on_transport_error(&self, error: RpcError, attempt: u32) -> RetryDecision {
        if error.code == RpcCode::ResourceExhausted {
            return RetryDecision::GiveUp(ClientError::OutOfCredits(error.details));
        }
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp(ClientError::Transport(error));
        }
        warn!(
            "Received {} will retry {} more times",
            error,
            self.max_retries - attempt
        );
        RetryDecision::Backoff(self.backoff(attempt))
    }

    /// Obfuscated output. Resubmits with adjusted seeds when enabled and at
    /// least one request in the submission carries image parameters.
    pub fn on_rejection(
        &self,
        classifier: ClassifierParameters,
        submission: &mut Submission,
        attempt: u32,
    ) -> RetryDecision {
        if attempt >= self.max_retries || !self.retry_obfuscation {
            return RetryDecision::GiveUp(ClientError::ClassifierRejection(classifier));
        }

        for exceed in &classifier.exceeds {
            warn!("Received classifier obfuscation. Exceeded {} threshold", exceed.name);
            for concept in &exceed.concepts {
                if let Some(threshold) = concept.threshold {
                    warn!("  {} ({})", concept.concept, threshold);
                }
            }
        }

        let adjusted = match submission {
            Submission::Single(request) => self.adjust_request(request, attempt),
            Submission::Chain(chain) => {
                let mut any = false;
                for stage in chain.stage.iter_mut() {
                    any |= self.adjust_request(&mut stage.request, attempt);
                }
                any
            }
        };

        if adjusted {
            RetryDecision::Resubmit
        } else {
            RetryDecision::GiveUp(ClientError::ClassifierRejection(classifier))
        }
    }

    /// Bump every seed by one and, after the first retry, push the schedule
    /// start toward 1.0. Returns false when the request has no image
    /// parameters to adjust.
    pub fn adjust_request(&self, request: &mut Request, attempt: u32) -> bool {
        let Some(image) = request.image.as_mut() else {
            return false;
        };
        warn!(
            "  adjusting request, will retry {} more times",
            self.max_retries.saturating_sub(attempt)
        );
        for seed in image.seed.iter_mut() {
            *seed = seed.wrapping_add(1);
        }
        if attempt > 0 {
            let start = image
                .parameters
                .first_mut()
                .and_then(|step| step.schedule.as_mut())
                .and_then(|schedule| schedule.start.as_mut());
            if let Some(start) = start {
                *start = (*start + self.schedule_offset).clamp(0.0, 1.0);
            }
        }
        true
    }
}
