use crate::error::{OracleError, Result};
use crate::oracle::ReasoningOracle;
use crate::prompt::StructuredPrompt;
use crate::response::{parse_response, OracleResponse};
use drift_protocol::{ReasoningTrace, TraceResolution};
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry with exponential backoff for transient oracle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Budget for a single oracle call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(16),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed `attempt` (1-based): base, 2×base, 4×base, … capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Drives one oracle through prompts and always comes back with a trace.
///
/// Outages and timeouts are retried per [`RetryPolicy`]; a malformed answer
/// gets exactly one more try with the strict prompt. Whatever cannot be
/// resolved becomes an `insufficient-evidence` trace whose resolution says
/// why. Nothing here fails the run.
#[derive(Clone)]
pub struct ReasoningEngine {
    oracle: Arc<dyn ReasoningOracle>,
    policy: RetryPolicy,
}

impl ReasoningEngine {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, policy: RetryPolicy) -> Self {
        Self { oracle, policy }
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn reason(&self, prompt: StructuredPrompt, sample: usize) -> ReasoningTrace {
        let unit_id = prompt.unit.id.clone();
        let chunk_ids = prompt.chunk_ids();
        if prompt.candidates.is_empty() {
            return with_sample(
                ReasoningTrace::insufficient(
                    unit_id,
                    chunk_ids,
                    TraceResolution::NoCandidates,
                    "No specification chunk is relevant to this unit",
                ),
                sample,
            );
        }

        let first = self.attempt(&prompt).await;
        let outcome = match first {
            Err(OracleError::MalformedResponse(reason)) => {
                log::warn!("{unit_id}: malformed oracle output ({reason}); retrying with strict prompt");
                self.attempt(&prompt.strict()).await
            }
            other => other,
        };

        let trace = match outcome {
            Ok(response) => ReasoningTrace {
                unit_id,
                chunk_ids,
                steps: response.steps,
                verdict: response.verdict,
                raw_confidence: response.raw_confidence,
                severity_hint: response.severity,
                resolution: TraceResolution::Reasoned,
                sample,
            },
            Err(OracleError::MalformedResponse(reason)) => {
                log::warn!("{unit_id}: oracle output still malformed ({reason})");
                ReasoningTrace::insufficient(
                    unit_id,
                    chunk_ids,
                    TraceResolution::OracleMalformed,
                    format!("Oracle output could not be parsed: {reason}"),
                )
            }
            Err(err) => {
                log::warn!("{unit_id}: {err}");
                ReasoningTrace::insufficient(
                    unit_id,
                    chunk_ids,
                    TraceResolution::OracleUnavailable,
                    err.to_string(),
                )
            }
        };
        with_sample(trace, sample)
    }

    async fn attempt(&self, prompt: &StructuredPrompt) -> Result<OracleResponse> {
        let text = self.call_with_retry(prompt).await?;
        parse_response(&text)
    }

    async fn call_with_retry(&self, prompt: &StructuredPrompt) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome =
                match tokio::time::timeout(self.policy.call_timeout, self.oracle.reason(prompt))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Timeout(self.policy.call_timeout)),
                };
            match outcome {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.policy.backoff(attempt);
                    log::warn!(
                        "{}: oracle attempt {attempt}/{attempts} failed ({err}); retrying in {delay:?}",
                        prompt.unit.id
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn with_sample(mut trace: ReasoningTrace, sample: usize) -> ReasoningTrace {
    trace.sample = sample;
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);
    }

    #[test]
    fn zero_base_never_sleeps() {
        let policy = RetryPolicy {
            backoff_base: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }
}
