//! Majority-quorum freshness reads.
//!
//! The [`QuorumClient`] fans one [`FreshnessRequest`] out to every
//! validator concurrently, bounds each leg with a timeout, and decides:
//!
//! - **fresh** — a majority (`⌊m/2⌋ + 1`) answered `valid`. The fan-out
//!   short-circuits the moment this becomes true; stragglers are dropped,
//!   not awaited.
//! - **stale** — enough validators answered to form a quorum, but `valid`
//!   never reached it. Disagreement (a borderline fragment under clock
//!   skew, say) lands here: without a quorum of `valid`, the fragment is
//!   treated as invalid. Security over availability.
//! - [`ValidationError::QuorumFailed`] — so many validators were
//!   unreachable that no quorum of *responses* exists at all. This is the
//!   only retryable outcome; [`QuorumClient::check_with_retry`] retries it
//!   with bounded backoff and nothing else.
//!
//! With `m > 2f`, `f` crashed validators still leave a deciding majority.
//! This is a crash-fault read, deliberately not Byzantine agreement — a
//! lying validator is out of the threat model here, and the `Validator`
//! trait is the seam where a stronger protocol would slot in.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::config::{
    quorum_size, DEFAULT_QUORUM_RETRIES, DEFAULT_QUORUM_RETRY_BACKOFF, DEFAULT_QUORUM_TIMEOUT,
};
use crate::validation::node::{FreshnessRequest, ValidationError, Validator};

/// Fan-out timing and retry parameters.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Per-validator answer deadline.
    pub timeout: Duration,

    /// Total attempts for `check_with_retry` (first try included).
    pub attempts: u32,

    /// Pause between retry attempts.
    pub retry_backoff: Duration,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUORUM_TIMEOUT,
            attempts: DEFAULT_QUORUM_RETRIES,
            retry_backoff: DEFAULT_QUORUM_RETRY_BACKOFF,
        }
    }
}

/// Outcome of one quorum read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumDecision {
    /// Did a majority vouch for the fragment?
    pub fresh: bool,
    /// `valid` verdicts received.
    pub valid: usize,
    /// `invalid` verdicts received.
    pub invalid: usize,
    /// Validators that errored or timed out.
    pub unreachable: usize,
    /// Most conservative (smallest) remaining lifetime among the `valid`
    /// verdicts. Zero when not fresh.
    pub remaining_ms: u64,
}

/// The reconstruction gate's window onto the validation network.
pub struct QuorumClient {
    validators: Vec<Arc<dyn Validator>>,
    config: QuorumConfig,
}

impl QuorumClient {
    pub fn new(validators: Vec<Arc<dyn Validator>>, config: QuorumConfig) -> Self {
        Self { validators, config }
    }

    /// Validators in the network (`m`).
    pub fn network_size(&self) -> usize {
        self.validators.len()
    }

    /// Majority quorum for this network.
    pub fn quorum(&self) -> usize {
        quorum_size(self.validators.len())
    }

    /// One fan-out, one decision.
    pub async fn check(&self, request: &FreshnessRequest) -> Result<QuorumDecision, ValidationError> {
        let m = self.validators.len();
        if m == 0 {
            return Err(ValidationError::NoValidators);
        }
        let quorum = quorum_size(m);

        let mut in_flight: FuturesUnordered<_> = self
            .validators
            .iter()
            .map(|validator| {
                let v = Arc::clone(validator);
                let req = *request;
                let deadline = self.config.timeout;
                async move {
                    match tokio::time::timeout(deadline, v.check_freshness(&req)).await {
                        Ok(result) => (v.name().to_owned(), result),
                        Err(_) => (v.name().to_owned(), Err(ValidationError::Timeout)),
                    }
                }
            })
            .collect();

        let mut decision = QuorumDecision {
            fresh: false,
            valid: 0,
            invalid: 0,
            unreachable: 0,
            remaining_ms: u64::MAX,
        };

        while let Some((name, result)) = in_flight.next().await {
            match result {
                Ok(verdict) if verdict.valid => {
                    decision.valid += 1;
                    decision.remaining_ms = decision.remaining_ms.min(verdict.remaining_ms);
                }
                Ok(_) => decision.invalid += 1,
                Err(e) => {
                    debug!(validator = %name, error = %e, "validator unreachable during fan-out");
                    decision.unreachable += 1;
                }
            }

            // Early exit: quorum of `valid` reached, stragglers irrelevant.
            if decision.valid >= quorum {
                decision.fresh = true;
                decision.remaining_ms = if decision.remaining_ms == u64::MAX {
                    0
                } else {
                    decision.remaining_ms
                };
                debug!(
                    fragment = %request.fragment_id,
                    valid = decision.valid,
                    quorum,
                    "freshness quorum reached"
                );
                return Ok(decision);
            }
        }

        // Every leg resolved without a quorum of `valid`.
        decision.remaining_ms = 0;
        let responded = decision.valid + decision.invalid;

        if responded >= quorum {
            // A quorum of answers exists; it just doesn't vouch for the
            // fragment. Conservative verdict: stale.
            debug!(
                fragment = %request.fragment_id,
                valid = decision.valid,
                invalid = decision.invalid,
                quorum,
                "no freshness quorum -- fragment treated as invalid"
            );
            Ok(decision)
        } else {
            Err(ValidationError::QuorumFailed {
                responses: responded,
                required: quorum,
            })
        }
    }

    /// [`check`](Self::check), retrying *only* network-level quorum
    /// failures, up to the bounded attempt budget.
    pub async fn check_with_retry(
        &self,
        request: &FreshnessRequest,
    ) -> Result<QuorumDecision, ValidationError> {
        let attempts = self.config.attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            match self.check(request).await {
                Err(ValidationError::QuorumFailed {
                    responses,
                    required,
                }) => {
                    warn!(
                        fragment = %request.fragment_id,
                        attempt,
                        responses,
                        required,
                        "quorum failed, will retry within budget"
                    );
                    last = Some(ValidationError::QuorumFailed {
                        responses,
                        required,
                    });
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
                other => return other,
            }
        }

        Err(last.expect("at least one attempt ran"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{binding_hash, FragmentId, FragmentMetadata};
    use crate::time::{Clock, ManualClock};
    use crate::validation::node::{FreshnessVerdict, LocalValidator};
    use async_trait::async_trait;

    /// A validator that never answers usefully.
    struct DownValidator(String);

    #[async_trait]
    impl Validator for DownValidator {
        fn name(&self) -> &str {
            &self.0
        }

        async fn check_freshness(
            &self,
            _request: &FreshnessRequest,
        ) -> Result<FreshnessVerdict, ValidationError> {
            Err(ValidationError::Unreachable(self.0.clone()))
        }
    }

    /// A validator that hangs until the fan-out timeout reaps it.
    struct SlowValidator;

    #[async_trait]
    impl Validator for SlowValidator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn check_freshness(
            &self,
            _request: &FreshnessRequest,
        ) -> Result<FreshnessVerdict, ValidationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the fan-out timeout fires first")
        }
    }

    fn fresh_metadata(expires_at_ms: u64) -> FragmentMetadata {
        let fragment_id = FragmentId::generate();
        FragmentMetadata {
            fragment_id,
            expires_at_ms,
            validation_hash: binding_hash(&fragment_id, expires_at_ms),
        }
    }

    fn network(
        live: usize,
        down: usize,
        now_ms: u64,
        meta: &FragmentMetadata,
    ) -> Vec<Arc<dyn Validator>> {
        let mut validators: Vec<Arc<dyn Validator>> = Vec::new();
        for i in 0..live {
            let clock = Arc::new(ManualClock::at(now_ms)) as Arc<dyn Clock>;
            let v = LocalValidator::new(format!("v{i}"), clock);
            v.register(*meta);
            validators.push(Arc::new(v));
        }
        for i in 0..down {
            validators.push(Arc::new(DownValidator(format!("down{i}"))));
        }
        validators
    }

    fn fast_config() -> QuorumConfig {
        QuorumConfig {
            timeout: Duration::from_millis(200),
            attempts: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn unanimous_network_vouches() {
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(network(5, 0, 10_000, &meta), fast_config());

        let decision = client
            .check(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await
            .unwrap();

        assert!(decision.fresh);
        assert!(decision.valid >= 3);
        assert_eq!(decision.remaining_ms, 50_000);
    }

    #[tokio::test]
    async fn majority_survives_minority_crash() {
        // 5 validators, 2 down: 3 valid answers meet the quorum of 3.
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(network(3, 2, 10_000, &meta), fast_config());

        let decision = client
            .check(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await
            .unwrap();

        assert!(decision.fresh);
        assert_eq!(decision.valid, 3);
    }

    #[tokio::test]
    async fn too_many_crashes_is_quorum_failure() {
        // 5 validators, 3 down: at most 2 responses < quorum of 3.
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(network(2, 3, 10_000, &meta), fast_config());

        let result = client
            .check(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await;

        assert!(matches!(
            result,
            Err(ValidationError::QuorumFailed {
                responses: 2,
                required: 3
            })
        ));
    }

    #[tokio::test]
    async fn expired_everywhere_is_stale_not_error() {
        let meta = fresh_metadata(60_000);
        // Validators' clocks are past expiry.
        let client = QuorumClient::new(network(5, 0, 70_000, &meta), fast_config());

        let decision = client
            .check(&FreshnessRequest::for_metadata(&meta, 70_000))
            .await
            .unwrap();

        assert!(!decision.fresh);
        assert_eq!(decision.invalid, 5);
        assert_eq!(decision.remaining_ms, 0);
    }

    #[tokio::test]
    async fn split_verdicts_without_quorum_are_conservative() {
        // Borderline fragment: 2 validators still see it fresh, 3 see it
        // expired (skewed clocks). No quorum of valid → treated invalid.
        let meta = fresh_metadata(60_000);
        let mut validators = network(2, 0, 59_000, &meta);
        validators.extend(network(3, 0, 61_000, &meta));
        let client = QuorumClient::new(validators, fast_config());

        let decision = client
            .check(&FreshnessRequest::for_metadata(&meta, 60_000))
            .await
            .unwrap();

        assert!(!decision.fresh);
        assert_eq!(decision.valid, 2);
        assert_eq!(decision.invalid, 3);
    }

    #[tokio::test]
    async fn slow_validators_do_not_block_the_decision() {
        let meta = fresh_metadata(60_000);
        let mut validators = network(3, 0, 10_000, &meta);
        validators.push(Arc::new(SlowValidator));
        validators.push(Arc::new(SlowValidator));
        let client = QuorumClient::new(validators, fast_config());

        let started = std::time::Instant::now();
        let decision = client
            .check(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await
            .unwrap();

        // Quorum of 3 live answers short-circuits; we never wait out the
        // slow validators' hour-long nap, nor even their 200ms timeout
        // budget... but allow generous slack for CI schedulers.
        assert!(decision.fresh);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        // All validators down: every attempt fails, and the bounded retry
        // budget is exhausted — the retry loop terminates rather than
        // spinning forever.
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(network(0, 3, 10_000, &meta), fast_config());

        let result = client
            .check_with_retry(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await;

        assert!(matches!(result, Err(ValidationError::QuorumFailed { .. })));
    }

    #[tokio::test]
    async fn empty_network_is_an_error() {
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(Vec::new(), fast_config());

        let result = client
            .check(&FreshnessRequest::for_metadata(&meta, 10_000))
            .await;
        assert!(matches!(result, Err(ValidationError::NoValidators)));
    }

    #[tokio::test]
    async fn stale_is_not_retried() {
        // A definitive negative verdict must come back on the first
        // attempt — retrying a security decision is itself a bug.
        let meta = fresh_metadata(60_000);
        let client = QuorumClient::new(network(3, 0, 70_000, &meta), fast_config());

        let started = std::time::Instant::now();
        let decision = client
            .check_with_retry(&FreshnessRequest::for_metadata(&meta, 70_000))
            .await
            .unwrap();

        assert!(!decision.fresh);
        // No backoff sleeps happened.
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
