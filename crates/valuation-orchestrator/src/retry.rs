use serde::{Deserialize, Serialize};
use std::sync::Arc;
use valuation_core::{
    AssumptionProvider, AuditedAssumptions, FinancialBaseline, ReverseDcfAnalysis, ValuationError,
};

/// Bounded retry policy for the assumption provider's self-audit loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Accept the final attempt even when its audit still fails.
    pub accept_last_attempt: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            accept_last_attempt: true,
        }
    }
}

/// Wraps an assumption provider and re-asks until the provider's own audit
/// marks the output legitimate, up to the policy's attempt cap.
///
/// Provider transport errors propagate immediately; only a failed audit
/// triggers another attempt. With `accept_last_attempt` set, the final
/// attempt is accepted as a degraded result instead of failing the run.
pub struct AuditedAssumptionProvider {
    inner: Arc<dyn AssumptionProvider>,
    policy: RetryPolicy,
}

impl AuditedAssumptionProvider {
    pub fn new(inner: Arc<dyn AssumptionProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Hand back the wrapped provider, discarding the policy
    pub fn into_inner(self) -> Arc<dyn AssumptionProvider> {
        self.inner
    }

    pub async fn generate(
        &self,
        symbol: &str,
        baseline: &FinancialBaseline,
        implied_growth: &ReverseDcfAnalysis,
    ) -> Result<AuditedAssumptions, ValuationError> {
        let mut last_attempt: Option<AuditedAssumptions> = None;

        for attempt in 1..=self.policy.max_attempts {
            tracing::debug!(symbol, attempt, "requesting growth assumptions");
            let audited = self
                .inner
                .generate_assumptions(symbol, baseline, implied_growth)
                .await?;

            if audited.audit.is_legitimate {
                return Ok(audited);
            }

            tracing::warn!(
                symbol,
                attempt,
                correction = audited
                    .audit
                    .correction_needed
                    .as_deref()
                    .unwrap_or("unspecified"),
                "assumption audit failed"
            );
            last_attempt = Some(audited);
        }

        if self.policy.accept_last_attempt {
            if let Some(audited) = last_attempt {
                tracing::warn!(symbol, "accepting assumptions despite failed audit");
                return Ok(audited);
            }
        }

        Err(ValuationError::ProviderError(format!(
            "assumption audit failed after {} attempts for {symbol}",
            self.policy.max_attempts
        )))
    }
}
