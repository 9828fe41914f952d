use async_trait::async_trait;
use crate::{
    AuditedAssumptions, CompletedAnalysis, FinancialBaseline, ReverseDcfAnalysis, ValuationError,
};

/// Supplies TTM financial baselines for a ticker
#[async_trait]
pub trait BaselineProvider: Send + Sync {
    async fn fetch_baseline(&self, symbol: &str) -> Result<FinancialBaseline, ValuationError>;
}

/// External AI collaborator producing growth and discount assumptions.
///
/// Sees the baseline plus the market's implied-growth scenarios, and returns
/// a 5-year explicit forecast with its own audit verdict attached. Output is
/// untrusted; callers validate before use.
#[async_trait]
pub trait AssumptionProvider: Send + Sync {
    async fn generate_assumptions(
        &self,
        symbol: &str,
        baseline: &FinancialBaseline,
        implied_growth: &ReverseDcfAnalysis,
    ) -> Result<AuditedAssumptions, ValuationError>;
}

/// Persistence collaborator for completed analyses
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, analysis: &CompletedAnalysis) -> Result<(), ValuationError>;
}

/// Human-facing status feed for a running analysis
#[async_trait]
pub trait StatusStream: Send + Sync {
    async fn set_status(&self, trace_id: &str, symbol: &str, status: &str);
}
