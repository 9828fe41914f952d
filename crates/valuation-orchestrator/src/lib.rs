use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dcf_engine::{bridge_growth_path, build_surface, DcfEngine};
use reverse_dcf::{ReverseDcfSolver, SolverConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use valuation_core::{
    AssumptionProvider, BaselineProvider, CompletedAnalysis, FinancialBaseline,
    GrowthAssumptionSet, ResultStore, StatusStream, ValuationError,
};

pub mod retry;
pub use retry::{AuditedAssumptionProvider, RetryPolicy};

/// Pipeline stages in execution order. Errors carry the stage the run was
/// attempting to complete when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStage {
    Idle,
    AssumptionsReady,
    GrowthBridged,
    BaseValuationDone,
    SensitivityDone,
    Persisted,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Idle => "idle",
            RunStage::AssumptionsReady => "assumptions-ready",
            RunStage::GrowthBridged => "growth-bridged",
            RunStage::BaseValuationDone => "base-valuation-done",
            RunStage::SensitivityDone => "sensitivity-done",
            RunStage::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// A valuation run failure, tagged with the stage that failed
#[derive(Error, Debug)]
#[error("stage {stage} failed for {symbol}: {source}")]
pub struct PipelineError {
    pub stage: RunStage,
    pub symbol: String,
    #[source]
    pub source: ValuationError,
}

/// Status sink that drops every update; default for library use and tests
pub struct NoopStatusStream;

#[async_trait::async_trait]
impl StatusStream for NoopStatusStream {
    async fn set_status(&self, _trace_id: &str, _symbol: &str, _status: &str) {}
}

/// Internal cache entry with timestamp
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

const CACHE_TTL_SECS: i64 = 300; // 5 minutes

/// Sequences one analysis run: baseline -> implied growth -> AI assumptions
/// -> bridged growth curve -> base DCF -> sensitivity surface -> persisted
/// result. Holds no numerical logic of its own; failure at any stage aborts
/// the run with no partial commit.
pub struct ValuationOrchestrator {
    baseline_provider: Arc<dyn BaselineProvider>,
    assumption_provider: AuditedAssumptionProvider,
    result_store: Arc<dyn ResultStore>,
    status_stream: Arc<dyn StatusStream>,
    engine: DcfEngine,
    solver: ReverseDcfSolver,
    /// Cache baselines per symbol (5-min TTL)
    baseline_cache: DashMap<String, CacheEntry<FinancialBaseline>>,
}

impl ValuationOrchestrator {
    pub fn new(
        baseline_provider: Arc<dyn BaselineProvider>,
        assumption_provider: Arc<dyn AssumptionProvider>,
        result_store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            baseline_provider,
            assumption_provider: AuditedAssumptionProvider::new(
                assumption_provider,
                RetryPolicy::default(),
            ),
            result_store,
            status_stream: Arc::new(NoopStatusStream),
            engine: DcfEngine::new(),
            solver: ReverseDcfSolver::default(),
            baseline_cache: DashMap::new(),
        }
    }

    /// Replace the no-op status stream with a real collaborator
    pub fn with_status_stream(mut self, status_stream: Arc<dyn StatusStream>) -> Self {
        self.status_stream = status_stream;
        self
    }

    pub fn with_solver_config(mut self, config: SolverConfig) -> Self {
        self.solver = ReverseDcfSolver::new(config);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        let inner = self.assumption_provider.into_inner();
        self.assumption_provider = AuditedAssumptionProvider::new(inner, policy);
        self
    }

    /// Run the full pipeline for one ticker/trace pair.
    pub async fn run(
        &self,
        symbol: &str,
        trace_id: &str,
    ) -> Result<CompletedAnalysis, PipelineError> {
        let mut stage = RunStage::Idle;
        tracing::info!(symbol, trace_id, "starting valuation run");

        // --- Stage: AssumptionsReady -------------------------------------
        self.status(trace_id, symbol, "Fetching trailing twelve month financials...")
            .await;
        let baseline = self
            .get_baseline(symbol)
            .await
            .map_err(|source| self.fail(RunStage::AssumptionsReady, symbol, source))?;

        self.status(
            trace_id,
            symbol,
            "Calculating implied growth rates across discount rates...",
        )
        .await;
        let implied_growth = self
            .solver
            .solve(&baseline)
            .map_err(|source| self.fail(RunStage::AssumptionsReady, symbol, source))?;

        self.status(trace_id, symbol, "Generating growth and discount assumptions...")
            .await;
        let audited = self
            .assumption_provider
            .generate(symbol, &baseline, &implied_growth)
            .await
            .map_err(|source| self.fail(RunStage::AssumptionsReady, symbol, source))?;
        let assumptions = audited.assumptions;
        assumptions
            .validate()
            .map_err(|source| self.fail(RunStage::AssumptionsReady, symbol, source))?;
        self.advance(&mut stage, RunStage::AssumptionsReady, symbol, trace_id);

        // --- Stage: GrowthBridged ----------------------------------------
        let five_year: [f64; 5] = assumptions
            .revenue_growth_rates
            .as_slice()
            .try_into()
            .map_err(|_| {
                self.fail(
                    RunStage::GrowthBridged,
                    symbol,
                    ValuationError::InvalidInput(format!(
                        "expected a 5-year growth forecast, got {} years",
                        assumptions.revenue_growth_rates.len()
                    )),
                )
            })?;
        let bridged_path = bridge_growth_path(five_year, assumptions.terminal_growth_rate);
        tracing::info!(symbol, ?bridged_path, "generated 10-year growth profile");
        self.advance(&mut stage, RunStage::GrowthBridged, symbol, trace_id);

        // --- Stage: BaseValuationDone ------------------------------------
        self.status(trace_id, symbol, "Calculating DCF from projected growth...")
            .await;
        let bridged_assumptions = GrowthAssumptionSet {
            revenue_growth_rates: bridged_path.clone(),
            terminal_growth_rate: assumptions.terminal_growth_rate,
            discount_rate: assumptions.discount_rate,
        };
        let base_valuation = self
            .engine
            .valuate(&baseline, &bridged_assumptions)
            .map_err(|source| self.fail(RunStage::BaseValuationDone, symbol, source))?;
        self.advance(&mut stage, RunStage::BaseValuationDone, symbol, trace_id);

        // --- Stage: SensitivityDone --------------------------------------
        self.status(trace_id, symbol, "Building sensitivity surface...")
            .await;
        let surface = build_surface(
            &self.engine,
            &baseline,
            &bridged_path,
            assumptions.discount_rate,
            assumptions.terminal_growth_rate,
        );
        let valuation = base_valuation.with_sensitivity(surface);
        self.advance(&mut stage, RunStage::SensitivityDone, symbol, trace_id);

        // --- Stage: Persisted --------------------------------------------
        self.status(trace_id, symbol, "Saving analysis...").await;
        let completed = CompletedAnalysis {
            symbol: symbol.to_string(),
            trace_id: trace_id.to_string(),
            valuation,
            implied_growth,
            generated_at: Utc::now(),
        };
        self.result_store
            .save(&completed)
            .await
            .map_err(|source| self.fail(RunStage::Persisted, symbol, source))?;
        self.advance(&mut stage, RunStage::Persisted, symbol, trace_id);

        self.status(trace_id, symbol, "Analysis complete.").await;
        tracing::info!(symbol, trace_id, stage = %stage, "valuation run persisted");
        Ok(completed)
    }

    /// Get a financial baseline for a symbol (cached, 5-min TTL)
    async fn get_baseline(&self, symbol: &str) -> Result<FinancialBaseline, ValuationError> {
        let cache_key = symbol.to_uppercase();
        if let Some(entry) = self.baseline_cache.get(&cache_key) {
            let age = (Utc::now() - entry.cached_at).num_seconds();
            if age < CACHE_TTL_SECS {
                return Ok(entry.data.clone());
            }
        }

        let baseline = self.baseline_provider.fetch_baseline(symbol).await?;

        self.baseline_cache.insert(
            cache_key,
            CacheEntry {
                data: baseline.clone(),
                cached_at: Utc::now(),
            },
        );

        Ok(baseline)
    }

    fn advance(&self, stage: &mut RunStage, next: RunStage, symbol: &str, trace_id: &str) {
        tracing::debug!(symbol, trace_id, from = %stage, to = %next, "stage transition");
        *stage = next;
    }

    fn fail(&self, stage: RunStage, symbol: &str, source: ValuationError) -> PipelineError {
        tracing::error!(symbol, stage = %stage, error = %source, "valuation stage failed");
        PipelineError {
            stage,
            symbol: symbol.to_string(),
            source,
        }
    }

    async fn status(&self, trace_id: &str, symbol: &str, status: &str) {
        self.status_stream.set_status(trace_id, symbol, status).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use valuation_core::{AssumptionAudit, AuditedAssumptions, ReverseDcfAnalysis};

    struct StaticBaselineProvider {
        baseline: FinancialBaseline,
        fetch_count: AtomicUsize,
    }

    impl StaticBaselineProvider {
        fn new(baseline: FinancialBaseline) -> Self {
            Self {
                baseline,
                fetch_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl BaselineProvider for StaticBaselineProvider {
        async fn fetch_baseline(&self, _symbol: &str) -> Result<FinancialBaseline, ValuationError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.baseline.clone())
        }
    }

    /// Replays a scripted sequence of audited assumption sets
    struct ScriptedAssumptionProvider {
        script: Mutex<Vec<AuditedAssumptions>>,
        call_count: AtomicUsize,
    }

    impl ScriptedAssumptionProvider {
        fn new(mut script: Vec<AuditedAssumptions>) -> Self {
            script.reverse(); // pop() walks the script front to back
            Self {
                script: Mutex::new(script),
                call_count: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl AssumptionProvider for ScriptedAssumptionProvider {
        async fn generate_assumptions(
            &self,
            _symbol: &str,
            _baseline: &FinancialBaseline,
            _implied_growth: &ReverseDcfAnalysis,
        ) -> Result<AuditedAssumptions, ValuationError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            script
                .pop()
                .ok_or_else(|| ValuationError::ProviderError("script exhausted".to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<CompletedAnalysis>>,
    }

    #[async_trait::async_trait]
    impl ResultStore for MemoryStore {
        async fn save(&self, analysis: &CompletedAnalysis) -> Result<(), ValuationError> {
            self.saved.lock().unwrap().push(analysis.clone());
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl ResultStore for FailingStore {
        async fn save(&self, _analysis: &CompletedAnalysis) -> Result<(), ValuationError> {
            Err(ValuationError::StorageError("db unavailable".to_string()))
        }
    }

    fn baseline() -> FinancialBaseline {
        FinancialBaseline::new(
            "ACME",
            10_000_000_000.0,
            2_000_000_000.0,
            500_000_000.0,
            1_000_000_000.0,
            120.0,
            60_000_000_000.0,
        )
        .unwrap()
    }

    fn legit(assumptions: GrowthAssumptionSet) -> AuditedAssumptions {
        AuditedAssumptions {
            assumptions,
            audit: AssumptionAudit {
                is_legitimate: true,
                correction_needed: None,
            },
        }
    }

    fn rejected(assumptions: GrowthAssumptionSet) -> AuditedAssumptions {
        AuditedAssumptions {
            assumptions,
            audit: AssumptionAudit {
                is_legitimate: false,
                correction_needed: Some("growth above historical average".to_string()),
            },
        }
    }

    fn five_year_assumptions() -> GrowthAssumptionSet {
        GrowthAssumptionSet {
            revenue_growth_rates: vec![0.12, 0.11, 0.10, 0.09, 0.08],
            terminal_growth_rate: 0.025,
            discount_rate: 0.09,
        }
    }

    fn orchestrator(
        provider: Arc<ScriptedAssumptionProvider>,
        store: Arc<dyn ResultStore>,
    ) -> ValuationOrchestrator {
        ValuationOrchestrator::new(
            Arc::new(StaticBaselineProvider::new(baseline())),
            provider,
            store,
        )
    }

    #[tokio::test]
    async fn happy_path_reaches_persisted() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider.clone(), store.clone());

        let completed = orch.run("ACME", "trace-1").await.unwrap();

        assert_eq!(completed.symbol, "ACME");
        assert!(completed.valuation.intrinsic_value_per_share > 0.0);
        assert_eq!(completed.valuation.projections.len(), 10);
        assert_eq!(completed.implied_growth.scenarios.len(), 5);

        let surface = completed.valuation.sensitivity.as_ref().unwrap();
        assert_eq!(surface.values.len(), 5);
        assert_relative_eq!(
            surface.values[2][2],
            completed.valuation.intrinsic_value_per_share,
            epsilon = 1e-9
        );

        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn bridged_path_lands_on_terminal_rate() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider, store);

        let completed = orch.run("ACME", "trace-1").await.unwrap();

        // Year-10 growth implied by the projection path equals the terminal
        // rate: revenue_10 / revenue_9 - 1 == 0.025.
        let projections = &completed.valuation.projections;
        let implied_final_growth =
            projections[9].revenue / projections[8].revenue - 1.0;
        assert_relative_eq!(implied_final_growth, 0.025, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn audit_failure_retries_until_legitimate() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![
            rejected(five_year_assumptions()),
            legit(five_year_assumptions()),
        ]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider.clone(), store);

        let completed = orch.run("ACME", "trace-1").await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(completed.valuation.intrinsic_value_per_share > 0.0);
    }

    #[tokio::test]
    async fn exhausted_audit_degrades_when_policy_allows() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![
            rejected(five_year_assumptions()),
            rejected(five_year_assumptions()),
            rejected(five_year_assumptions()),
        ]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider.clone(), store.clone());

        // Default policy accepts the last attempt anyway.
        let completed = orch.run("ACME", "trace-1").await.unwrap();
        assert_eq!(provider.calls(), 3);
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert!(completed.valuation.intrinsic_value_per_share > 0.0);
    }

    #[tokio::test]
    async fn exhausted_audit_fails_when_policy_is_strict() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![
            rejected(five_year_assumptions()),
            rejected(five_year_assumptions()),
            rejected(five_year_assumptions()),
        ]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider, store).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            accept_last_attempt: false,
        });

        let err = orch.run("ACME", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::AssumptionsReady);
        assert!(matches!(err.source, ValuationError::ProviderError(_)));
    }

    #[tokio::test]
    async fn invalid_provider_output_fails_before_bridging() {
        let bad = GrowthAssumptionSet {
            revenue_growth_rates: vec![0.12, 0.11, 0.10, 0.09, 0.08],
            terminal_growth_rate: 0.10,
            discount_rate: 0.09, // ordering violated
        };
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(bad)]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider, store.clone());

        let err = orch.run("ACME", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::AssumptionsReady);
        assert!(matches!(
            err.source,
            ValuationError::InvalidDiscountRate { .. }
        ));
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_length_forecast_fails_at_bridge() {
        let short = GrowthAssumptionSet {
            revenue_growth_rates: vec![0.12, 0.11, 0.10],
            terminal_growth_rate: 0.025,
            discount_rate: 0.09,
        };
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(short)]));
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(provider, store);

        let err = orch.run("ACME", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::GrowthBridged);
    }

    #[tokio::test]
    async fn negative_margin_aborts_before_assumptions() {
        let burning = FinancialBaseline::new(
            "BURN",
            10_000_000_000.0,
            -500_000_000.0,
            500_000_000.0,
            0.0,
            20.0,
            10_000_000_000.0,
        )
        .unwrap();
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let store = Arc::new(MemoryStore::default());
        let orch = ValuationOrchestrator::new(
            Arc::new(StaticBaselineProvider::new(burning)),
            provider.clone(),
            store,
        );

        let err = orch.run("BURN", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::AssumptionsReady);
        assert!(matches!(err.source, ValuationError::NegativeMargin(_)));
        // The provider was never consulted.
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_market_cap_aborts_the_run() {
        let b = baseline();
        // No CAGR in the bracket justifies this cap at any candidate rate.
        let absurd = FinancialBaseline::new(
            "MOON",
            b.revenue_ttm,
            b.fcf_ttm,
            b.shares_outstanding,
            b.net_debt,
            b.current_price,
            1e18,
        )
        .unwrap();
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let store = Arc::new(MemoryStore::default());
        let orch = ValuationOrchestrator::new(
            Arc::new(StaticBaselineProvider::new(absurd)),
            provider.clone(),
            store.clone(),
        );

        let err = orch.run("MOON", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::AssumptionsReady);
        assert!(matches!(err.source, ValuationError::NoScenarioFound));
        assert_eq!(provider.calls(), 0);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[derive(Default)]
    struct RecordingStatusStream {
        statuses: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StatusStream for RecordingStatusStream {
        async fn set_status(&self, _trace_id: &str, _symbol: &str, status: &str) {
            self.statuses.lock().unwrap().push(status.to_string());
        }
    }

    #[tokio::test]
    async fn status_updates_flow_through_the_stream() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let store = Arc::new(MemoryStore::default());
        let stream = Arc::new(RecordingStatusStream::default());
        let orch = orchestrator(provider, store).with_status_stream(stream.clone());

        orch.run("ACME", "trace-1").await.unwrap();

        let statuses = stream.statuses.lock().unwrap();
        assert_eq!(
            statuses.first().map(String::as_str),
            Some("Fetching trailing twelve month financials...")
        );
        assert_eq!(statuses.last().map(String::as_str), Some("Analysis complete."));
        assert!(statuses.len() >= 6);
    }

    #[tokio::test]
    async fn store_failure_surfaces_persist_stage() {
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![legit(
            five_year_assumptions(),
        )]));
        let orch = orchestrator(provider, Arc::new(FailingStore));

        let err = orch.run("ACME", "trace-1").await.unwrap_err();
        assert_eq!(err.stage, RunStage::Persisted);
        assert!(matches!(err.source, ValuationError::StorageError(_)));
    }

    #[tokio::test]
    async fn baseline_is_cached_across_runs() {
        let baseline_provider = Arc::new(StaticBaselineProvider::new(baseline()));
        let provider = Arc::new(ScriptedAssumptionProvider::new(vec![
            legit(five_year_assumptions()),
            legit(five_year_assumptions()),
        ]));
        let store = Arc::new(MemoryStore::default());
        let orch = ValuationOrchestrator::new(baseline_provider.clone(), provider, store);

        orch.run("ACME", "trace-1").await.unwrap();
        orch.run("acme", "trace-2").await.unwrap();

        // Second run hits the cache (case-insensitive key).
        assert_eq!(baseline_provider.fetch_count.load(Ordering::SeqCst), 1);
    }
}
