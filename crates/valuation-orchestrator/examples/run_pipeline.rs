//! Run the full valuation pipeline against canned collaborators.
//!
//! ```bash
//! cargo run --example run_pipeline -p valuation-orchestrator
//! ```

use std::sync::Arc;
use valuation_core::{
    AssumptionAudit, AssumptionProvider, AuditedAssumptions, BaselineProvider, CompletedAnalysis,
    FinancialBaseline, GrowthAssumptionSet, ResultStore, ReverseDcfAnalysis, ValuationError,
};
use valuation_orchestrator::ValuationOrchestrator;

struct CannedBaseline;

#[async_trait::async_trait]
impl BaselineProvider for CannedBaseline {
    async fn fetch_baseline(&self, symbol: &str) -> Result<FinancialBaseline, ValuationError> {
        FinancialBaseline::new(
            symbol,
            390_000_000_000.0,
            100_000_000_000.0,
            15_200_000_000.0,
            -50_000_000_000.0,
            230.0,
            3_496_000_000_000.0,
        )
    }
}

struct CannedAssumptions;

#[async_trait::async_trait]
impl AssumptionProvider for CannedAssumptions {
    async fn generate_assumptions(
        &self,
        _symbol: &str,
        _baseline: &FinancialBaseline,
        _implied_growth: &ReverseDcfAnalysis,
    ) -> Result<AuditedAssumptions, ValuationError> {
        Ok(AuditedAssumptions {
            assumptions: GrowthAssumptionSet {
                revenue_growth_rates: vec![0.05, 0.05, 0.04, 0.04, 0.03],
                terminal_growth_rate: 0.025,
                discount_rate: 0.08,
            },
            audit: AssumptionAudit {
                is_legitimate: true,
                correction_needed: None,
            },
        })
    }
}

struct StdoutStore;

#[async_trait::async_trait]
impl ResultStore for StdoutStore {
    async fn save(&self, analysis: &CompletedAnalysis) -> Result<(), ValuationError> {
        println!(
            "{} intrinsic value: ${:.2} (discount {:.1}%, margin {:.1}%)",
            analysis.symbol,
            analysis.valuation.rounded_per_share(),
            analysis.valuation.discount_rate * 100.0,
            analysis.valuation.implied_fcf_margin * 100.0,
        );
        for scenario in &analysis.implied_growth.scenarios {
            println!(
                "  {:.0}% return requires {:.1}% revenue CAGR",
                scenario.discount_rate * 100.0,
                scenario.implied_revenue_cagr * 100.0,
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let orchestrator = ValuationOrchestrator::new(
        Arc::new(CannedBaseline),
        Arc::new(CannedAssumptions),
        Arc::new(StdoutStore),
    );

    orchestrator.run("AAPL", "local-demo").await?;
    Ok(())
}
