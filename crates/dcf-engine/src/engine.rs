use chrono::Utc;
use valuation_core::{
    FinancialBaseline, GrowthAssumptionSet, ProjectionStep, ValuationError, ValuationResult,
};

/// Closed-form DCF valuation engine
///
/// Projects free cash flow from a revenue growth path under a constant
/// implied FCF margin, discounts each year, and caps the horizon with a
/// Gordon Growth terminal value. Pure function of its inputs; the
/// sensitivity builder relies on that to re-run it across a rate grid.
pub struct DcfEngine;

impl DcfEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run a full valuation for one baseline/assumption pair.
    ///
    /// The single structural assumption of the model is that the TTM FCF
    /// margin holds across every projected year — margins never expand or
    /// contract.
    pub fn valuate(
        &self,
        baseline: &FinancialBaseline,
        assumptions: &GrowthAssumptionSet,
    ) -> Result<ValuationResult, ValuationError> {
        // Struct literals bypass the constructor guard, so re-check here.
        if baseline.revenue_ttm <= 0.0 || baseline.shares_outstanding <= 0.0 {
            return Err(ValuationError::InvalidInput(
                "revenue and shares outstanding must be positive".to_string(),
            ));
        }
        assumptions.validate()?;

        let implied_fcf_margin = baseline.fcf_margin();
        let discount_rate = assumptions.discount_rate;

        let mut current_revenue = baseline.revenue_ttm;
        let mut sum_pv_fcf = 0.0;
        let mut projections = Vec::with_capacity(assumptions.revenue_growth_rates.len());

        for (index, growth_rate) in assumptions.revenue_growth_rates.iter().enumerate() {
            let year = (index + 1) as u32;
            current_revenue *= 1.0 + growth_rate;
            let fcf = current_revenue * implied_fcf_margin;
            let pv_fcf = fcf / (1.0 + discount_rate).powi(year as i32);
            sum_pv_fcf += pv_fcf;
            projections.push(ProjectionStep {
                year,
                revenue: current_revenue,
                fcf,
                pv_fcf,
            });
        }

        // validate() guarantees a non-empty path
        let final_fcf = projections
            .last()
            .map(|step| step.fcf)
            .ok_or_else(|| {
                ValuationError::InvalidInput("growth path must contain at least one year".to_string())
            })?;
        let years = projections.len() as i32;

        // Gordon Growth: TV = FCF_n * (1 + g) / (r - g), discounted back
        // from the final projected year. validate() rejects r <= g.
        let terminal_value = final_fcf * (1.0 + assumptions.terminal_growth_rate)
            / (discount_rate - assumptions.terminal_growth_rate);
        let present_terminal_value = terminal_value / (1.0 + discount_rate).powi(years);

        let enterprise_value = sum_pv_fcf + present_terminal_value;
        let equity_value = enterprise_value - baseline.net_debt;
        let intrinsic_value_per_share = equity_value / baseline.shares_outstanding;

        Ok(ValuationResult {
            symbol: baseline.symbol.clone(),
            intrinsic_value_per_share,
            implied_fcf_margin,
            discount_rate,
            sum_pv_fcf,
            terminal_value,
            present_terminal_value,
            enterprise_value,
            equity_value,
            projections,
            sensitivity: None,
            generated_at: Utc::now(),
        })
    }
}

impl Default for DcfEngine {
    fn default() -> Self {
        Self::new()
    }
}
