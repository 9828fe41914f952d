use chrono::Utc;
use serde::{Deserialize, Serialize};
use valuation_core::{FinancialBaseline, ReverseDcfAnalysis, ReverseDcfScenario, ValuationError};

/// Configuration for the implied-growth search.
///
/// Defaults: five candidate discount rates from 6% to 10%, a five-year
/// explicit horizon, 2.5% perpetual growth, and a CAGR bracket generous
/// enough to cover both severe decline and explosive growth. All of these
/// are policy choices, not model invariants, so they live here rather than
/// as hard-coded constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Candidate discount rates; output scenarios preserve this ordering.
    pub candidate_discount_rates: Vec<f64>,
    pub projection_years: u32,
    pub terminal_growth_rate: f64,
    /// Lower edge of the CAGR search bracket.
    pub bracket_low: f64,
    /// Upper edge of the CAGR search bracket.
    pub bracket_high: f64,
    /// Relative convergence tolerance (1e-4 = 0.01%).
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            candidate_discount_rates: vec![0.06, 0.07, 0.08, 0.09, 0.10],
            projection_years: 5,
            terminal_growth_rate: 0.025,
            bracket_low: -0.50,
            bracket_high: 1.00,
            tolerance: 1e-4,
            max_iterations: 100,
        }
    }
}

/// Infers the constant revenue CAGR the market price implies at each
/// candidate discount rate by inverting the perpetuity DCF model with
/// bisection.
pub struct ReverseDcfSolver {
    config: SolverConfig,
}

impl ReverseDcfSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve for implied growth across every candidate discount rate.
    ///
    /// A candidate at or below the terminal growth rate is rejected and
    /// dropped; a candidate whose bracket cannot reach the market cap is
    /// omitted. Only a fully empty scenario set fails the batch.
    pub fn solve(&self, baseline: &FinancialBaseline) -> Result<ReverseDcfAnalysis, ValuationError> {
        let fcf_margin = baseline.fcf_margin();
        if fcf_margin <= 0.0 {
            return Err(ValuationError::NegativeMargin(fcf_margin));
        }

        let mut scenarios = Vec::with_capacity(self.config.candidate_discount_rates.len());
        for &discount_rate in &self.config.candidate_discount_rates {
            if discount_rate <= self.config.terminal_growth_rate {
                let err = ValuationError::InvalidDiscountRate {
                    discount_rate,
                    terminal_growth_rate: self.config.terminal_growth_rate,
                };
                tracing::warn!(symbol = %baseline.symbol, %err, "candidate discount rate rejected");
                continue;
            }

            match self.implied_cagr(baseline.revenue_ttm, fcf_margin, baseline.market_cap, discount_rate)
            {
                Some(implied_revenue_cagr) => scenarios.push(ReverseDcfScenario {
                    discount_rate,
                    implied_revenue_cagr,
                }),
                None => {
                    tracing::debug!(
                        symbol = %baseline.symbol,
                        discount_rate,
                        "market cap outside valuation bracket, scenario omitted"
                    );
                }
            }
        }

        if scenarios.is_empty() {
            return Err(ValuationError::NoScenarioFound);
        }

        Ok(ReverseDcfAnalysis {
            symbol: baseline.symbol.clone(),
            current_price: baseline.current_price,
            market_cap: baseline.market_cap,
            shares_outstanding: baseline.shares_outstanding,
            ttm_revenue: baseline.revenue_ttm,
            ttm_free_cash_flow: baseline.fcf_ttm,
            net_debt: baseline.net_debt,
            fcf_margin,
            scenarios,
            generated_at: Utc::now(),
        })
    }

    /// Enterprise value of a constant-CAGR projection under the configured
    /// horizon, margin, and terminal assumptions.
    ///
    /// Strictly increasing in `cagr` for a positive margin, which is the
    /// invariant that makes the bisection below valid. Any change to this
    /// model must preserve that monotonicity.
    pub fn enterprise_value(
        &self,
        ttm_revenue: f64,
        fcf_margin: f64,
        cagr: f64,
        discount_rate: f64,
    ) -> f64 {
        let mut present_value = 0.0;
        let mut revenue = ttm_revenue;

        for year in 1..=self.config.projection_years {
            revenue *= 1.0 + cagr;
            let fcf = revenue * fcf_margin;
            present_value += fcf / (1.0 + discount_rate).powi(year as i32);
        }

        // Perpetuity terminal value from final-year revenue grown one more
        // step at the terminal rate.
        let terminal_revenue = revenue * (1.0 + self.config.terminal_growth_rate);
        let terminal_fcf = terminal_revenue * fcf_margin;
        let terminal_value = terminal_fcf / (discount_rate - self.config.terminal_growth_rate);
        let discounted_terminal =
            terminal_value / (1.0 + discount_rate).powi(self.config.projection_years as i32);

        present_value + discounted_terminal
    }

    /// Bisection over the CAGR bracket.
    ///
    /// Returns None when the target market cap falls outside
    /// [V(low), V(high)] — no root exists in the bracket. When the iteration
    /// cap is reached before the tolerance, the best midpoint is returned;
    /// precision degrades but the run does not fail.
    fn implied_cagr(
        &self,
        ttm_revenue: f64,
        fcf_margin: f64,
        target_market_cap: f64,
        discount_rate: f64,
    ) -> Option<f64> {
        let mut low = self.config.bracket_low;
        let mut high = self.config.bracket_high;

        let low_value = self.enterprise_value(ttm_revenue, fcf_margin, low, discount_rate);
        let high_value = self.enterprise_value(ttm_revenue, fcf_margin, high, discount_rate);
        if target_market_cap < low_value || target_market_cap > high_value {
            return None;
        }

        for _ in 0..self.config.max_iterations {
            let mid = (low + high) / 2.0;
            let mid_value = self.enterprise_value(ttm_revenue, fcf_margin, mid, discount_rate);

            let relative_error = ((mid_value - target_market_cap) / target_market_cap).abs();
            if relative_error < self.config.tolerance {
                return Some(mid);
            }

            if mid_value < target_market_cap {
                low = mid;
            } else {
                high = mid;
            }
        }

        Some((low + high) / 2.0)
    }
}

impl Default for ReverseDcfSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}
