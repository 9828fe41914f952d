use valuation_core::{FinancialBaseline, GrowthAssumptionSet, SensitivitySurface};

use crate::engine::DcfEngine;

/// Offsets applied to the base discount rate: +/- 1% in 0.5% steps.
const DISCOUNT_OFFSETS: [f64; 5] = [-0.01, -0.005, 0.0, 0.005, 0.01];

/// Offsets applied to the base terminal growth rate: +/- 0.5% in 0.25% steps.
const TERMINAL_OFFSETS: [f64; 5] = [-0.005, -0.0025, 0.0, 0.0025, 0.005];

/// Re-run the engine over a 5x5 grid of perturbed rate pairs with the growth
/// path held fixed. Both axes are symmetric around the base case, so the
/// base valuation is always reachable as the exact center cell.
///
/// Cells where the engine rejects the rate pair (discount rate pushed at or
/// below terminal growth at the extremes) record 0.0; a partial surface is
/// expected there, not an abort.
pub fn build_surface(
    engine: &DcfEngine,
    baseline: &FinancialBaseline,
    bridged_growth_path: &[f64],
    base_discount_rate: f64,
    base_terminal_growth_rate: f64,
) -> SensitivitySurface {
    let discount_rates: Vec<f64> = DISCOUNT_OFFSETS
        .iter()
        .map(|offset| base_discount_rate + offset)
        .collect();
    let terminal_growth_rates: Vec<f64> = TERMINAL_OFFSETS
        .iter()
        .map(|offset| base_terminal_growth_rate + offset)
        .collect();

    let values: Vec<Vec<f64>> = discount_rates
        .iter()
        .map(|&discount_rate| {
            terminal_growth_rates
                .iter()
                .map(|&terminal_growth_rate| {
                    let assumptions = GrowthAssumptionSet {
                        revenue_growth_rates: bridged_growth_path.to_vec(),
                        terminal_growth_rate,
                        discount_rate,
                    };
                    engine
                        .valuate(baseline, &assumptions)
                        .map(|result| result.intrinsic_value_per_share)
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    SensitivitySurface {
        discount_rates,
        terminal_growth_rates,
        values,
    }
}
