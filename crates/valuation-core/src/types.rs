use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;

/// Current market quote for a ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub market_cap: f64,
    pub shares_outstanding: f64,
}

impl Quote {
    /// Build a quote, deriving shares outstanding from market cap / price
    /// when the feed omits it.
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        market_cap: f64,
        shares_outstanding: Option<f64>,
    ) -> Result<Self, ValuationError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "quote price must be positive, got {price}"
            )));
        }
        if !market_cap.is_finite() || market_cap <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "market cap must be positive, got {market_cap}"
            )));
        }
        let shares = match shares_outstanding {
            Some(s) if s.is_finite() && s > 0.0 => s,
            Some(s) => {
                return Err(ValuationError::InvalidInput(format!(
                    "shares outstanding must be positive, got {s}"
                )))
            }
            None => (market_cap / price).round(),
        };
        Ok(Self {
            symbol: symbol.into(),
            price,
            market_cap,
            shares_outstanding: shares,
        })
    }
}

/// One quarter of reported figures (flow items only). Ordered newest first
/// when aggregated into a trailing-twelve-month baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterlyReport {
    pub fiscal_period: String,
    pub revenue: f64,
    pub free_cash_flow: f64,
}

/// Immutable TTM snapshot used as the zero-point for all projections.
///
/// Revenue and share count are guarded at construction; violating either is
/// a hard failure, not a recoverable one. FCF may be negative (loss-making
/// company), which the reverse solver rejects separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialBaseline {
    pub symbol: String,
    pub revenue_ttm: f64,
    pub fcf_ttm: f64,
    pub shares_outstanding: f64,
    /// Negative values represent net cash.
    pub net_debt: f64,
    pub current_price: f64,
    pub market_cap: f64,
}

impl FinancialBaseline {
    pub fn new(
        symbol: impl Into<String>,
        revenue_ttm: f64,
        fcf_ttm: f64,
        shares_outstanding: f64,
        net_debt: f64,
        current_price: f64,
        market_cap: f64,
    ) -> Result<Self, ValuationError> {
        let fields = [
            ("revenue_ttm", revenue_ttm),
            ("fcf_ttm", fcf_ttm),
            ("shares_outstanding", shares_outstanding),
            ("net_debt", net_debt),
            ("current_price", current_price),
            ("market_cap", market_cap),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ValuationError::InvalidInput(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if revenue_ttm <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "revenue must be positive, got {revenue_ttm}"
            )));
        }
        if shares_outstanding <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "shares outstanding must be positive, got {shares_outstanding}"
            )));
        }
        if current_price <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "current price must be positive, got {current_price}"
            )));
        }
        if market_cap <= 0.0 {
            return Err(ValuationError::InvalidInput(format!(
                "market cap must be positive, got {market_cap}"
            )));
        }
        Ok(Self {
            symbol: symbol.into(),
            revenue_ttm,
            fcf_ttm,
            shares_outstanding,
            net_debt,
            current_price,
            market_cap,
        })
    }

    /// Aggregate quarterly reports (newest first) into a TTM baseline.
    /// Flow items sum across the four most recent quarters; net debt is the
    /// latest balance-sheet snapshot.
    pub fn from_quarters(
        quote: &Quote,
        quarters: &[QuarterlyReport],
        net_debt: f64,
    ) -> Result<Self, ValuationError> {
        if quarters.len() < 4 {
            return Err(ValuationError::InsufficientData(format!(
                "TTM aggregation needs 4 quarters, got {}",
                quarters.len()
            )));
        }
        let revenue_ttm: f64 = quarters[..4].iter().map(|q| q.revenue).sum();
        let fcf_ttm: f64 = quarters[..4].iter().map(|q| q.free_cash_flow).sum();
        Self::new(
            quote.symbol.clone(),
            revenue_ttm,
            fcf_ttm,
            quote.shares_outstanding,
            net_debt,
            quote.price,
            quote.market_cap,
        )
    }

    pub fn fcf_margin(&self) -> f64 {
        self.fcf_ttm / self.revenue_ttm
    }
}

/// Growth and discount assumptions driving a valuation run.
///
/// Produced by the external assumption provider (5-year explicit path) or by
/// the growth bridge (10-year path); passed by value into the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthAssumptionSet {
    pub revenue_growth_rates: Vec<f64>,
    pub terminal_growth_rate: f64,
    pub discount_rate: f64,
}

impl GrowthAssumptionSet {
    /// Numeric sanity checks applied before any assumption set reaches the
    /// engines. Provider output is untrusted; NaN and Infinity must never
    /// propagate into the model.
    pub fn validate(&self) -> Result<(), ValuationError> {
        if !self.discount_rate.is_finite() || !self.terminal_growth_rate.is_finite() {
            return Err(ValuationError::InvalidInput(
                "discount and terminal growth rates must be finite".to_string(),
            ));
        }
        if self.revenue_growth_rates.is_empty() {
            return Err(ValuationError::InvalidInput(
                "growth path must contain at least one year".to_string(),
            ));
        }
        if self.revenue_growth_rates.iter().any(|r| !r.is_finite()) {
            return Err(ValuationError::InvalidInput(
                "growth path contains a non-finite rate".to_string(),
            ));
        }
        if self.discount_rate <= self.terminal_growth_rate {
            return Err(ValuationError::InvalidDiscountRate {
                discount_rate: self.discount_rate,
                terminal_growth_rate: self.terminal_growth_rate,
            });
        }
        Ok(())
    }
}

/// Self-audit verdict attached to provider output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssumptionAudit {
    pub is_legitimate: bool,
    #[serde(default)]
    pub correction_needed: Option<String>,
}

/// Assumption set plus the provider's own audit of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditedAssumptions {
    pub assumptions: GrowthAssumptionSet,
    pub audit: AssumptionAudit,
}

/// One projected year of the DCF model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStep {
    /// 1-based year index
    pub year: u32,
    pub revenue: f64,
    pub fcf: f64,
    /// Present value of this year's FCF
    pub pv_fcf: f64,
}

/// Intrinsic values over a grid of perturbed (discount, terminal growth)
/// pairs. Axes are index-aligned with the value matrix: row = discount rate,
/// column = terminal growth rate. The base case sits at the exact center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivitySurface {
    pub discount_rates: Vec<f64>,
    pub terminal_growth_rates: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

/// Output of one forward DCF run. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    pub symbol: String,
    /// Full precision; use [`ValuationResult::rounded_per_share`] for display.
    pub intrinsic_value_per_share: f64,
    pub implied_fcf_margin: f64,
    pub discount_rate: f64,
    pub sum_pv_fcf: f64,
    pub terminal_value: f64,
    pub present_terminal_value: f64,
    pub enterprise_value: f64,
    pub equity_value: f64,
    pub projections: Vec<ProjectionStep>,
    #[serde(default)]
    pub sensitivity: Option<SensitivitySurface>,
    pub generated_at: DateTime<Utc>,
}

impl ValuationResult {
    /// Intrinsic value per share at cent precision, for display.
    pub fn rounded_per_share(&self) -> f64 {
        (self.intrinsic_value_per_share * 100.0).round() / 100.0
    }

    /// Attach a sensitivity surface, consuming the result so the assembled
    /// value stays immutable after construction.
    pub fn with_sensitivity(mut self, surface: SensitivitySurface) -> Self {
        self.sensitivity = Some(surface);
        self
    }
}

/// The CAGR that reproduces the observed market cap at one discount rate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseDcfScenario {
    pub discount_rate: f64,
    pub implied_revenue_cagr: f64,
}

/// Implied-growth scenarios for a fixed candidate discount-rate set, plus
/// the baseline inputs the solve ran against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseDcfAnalysis {
    pub symbol: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub shares_outstanding: f64,
    pub ttm_revenue: f64,
    pub ttm_free_cash_flow: f64,
    pub net_debt: f64,
    pub fcf_margin: f64,
    /// Ordered as the candidate discount rates were supplied.
    pub scenarios: Vec<ReverseDcfScenario>,
    pub generated_at: DateTime<Utc>,
}

/// Everything one analysis run hands to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedAnalysis {
    pub symbol: String,
    pub trace_id: String,
    pub valuation: ValuationResult,
    pub implied_growth: ReverseDcfAnalysis,
    pub generated_at: DateTime<Utc>,
}
