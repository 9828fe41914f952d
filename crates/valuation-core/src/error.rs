use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Discount rate {discount_rate:.4} must exceed terminal growth rate {terminal_growth_rate:.4}")]
    InvalidDiscountRate {
        discount_rate: f64,
        terminal_growth_rate: f64,
    },

    #[error("FCF margin {0:.4} is not positive; implied growth is undefined for a cash-burning company")]
    NegativeMargin(f64),

    #[error("No candidate discount rate bracketed the target market cap")]
    NoScenarioFound,

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}
