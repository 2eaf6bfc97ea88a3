/// Domain-specific error types for the pricing engine.
/// Validation failures abort the request immediately; nothing partial is returned.
/// Optimizer non-convergence is NOT an error: it is surfaced as a fit warning.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("invalid contract: {0}")]
    InvalidContract(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unknown {kind} method: {name}")]
    UnknownMethod { kind: &'static str, name: String },

    #[error("cannot run {step}: {reason}")]
    Precedence { step: &'static str, reason: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("model computation error: {0}")]
    Model(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PricingError {
    /// True for errors caused by the caller's input rather than by the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PricingError::InvalidContract(_)
                | PricingError::InsufficientData(_)
                | PricingError::InvalidData(_)
                | PricingError::UnknownMethod { .. }
                | PricingError::InvalidParameters(_)
                | PricingError::Parse(_)
        )
    }
}

impl From<serde_json::Error> for PricingError {
    fn from(e: serde_json::Error) -> Self {
        PricingError::Parse(e.to_string())
    }
}

pub type PricingResult<T> = Result<T, PricingError>;
