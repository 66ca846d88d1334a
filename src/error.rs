use thiserror::Error;

/// Request-terminating error classes. The `Display` form is the public
/// `{"error": ...}` body; backend details stay in the logs.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    BadRequest { message: &'static str },
    #[error("Invalid or missing API key")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    BudgetExceeded,
    #[error("AI service not configured")]
    BackendUnconfigured,
    #[error("{message}")]
    BackendFailure { message: &'static str },
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized => 401,
            Self::BudgetExceeded => 429,
            Self::BackendUnconfigured | Self::BackendFailure { .. } => 500,
        }
    }
}
