use std::fmt;

/// Gateway-wide error type. Each variant maps to exactly one HTTP status and
/// detail string surfaced to the client, with no re-wrapping along the way.
#[derive(Debug)]
pub enum GatewayError {
    MissingCredential,
    InvalidCredential,
    SchemaInvalid(String),
    BudgetExceeded(String),
    StoreUnavailable(String),
    Internal(String),
}

impl GatewayError {
    /// The detail string surfaced verbatim in the JSON error body.
    pub fn detail(&self) -> String {
        match self {
            GatewayError::MissingCredential => {
                "Missing or invalid Authorization header".to_string()
            }
            GatewayError::InvalidCredential => "Invalid API key".to_string(),
            GatewayError::SchemaInvalid(msg) => msg.clone(),
            GatewayError::BudgetExceeded(reason) => reason.clone(),
            GatewayError::StoreUnavailable(cause) => format!("Rate limit check failed: {cause}"),
            GatewayError::Internal(msg) => msg.clone(),
        }
    }

    pub fn status(&self) -> http::StatusCode {
        match self {
            GatewayError::MissingCredential => http::StatusCode::UNAUTHORIZED,
            GatewayError::InvalidCredential => http::StatusCode::TOO_MANY_REQUESTS,
            GatewayError::SchemaInvalid(_) => http::StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::BudgetExceeded(_) => http::StatusCode::TOO_MANY_REQUESTS,
            GatewayError::StoreUnavailable(_) => http::StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail())
    }
}

impl std::error::Error for GatewayError {}
