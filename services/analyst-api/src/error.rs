use crate::analysis::AnalysisError;
use crate::llm::LlmError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use market_data::MarketDataError;
use serde_json::json;

/// Errors returned by HTTP handlers, rendered as `{"status": "error", "error": ...}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("rate limit exceeded, try again later")]
    RateLimited,

    /// Brokerage or LLM router failure
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self);
        }

        let body = json!({ "status": "error", "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<MarketDataError> for ApiError {
    fn from(e: MarketDataError) -> Self {
        match e {
            MarketDataError::InstrumentNotSupported(_)
            | MarketDataError::UnsupportedGranularity(_)
            | MarketDataError::InvalidCount(_) => Self::BadRequest(e.to_string()),
            MarketDataError::RateLimit { .. }
            | MarketDataError::ApiError(_)
            | MarketDataError::InvalidResponse(_)
            | MarketDataError::InvalidCandle(_) => {
                Self::Upstream(format!("market data unavailable: {}", e))
            }
            MarketDataError::CacheError(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::UnknownProvider(_) => Self::NotFound(e.to_string()),
            _ => Self::Upstream(format!("analysis generation failed: {}", e)),
        }
    }
}
