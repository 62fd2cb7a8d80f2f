use axum::http::StatusCode;
use serde::Serialize;

/// Every way a single invocation can fail.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("uri is required")]
    MissingUri,

    #[error("failed to get proxy list: {0}")]
    ProxyList(String),

    #[error("no proxies available")]
    NoProxyAvailable,

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("no {ext}/{protocol} format available")]
    NoSuitableFormat { ext: String, protocol: String },
}

impl ResolveError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUri => StatusCode::BAD_REQUEST,
            Self::ProxyList(_) => StatusCode::BAD_GATEWAY,
            Self::NoProxyAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Extraction(_) => StatusCode::BAD_GATEWAY,
            Self::NoSuitableFormat { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingUri => "INVALID_INPUT",
            Self::ProxyList(_) => "PROXY_LIST_FAILURE",
            Self::NoProxyAvailable => "NO_PROXY_AVAILABLE",
            Self::Extraction(_) => "EXTRACTION_FAILURE",
            Self::NoSuitableFormat { .. } => "NO_SUITABLE_FORMAT",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            message: self.to_string(),
            code: self.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
}
