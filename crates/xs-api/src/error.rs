//! Error handling for the REST boundary

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use xs_core::{Attempt, CatalogError, OrchestrateError, SupervisorError};

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body
    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    /// Unknown subscription or server
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Requested resource is held by someone else
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Auto-connect found nothing usable
    #[error("{message}")]
    Exhausted {
        message: String,
        attempts: Vec<Attempt>,
    },

    /// Service unavailable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Internal server error
    #[error("Internal error: {source}")]
    Internal {
        #[from]
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Exhausted { .. } | ApiError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::SubscriptionNotFound(_) | CatalogError::ServerNotFound { .. } => {
                ApiError::not_found(err.to_string())
            }
            CatalogError::Unavailable(_) => ApiError::service_unavailable(err.to_string()),
        }
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::PortUnavailable { .. } => ApiError::Conflict {
                message: err.to_string(),
            },
            SupervisorError::EngineLaunchFailed(_) | SupervisorError::EngineCrashed(_) => {
                ApiError::Internal {
                    source: anyhow::Error::new(err),
                }
            }
        }
    }
}

impl From<OrchestrateError> for ApiError {
    fn from(err: OrchestrateError) -> Self {
        match err {
            OrchestrateError::Catalog(e) => e.into(),
            other => ApiError::Exhausted {
                message: other.to_string(),
                attempts: other.attempts().to_vec(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        tracing::debug!(code = status_code.as_u16(), error = %self, "request failed");

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "code": status_code.as_u16(),
        });
        if let ApiError::Exhausted { attempts, .. } = &self {
            body["attempts"] = json!(attempts);
        }

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let missing: ApiError = CatalogError::SubscriptionNotFound(Uuid::nil()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let busy: ApiError = SupervisorError::PortUnavailable {
            port: 10808,
            reason: "in use".into(),
        }
        .into();
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);

        let launch: ApiError = SupervisorError::EngineLaunchFailed("boom".into()).into();
        assert_eq!(launch.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let none: ApiError = OrchestrateError::NoResponsiveServers { attempts: vec![] }.into();
        assert_eq!(none.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(none.to_string(), "no responsive servers in any subscription");
    }
}
