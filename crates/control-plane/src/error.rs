use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use utoipa::ToSchema;

/// Failure taxonomy for the deployment engine. Every broker, gateway and
/// pipeline failure is one of these kinds; the HTTP layer maps kinds onto
/// status codes and polling clients receive the classed message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("assume role {role_arn} rejected: {message}")]
    Credential { role_arn: String, message: String },
    #[error("{0}")]
    GenerationAccess(String),
    #[error("{0}")]
    Build(String),
    #[error("{0}")]
    Infrastructure(String),
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Credential { .. } => "credential_error",
            Self::GenerationAccess(_) => "generation_access_error",
            Self::Build(_) => "build_error",
            Self::Infrastructure(_) => "infrastructure_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Message prefixed with the error class, the form stored on failed jobs
    /// and deployment results.
    pub fn classed_message(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self { Self::Internal(format!("io error: {e}")) }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self { Self::Internal(format!("serialization error: {e}")) }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody { pub code: &'static str, pub message: String }

#[derive(Debug, Clone)]
pub struct ApiError { pub status: StatusCode, pub code: &'static str, pub message: String }

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::new(StatusCode::NOT_FOUND, "not_found", msg) }
    pub fn conflict(msg: impl Into<String>) -> Self { Self::new(StatusCode::CONFLICT, "conflict", msg) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg) }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, "bad_request", msg) }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Credential { .. } => StatusCode::UNAUTHORIZED,
            EngineError::GenerationAccess(_) => StatusCode::FORBIDDEN,
            EngineError::Build(_) | EngineError::Infrastructure(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, code: e.code(), message: e.to_string() }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}: {}", self.code, self.message) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_maps_to_status() {
        let cases = [
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::Credential { role_arn: "arn".into(), message: "denied".into() }, StatusCode::UNAUTHORIZED),
            (EngineError::GenerationAccess("x".into()), StatusCode::FORBIDDEN),
            (EngineError::Build("x".into()), StatusCode::BAD_GATEWAY),
            (EngineError::Infrastructure("x".into()), StatusCode::BAD_GATEWAY),
            (EngineError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn classed_message_carries_kind() {
        let err = EngineError::Build("npm install failed".into());
        assert_eq!(err.classed_message(), "build_error: npm install failed");
        let err = EngineError::Credential { role_arn: "arn:aws:iam::123:role/r".into(), message: "bad external id".into() };
        assert!(err.classed_message().starts_with("credential_error: "));
        assert!(err.classed_message().contains("arn:aws:iam::123:role/r"));
    }
}
