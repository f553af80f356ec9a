use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;
use std::path::PathBuf;
use thiserror::Error;

/// Request-scoped failures, mapped to HTTP responses with a JSON
/// `{"error": <message>}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image file provided")]
    MissingInput,

    #[error("failed to read multipart payload: {0}")]
    Multipart(String),

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Inference(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingInput | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Decode(_) | ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        log::error!("request failed: {self}");
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// Startup failures. These abort process initialization; there is no
/// degraded-start mode.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("model file not found at {path}. Please train the model first.")]
    ModelMissing { path: PathBuf },

    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
}
