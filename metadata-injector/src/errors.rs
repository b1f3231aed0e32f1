use std::fmt::Display;

use http::StatusCode;

/// Failures of the process-level plumbing. None of them stop the server.
#[derive(Debug)]
pub enum InjectorError {
    CertLoadFailed(String),
    WatchSetupFailed(String),
    Bind(String),
}

impl Display for InjectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectorError::CertLoadFailed(e) => write!(f, "failed to load key pair: {}", e),
            InjectorError::WatchSetupFailed(e) => write!(f, "could not watch folder: {}", e),
            InjectorError::Bind(e) => write!(f, "unable to bind listener: {}", e),
        }
    }
}

impl std::error::Error for InjectorError {}

/// Request scoped failures of the `/mutate` handler. Every variant ends the
/// request with a plain text HTTP error, never with `allowed = false`.
#[derive(Debug, PartialEq)]
pub enum AdmissionError {
    EmptyBody,
    UnsupportedMediaType(String),
    DecodeFailed(String),
    ObjectMissing(String),
    EncodeFailed(String),
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::EmptyBody => StatusCode::BAD_REQUEST,
            AdmissionError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AdmissionError::DecodeFailed(_) => StatusCode::BAD_REQUEST,
            AdmissionError::ObjectMissing(_) => StatusCode::BAD_REQUEST,
            AdmissionError::EncodeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::EmptyBody => write!(f, "empty body"),
            AdmissionError::UnsupportedMediaType(_) => {
                write!(f, "invalid Content-Type, expect `application/json`")
            }
            AdmissionError::DecodeFailed(e) => write!(f, "could not decode request body: {:?}", e),
            AdmissionError::ObjectMissing(body) => {
                write!(f, "object not present in request body: {:?}", body)
            }
            AdmissionError::EncodeFailed(e) => write!(f, "could not encode response: {}", e),
        }
    }
}

impl std::error::Error for AdmissionError {}
