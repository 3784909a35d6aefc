//! Error handling.

use axum::{
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// airmetrics error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
///
/// Producer errors are normally absorbed by the access service, which degrades to an empty
/// result. They still map to responses so that every variant is reportable.
#[derive(Debug, Error)]
pub enum AirMetricsError {
    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error sending a request to, or reading a response from, a sample producer
    #[error("error requesting samples from producer")]
    ProducerRequest(#[from] reqwest::Error),

    /// Sample producer responded with an unsuccessful status
    #[error("producer responded with status {status}")]
    ProducerStatus { status: u16 },

    /// The HTTP producer was selected without a base URL
    #[error("no producer URL configured")]
    ProducerUrlMissing,

    /// The producer base URL could not be used
    #[error("invalid producer URL")]
    ProducerUrl(#[from] url::ParseError),

    /// Sample producer refused our credentials
    #[error("producer refused authentication")]
    ProducerAuthentication,

    /// Sample producer did not respond in time
    #[error("producer did not respond within {millis} ms")]
    ProducerTimeout { millis: u64 },

    /// Configured quality thresholds leave no room for the medium tier
    #[error("quality threshold high ({high}) must not be below medium ({medium})")]
    QualityThresholds { high: f64, medium: f64 },

    /// Error serialising data
    #[error("failed to serialise data")]
    Serialisation(#[from] serde_json::Error),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// A spawned task panicked or was cancelled
    #[error("error joining task")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl AirMetricsError {
    /// Short label describing the kind of producer failure, used in metrics.
    pub fn producer_failure_reason(&self) -> &'static str {
        match self {
            Self::ProducerRequest(_) => "request",
            Self::ProducerStatus { status: _ } => "status",
            Self::ProducerAuthentication => "authentication",
            Self::ProducerTimeout { millis: _ } => "timeout",
            Self::SemaphoreAcquireError(_) => "resources",
            _ => "other",
        }
    }
}

impl IntoResponse for AirMetricsError {
    /// Convert from an `AirMetricsError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut causes = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            causes.push(source.to_string());
            current = source.source();
        }
        causes.dedup();
        let caused_by = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 502 bad gateway ErrorResponse
    fn bad_gateway<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_GATEWAY, error)
    }

    /// Return a 504 gateway timeout ErrorResponse
    fn gateway_timeout<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::GATEWAY_TIMEOUT, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<AirMetricsError> for ErrorResponse {
    /// Convert from an `AirMetricsError` into an `ErrorResponse`.
    fn from(error: AirMetricsError) -> Self {
        let response = match &error {
            // Bad request
            AirMetricsError::RequestDataJsonRejection(_)
            | AirMetricsError::RequestDataValidationSingle(_)
            | AirMetricsError::RequestDataValidation(_) => Self::bad_request(&error),

            // Bad gateway
            AirMetricsError::ProducerRequest(_)
            | AirMetricsError::ProducerStatus { status: _ }
            | AirMetricsError::ProducerAuthentication => Self::bad_gateway(&error),

            // Gateway timeout
            AirMetricsError::ProducerTimeout { millis: _ } => Self::gateway_timeout(&error),

            // Internal server error
            AirMetricsError::ProducerUrlMissing
            | AirMetricsError::ProducerUrl(_)
            | AirMetricsError::QualityThresholds { .. }
            | AirMetricsError::Serialisation(_)
            | AirMetricsError::SemaphoreAcquireError(_)
            | AirMetricsError::TaskJoin(_)
            | AirMetricsError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}
