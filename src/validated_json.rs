//! Axum extractor that deserialises and validates JSON request bodies

use crate::error::AirMetricsError;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Json},
    http::Request,
};
use serde::de::DeserializeOwned;
use validator::Validate;

/// Request body extractor.
///
/// Deserialises the body like [axum::Json] and then runs the validator checks on the result.
/// Either failure rejects the request with an [AirMetricsError], which renders as a 400 response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    B: Send + 'static,
{
    type Rejection = AirMetricsError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                tracing::debug!("rejected request body: {}", rejection.body_text());
                AirMetricsError::from(rejection)
            })?;
        if let Err(errors) = value.validate() {
            tracing::debug!("request data failed validation: {}", errors);
            return Err(errors.into());
        }
        Ok(ValidatedJson(value))
    }
}
