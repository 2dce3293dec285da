//! HTTP handlers.

pub mod health;
pub mod login;
pub mod register;
pub mod verify;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ServerError;

const SUCCESS: &str = "success";

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;

        Ok(Valid(value))
    }
}

/// Successful response body.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl Envelope<()> {
    /// Envelope without `data`.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: SUCCESS.to_owned(),
            message: message.into(),
            data: None,
        }
    }
}

impl<T> Envelope<T> {
    /// Envelope carrying `data`.
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            status: SUCCESS.to_owned(),
            message: message.into(),
            data: Some(data),
        }
    }
}
