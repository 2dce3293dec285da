use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::Envelope;

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    id: Option<String>,
    sig: Option<String>,
    exp: Option<String>,
}

fn required(value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::BadRequest("invalid request".into()))
}

/// Handler consuming a verification link.
pub async fn handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<Envelope<()>>> {
    let id = required(query.id)?;
    let sig = required(query.sig)?;
    let exp = required(query.exp)?;

    state.auth.verify(&id, &sig, &exp).await?;

    Ok(Json(Envelope::message(
        "Your account has been verified. You can now login.",
    )))
}
