use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::Result;
use crate::router::{Envelope, Valid};
use crate::user::RegisterRequest;

/// Handler to create an unverified account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<RegisterRequest>,
) -> Result<(StatusCode, Json<Envelope<()>>)> {
    let user = state.auth.register(body).await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::message(format!(
            "Welcome {}!. An email has been sent to {}. Please verify your account.",
            user.full_name(),
            user.email
        ))),
    ))
}
