use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::{Envelope, Valid};
use crate::user::{Credential, CredentialType};

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct Body {
    #[serde(default)]
    #[validate(length(max = 128))]
    pub username: Option<String>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

impl Body {
    /// Pick the single identifier of the body.
    fn credential(self) -> Result<(Credential, String)> {
        let username = self.username.filter(|u| !u.is_empty());
        let email = self.email.filter(|e| !e.is_empty());

        let credential = match (username, email) {
            (None, None) => {
                return Err(ServerError::BadRequest(
                    "username or email is required".into(),
                ));
            },
            (Some(_), Some(_)) => {
                return Err(ServerError::BadRequest(
                    "only one of username or email is allowed".into(),
                ));
            },
            (Some(username), None) => {
                Credential::new(CredentialType::Username, username)
            },
            (None, Some(email)) => Credential::new(CredentialType::Email, email),
        };

        Ok((credential, self.password))
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub token: String,
}

/// Handler to exchange credentials for a bearer token.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Envelope<Response>>> {
    let (credential, password) = body.credential()?;
    let token = state.auth.login(credential, &password).await?;

    Ok(Json(Envelope::with_data(
        "You have been successfully logged in.",
        Response { token },
    )))
}
