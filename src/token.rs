//! Manage json web tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Anything a bearer token can be issued for.
pub trait Identity {
    /// Opaque unique identifier.
    fn id(&self) -> &str;
    /// Email address.
    fn email(&self) -> &str;
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub id: String,
    /// User email.
    pub email: String,
    /// Expiration time, as seconds since the epoch.
    pub exp: i64,
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity_hours: u64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &self.algorithm)
            .field("validity_hours", &self.validity_hours)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a new [`TokenManager`] signing with HMAC-SHA256.
    pub fn new(signing_key: &str, validity_hours: u64) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            validity_hours,
        }
    }

    /// Create a new [`jsonwebtoken`] for `identity`.
    pub fn create(&self, identity: &impl Identity) -> Result<String> {
        let exp = i64::try_from(self.validity_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|validity| Utc::now().checked_add_signed(validity))
            .ok_or_else(|| ServerError::Internal {
                details: format!(
                    "token validity of {} hours is out of range",
                    self.validity_hours
                ),
                source: None,
            })?;

        let claims = Claims {
            id: identity.id().to_owned(),
            email: identity.email().to_owned(),
            exp: exp.timestamp(),
        };

        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    /// Decode and check a token.
    ///
    /// Meant for handlers guarding protected routes; signature and expiry
    /// are both enforced.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_required_spec_claims(&["exp"]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}
