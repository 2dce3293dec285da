mod builder;
mod repository;
mod service;

pub use builder::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::Identity;

/// Where an account stands in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountState {
    /// Registered, email not proven yet.
    Unverified,
    /// Email proven; may log in.
    Verified,
}

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn state(&self) -> AccountState {
        match self.verified_at {
            Some(_) => AccountState::Verified,
            None => AccountState::Unverified,
        }
    }

    /// Move the account to [`AccountState::Verified`].
    ///
    /// Returns `false` and leaves the user untouched when already verified.
    pub fn mark_verified(&mut self, now: DateTime<Utc>) -> bool {
        if self.verified_at.is_some() {
            return false;
        }

        self.verified_at = Some(now);
        self.updated_at = now;
        true
    }
}

impl Identity for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn email(&self) -> &str {
        &self.email
    }
}
