//! Typed builder for AuthService.

use std::sync::Arc;

use crate::config::Argon2 as ArgonConfig;
use crate::crypto::{CryptoError, PasswordManager};
use crate::mail::Mailer;
use crate::user::{AuthService, ServiceConfig, UserRepository};

/// [`AuthService`] builder.
///
/// `build` is only available once both collaborators are set.
pub struct AuthServiceBuilder<Repo = Missing, Mail = Missing> {
    repo: Repo,
    mailer: Mail,
    argon2: Option<ArgonConfig>,
}

/// Value is missing on [`AuthServiceBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`AuthServiceBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

impl AuthServiceBuilder<Missing, Missing> {
    /// Create a new [`AuthServiceBuilder`].
    pub fn new() -> Self {
        Self {
            repo: Missing,
            mailer: Missing,
            argon2: None,
        }
    }
}

impl Default for AuthServiceBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Mail> AuthServiceBuilder<Missing, Mail> {
    /// Set the persistence collaborator.
    pub fn repository(
        self,
        repo: Arc<dyn UserRepository>,
    ) -> AuthServiceBuilder<Present<Arc<dyn UserRepository>>, Mail> {
        AuthServiceBuilder {
            repo: Present(repo),
            mailer: self.mailer,
            argon2: self.argon2,
        }
    }
}

impl<Repo> AuthServiceBuilder<Repo, Missing> {
    /// Set the outbound mail collaborator.
    pub fn mailer(
        self,
        mailer: Arc<dyn Mailer>,
    ) -> AuthServiceBuilder<Repo, Present<Arc<dyn Mailer>>> {
        AuthServiceBuilder {
            repo: self.repo,
            mailer: Present(mailer),
            argon2: self.argon2,
        }
    }
}

impl<Repo, Mail> AuthServiceBuilder<Repo, Mail> {
    /// Update Argon2 work factor.
    pub fn argon2(mut self, config: Option<ArgonConfig>) -> Self {
        self.argon2 = config;
        self
    }
}

impl
    AuthServiceBuilder<Present<Arc<dyn UserRepository>>, Present<Arc<dyn Mailer>>>
{
    /// Build the [`AuthService`].
    pub fn build(self, config: ServiceConfig) -> Result<AuthService, CryptoError> {
        let pwd = PasswordManager::new(self.argon2)?;

        Ok(AuthService::new(self.repo.0, self.mailer.0, pwd, config))
    }
}
