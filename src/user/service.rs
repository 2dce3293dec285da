use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail};

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::mail::Mailer;
use crate::signature::{Params, UrlSigner};
use crate::token::TokenManager;
use crate::user::{AuthServiceBuilder, RepositoryError, User, UserRepository};

/// Path of the verification endpoint, signed into every link.
pub const VERIFY_PATH: &str = "/verify";
/// Parameter carrying the user id on verification links.
pub const ID_PARAM: &str = "id";

/// Settings of an [`AuthService`].
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Key signing bearer tokens.
    pub signing_key: String,
    /// Key signing verification links.
    pub secret_key: String,
    /// Bearer token validity, in hours.
    pub token_expiration: u64,
    /// Origin prepended to verification links.
    pub base_url: String,
    /// Verification link validity.
    pub link_validity: Duration,
    /// Reject verification links whose expiration has elapsed.
    pub enforce_link_expiry: bool,
}

/// Account registration payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128, message = "First name is required (128 characters max)."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 128, message = "Last name is required (128 characters max)."))]
    pub last_name: String,
    #[validate(length(min = 1, max = 128, message = "Username is required (128 characters max)."))]
    pub username: String,
    #[validate(length(min = 1, max = 128, message = "Password is required (128 characters max)."))]
    pub password: String,
    #[validate(
        length(min = 1, max = 128, message = "Email is required (128 characters max)."),
        email(message = "Email must be formatted.")
    )]
    pub email: String,
}

/// How a returning user identifies themself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialType {
    Username,
    Email,
}

impl std::str::FromStr for CredentialType {
    type Err = ServerError;

    fn from_str(kind: &str) -> Result<Self> {
        match kind {
            "username" => Ok(CredentialType::Username),
            "email" => Ok(CredentialType::Email),
            _ => {
                tracing::info!(reason = "invalid credential type", kind, "authentication failed");
                Err(ServerError::Unauthorized)
            },
        }
    }
}

/// Identifier presented at login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    Username(String),
    Email(String),
}

impl Credential {
    /// Build a credential from its declared `kind`.
    ///
    /// Unknown kinds fail exactly like a wrong password.
    pub fn parse(kind: &str, value: impl Into<String>) -> Result<Self> {
        Ok(Self::new(kind.parse()?, value))
    }

    pub fn new(kind: CredentialType, value: impl Into<String>) -> Self {
        match kind {
            CredentialType::Username => Credential::Username(value.into()),
            CredentialType::Email => Credential::Email(value.into()),
        }
    }

    pub fn kind(&self) -> CredentialType {
        match self {
            Credential::Username(_) => CredentialType::Username,
            Credential::Email(_) => CredentialType::Email,
        }
    }
}

/// Register, verify and authenticate accounts.
pub struct AuthService {
    repo: Arc<dyn UserRepository>,
    mailer: Arc<dyn Mailer>,
    pwd: PasswordManager,
    signer: UrlSigner,
    token: TokenManager,
    config: ServiceConfig,
}

impl AuthService {
    /// Start building an [`AuthService`].
    pub fn builder() -> AuthServiceBuilder {
        AuthServiceBuilder::new()
    }

    pub(crate) fn new(
        repo: Arc<dyn UserRepository>,
        mailer: Arc<dyn Mailer>,
        pwd: PasswordManager,
        config: ServiceConfig,
    ) -> Self {
        Self {
            repo,
            mailer,
            pwd,
            signer: UrlSigner::new(&config.secret_key),
            token: TokenManager::new(&config.signing_key, config.token_expiration),
            config,
        }
    }

    /// Token manager used for bearer tokens.
    pub fn token(&self) -> &TokenManager {
        &self.token
    }

    /// Create an unverified account and mail its verification link.
    ///
    /// The account stays persisted if mailing fails.
    pub async fn register(&self, req: RegisterRequest) -> Result<User> {
        req.validate()?;

        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: req.first_name,
            last_name: req.last_name,
            username: req.username,
            email: req.email.to_lowercase(),
            password: self.pwd.hash_password(&req.password)?,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.register(&user).await?;
        tracing::info!(user_id = user.id, "user registered");

        let link = self.verification_link(&user.id)?;
        if let Err(err) = self
            .mailer
            .send_validate_account_mail(&user.email, &user.full_name(), &link)
            .await
        {
            tracing::error!(user_id = user.id, error = %err, "verification mail not sent");
            return Err(err.into());
        }

        Ok(user)
    }

    /// Signed, time-limited link proving ownership of the account email.
    pub fn verification_link(&self, user_id: &str) -> Result<String> {
        let params = Params::from([(ID_PARAM.to_owned(), user_id.to_owned())]);

        self.signer
            .temporary_signed_route(
                &self.config.base_url,
                VERIFY_PATH,
                self.config.link_validity,
                &params,
            )
            .ok_or_else(|| ServerError::Internal {
                details: format!(
                    "link validity of {} is out of range",
                    self.config.link_validity
                ),
                source: None,
            })
    }

    /// Mark the account as verified if the link is authentic.
    pub async fn verify(
        &self,
        user_id: &str,
        signature: &str,
        expiration: &str,
    ) -> Result<()> {
        let params = Params::from([(ID_PARAM.to_owned(), user_id.to_owned())]);
        if !self
            .signer
            .verify(VERIFY_PATH, signature, Some(expiration), &params)
        {
            tracing::info!(user_id, reason = "signature mismatch", "verification refused");
            return Err(ServerError::BadRequest("invalid verification link".into()));
        }

        if self.config.enforce_link_expiry && link_expired(expiration, Utc::now()) {
            tracing::info!(user_id, reason = "link expired", "verification refused");
            return Err(ServerError::BadRequest("verification link expired".into()));
        }

        let mut user = self.repo.find_user_by_id(user_id).await?;
        if !user.mark_verified(Utc::now()) {
            return Err(ServerError::BadRequest("user already verified".into()));
        }
        self.repo.update(&user).await?;

        tracing::info!(user_id, "user verified");
        Ok(())
    }

    /// Exchange a credential and password for a bearer token.
    ///
    /// Every authentication failure is the same [`ServerError::Unauthorized`].
    pub async fn login(
        &self,
        credential: Credential,
        password: &str,
    ) -> Result<String> {
        let found = match &credential {
            Credential::Email(email) => {
                if !email.validate_email() {
                    tracing::info!(reason = "invalid email", %email, "authentication failed");
                    return Err(ServerError::Unauthorized);
                }

                self.repo
                    .find_verified_user_by_email(&email.to_lowercase())
                    .await
                    .map_err(|err| lookup_failed("failed to find user by email", err))?
            },
            Credential::Username(username) => self
                .repo
                .find_verified_user_by_username(username)
                .await
                .map_err(|err| lookup_failed("failed to find user by username", err))?,
        };

        if !self.pwd.verify_password(password, &found.password) {
            tracing::info!(user_id = found.id, reason = "password mismatch", "authentication failed");
            return Err(ServerError::Unauthorized);
        }

        let token = self.token.create(&found)?;
        tracing::info!(user_id = found.id, "user logged in");

        Ok(token)
    }
}

fn lookup_failed(reason: &'static str, err: RepositoryError) -> ServerError {
    tracing::info!(reason, error = %err, "authentication failed");
    ServerError::Unauthorized
}

fn link_expired(expiration: &str, now: DateTime<Utc>) -> bool {
    match expiration.parse::<i64>() {
        Ok(exp) => exp < now.timestamp(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingMailer, RecordingMailer, link_query, register_request, service,
        service_config, service_from, service_with,
    };
    use crate::user::MemoryUserRepository;

    #[tokio::test]
    async fn test_register_sends_signed_link() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(mailer.clone());

        let user = service.register(register_request("john", "John@X.io")).await.unwrap();
        assert_eq!(user.email, "john@x.io");
        assert!(user.verified_at.is_none());
        assert!(user.password.starts_with("$argon2id$"));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "john@x.io");
        assert_eq!(sent[0].full_name, "John Doe");
        assert!(sent[0].link.starts_with("http://localhost:8080/verify?id="));

        let query = link_query(&sent[0].link);
        assert_eq!(query["id"], user.id);
        let exp: i64 = query["exp"].parse().unwrap();
        let expected = (Utc::now() + Duration::hours(24)).timestamp();
        assert!((expected - exp).abs() <= 5);
    }

    #[tokio::test]
    async fn test_register_validation_has_no_side_effect() {
        let mailer = Arc::new(RecordingMailer::default());
        let repo = Arc::new(MemoryUserRepository::new());
        let service = service_with(repo.clone(), mailer.clone(), false);

        let mut req = register_request("john", "not-an-email");
        let err = service.register(req.clone()).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        req.email = "john@x.io".into();
        req.first_name = "a".repeat(129);
        let err = service.register(req).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        assert!(mailer.sent().is_empty());
        assert!(repo.find_verified_user_by_username("john").await.is_err());
    }

    #[tokio::test]
    async fn test_register_duplicates_are_distinguishable() {
        let service = service(Arc::new(RecordingMailer::default()));
        service.register(register_request("john", "john@x.io")).await.unwrap();

        let err = service
            .register(register_request("johnny", "JOHN@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyExists("email")));

        let err = service
            .register(register_request("john", "other@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyExists("username")));
    }

    #[tokio::test]
    async fn test_register_mail_failure_keeps_user() {
        let repo = Arc::new(MemoryUserRepository::new());
        let service = service_with(repo.clone(), Arc::new(FailingMailer), false);

        let err = service
            .register(register_request("john", "john@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Mail(_)));

        // The account exists and blocks a second attempt.
        let err = service
            .register(register_request("john", "john@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyExists("email")));
    }

    #[tokio::test]
    async fn test_verify_then_login() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(mailer.clone());
        let user = service.register(register_request("john", "john@x.io")).await.unwrap();

        let password = register_request("john", "john@x.io").password;
        assert!(matches!(
            service.login(Credential::Username("john".into()), &password).await,
            Err(ServerError::Unauthorized)
        ));

        let query = link_query(&mailer.sent()[0].link);
        service.verify(&query["id"], &query["sig"], &query["exp"]).await.unwrap();

        let jwt = service
            .login(Credential::Email("JOHN@x.io".into()), &password)
            .await
            .unwrap();
        let claims = service.token().decode(&jwt).unwrap();
        assert_eq!(claims.id, user.id);
        assert_eq!(claims.email, "john@x.io");

        assert!(service.login(Credential::Username("john".into()), &password).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_is_not_idempotent() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(mailer.clone());
        service.register(register_request("john", "john@x.io")).await.unwrap();

        let query = link_query(&mailer.sent()[0].link);
        service.verify(&query["id"], &query["sig"], &query["exp"]).await.unwrap();

        let err = service
            .verify(&query["id"], &query["sig"], &query["exp"])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(msg) if msg == "user already verified"));
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_links() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(mailer.clone());
        service.register(register_request("john", "john@x.io")).await.unwrap();
        let query = link_query(&mailer.sent()[0].link);

        let mut sig = query["sig"].clone();
        let last = if sig.ends_with('0') { '1' } else { '0' };
        sig.pop();
        sig.push(last);

        let err = service.verify(&query["id"], &sig, &query["exp"]).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(msg) if msg == "invalid verification link"));

        let err = service
            .verify(&query["id"], &query["sig"], "1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));

        // Correctly signed but unknown account.
        let link = service.verification_link("unknown").unwrap();
        let unknown = link_query(&link);
        let err = service
            .verify(&unknown["id"], &unknown["sig"], &unknown["exp"])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound));
    }

    #[tokio::test]
    async fn test_validity_out_of_range() {
        let repo = Arc::new(MemoryUserRepository::new());
        let mailer = Arc::new(RecordingMailer::default());

        let mut config = service_config(false);
        config.link_validity = Duration::MAX;
        let service = service_from(repo.clone(), mailer.clone(), config);

        let err = service
            .register(register_request("john", "john@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Internal { .. }));
        assert!(mailer.sent().is_empty());

        let mut config = service_config(false);
        config.token_expiration = u64::MAX;
        let service = service_from(repo.clone(), mailer.clone(), config);
        let user = service.register(register_request("jane", "jane@x.io")).await.unwrap();
        let link = link_query(&mailer.sent()[0].link);
        service.verify(&user.id, &link["sig"], &link["exp"]).await.unwrap();

        let password = register_request("jane", "jane@x.io").password;
        let err = service
            .login(Credential::Username("jane".into()), &password)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_expired_link() {
        let signer = UrlSigner::new(crate::test_support::SECRET_KEY);
        let repo = Arc::new(MemoryUserRepository::new());
        let mailer = Arc::new(RecordingMailer::default());

        let lenient = service_with(repo.clone(), mailer.clone(), false);
        let strict = service_with(repo.clone(), mailer.clone(), true);
        let user = lenient.register(register_request("john", "john@x.io")).await.unwrap();

        let elapsed = (Utc::now() - Duration::hours(1)).timestamp().to_string();
        let params = Params::from([(ID_PARAM.to_owned(), user.id.clone())]);
        let sig = signer.signature(VERIFY_PATH, &params, Some(&elapsed));

        let err = strict.verify(&user.id, &sig, &elapsed).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(msg) if msg == "verification link expired"));

        lenient.verify(&user.id, &sig, &elapsed).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failures_are_identical() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(mailer.clone());
        service.register(register_request("john", "john@x.io")).await.unwrap();
        let query = link_query(&mailer.sent()[0].link);
        service.verify(&query["id"], &query["sig"], &query["exp"]).await.unwrap();

        let password = register_request("john", "john@x.io").password;
        let failures = vec![
            Credential::parse("", "john").map(|_| ()),
            Credential::parse("phone", "john").map(|_| ()),
            service.login(Credential::Email("not-an-email".into()), &password).await.map(|_| ()),
            service.login(Credential::Email("ghost@x.io".into()), &password).await.map(|_| ()),
            service.login(Credential::Username("ghost".into()), &password).await.map(|_| ()),
            service.login(Credential::Username("john".into()), "wrong").await.map(|_| ()),
        ];

        for failure in failures {
            let err = failure.unwrap_err();
            assert!(matches!(err, ServerError::Unauthorized));
            assert_eq!(err.to_string(), "invalid credentials");
        }
    }

    #[test]
    fn test_credential_parse() {
        assert_eq!(
            Credential::parse("email", "john@x.io").unwrap(),
            Credential::Email("john@x.io".into())
        );
        assert_eq!(
            Credential::parse("username", "john").unwrap().kind(),
            CredentialType::Username
        );
    }

    #[test]
    fn test_link_expired() {
        let now = Utc::now();
        assert!(link_expired(&(now.timestamp() - 1).to_string(), now));
        assert!(!link_expired(&(now.timestamp() + 60).to_string(), now));
        assert!(link_expired("tomorrow", now));
    }
}
