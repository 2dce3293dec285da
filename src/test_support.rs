//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::AppState;
use crate::config::{Argon2, Configuration};
use crate::mail::{MailError, Mailer};
use crate::user::{
    AuthService, MemoryUserRepository, RegisterRequest, ServiceConfig, User,
    UserRepository,
};

pub const SIGNING_KEY: &str = "signing-key";
pub const SECRET_KEY: &str = "secretKey";
pub const BASE_URL: &str = "http://localhost:8080";
pub const PASSWORD: &str = "P$soW%920$n&";

/// A mail handed to a [`RecordingMailer`].
#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub full_name: String,
    pub link: String,
}

/// Keeps every mail instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_validate_account_mail(
        &self,
        to: &str,
        full_name: &str,
        link: &str,
    ) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_owned(),
            full_name: full_name.to_owned(),
            link: link.to_owned(),
        });
        Ok(())
    }
}

/// Refuses every mail.
#[derive(Debug, Default)]
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send_validate_account_mail(
        &self,
        _to: &str,
        _full_name: &str,
        _link: &str,
    ) -> Result<(), MailError> {
        Err(MailError::Delivery("smtp unreachable".into()))
    }
}

/// Unverified user named John Doe.
pub fn user(username: &str, email: &str) -> User {
    let now = Utc::now();
    User {
        id: uuid::Uuid::new_v4().to_string(),
        first_name: "John".into(),
        last_name: "Doe".into(),
        username: username.into(),
        email: email.into(),
        password: "$argon2id$v=19$m=4096,t=1,p=1$c2FsdA$aGFzaA".into(),
        verified_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn register_request(username: &str, email: &str) -> RegisterRequest {
    RegisterRequest {
        first_name: "John".into(),
        last_name: "Doe".into(),
        username: username.into(),
        password: PASSWORD.into(),
        email: email.into(),
    }
}

/// Query parameters of a link.
pub fn link_query(link: &str) -> HashMap<String, String> {
    url::Url::parse(link)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

pub fn service_config(enforce_link_expiry: bool) -> ServiceConfig {
    ServiceConfig {
        signing_key: SIGNING_KEY.into(),
        secret_key: SECRET_KEY.into(),
        token_expiration: 72,
        base_url: BASE_URL.into(),
        link_validity: Duration::hours(24),
        enforce_link_expiry,
    }
}

/// Argon2 parameters cheap enough for tests.
fn argon2() -> Argon2 {
    Argon2 {
        memory_cost: 4096,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }
}

pub fn service_from(
    repo: Arc<dyn UserRepository>,
    mailer: Arc<dyn Mailer>,
    config: ServiceConfig,
) -> AuthService {
    AuthService::builder()
        .repository(repo)
        .mailer(mailer)
        .argon2(Some(argon2()))
        .build(config)
        .unwrap()
}

pub fn service_with(
    repo: Arc<dyn UserRepository>,
    mailer: Arc<dyn Mailer>,
    enforce_link_expiry: bool,
) -> AuthService {
    service_from(repo, mailer, service_config(enforce_link_expiry))
}

pub fn service(mailer: Arc<dyn Mailer>) -> AuthService {
    service_with(Arc::new(MemoryUserRepository::new()), mailer, false)
}

pub fn state_with_repo(
    mailer: Arc<dyn Mailer>,
) -> (AppState, Arc<MemoryUserRepository>) {
    let repo = Arc::new(MemoryUserRepository::new());
    let mut config = Configuration::default();
    config.jwt_signing_key = SIGNING_KEY.into();
    config.secret_key = SECRET_KEY.into();

    let state = AppState {
        config: Arc::new(config),
        auth: Arc::new(service_with(repo.clone(), mailer, false)),
        metrics: None,
    };

    (state, repo)
}

pub fn state(mailer: Arc<dyn Mailer>) -> AppState {
    state_with_repo(mailer).0
}
