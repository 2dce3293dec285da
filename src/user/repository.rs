//! Handle database requests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::user::User;

pub type Result<T> = std::result::Result<T, RepositoryError>;

const EMAIL_CONSTRAINT: &str = "users_email_key";
const USERNAME_CONSTRAINT: &str = "users_username_key";

/// Column with a uniqueness constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::Username => "username",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{} already taken", .0.as_str())]
    Conflict(UniqueField),
    #[error("user not found")]
    NotFound,
    #[error("SQL request failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Persistence of [`User`]s.
///
/// Email and username are each unique among all users, verified or not.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist a new user.
    async fn register(&self, user: &User) -> Result<()>;
    /// Find any user by its `id`.
    async fn find_user_by_id(&self, id: &str) -> Result<User>;
    /// Find a user with a proven email by `email`.
    async fn find_verified_user_by_email(&self, email: &str) -> Result<User>;
    /// Find a user with a proven email by `username`.
    async fn find_verified_user_by_username(
        &self,
        username: &str,
    ) -> Result<User>;
    /// Persist the mutable fields of an existing user.
    async fn update(&self, user: &User) -> Result<()>;
}

const SELECT_USER: &str = r#"SELECT id, first_name, last_name, username, email, password,
    verified_at, created_at, updated_at
    FROM users"#;

/// PostgreSQL backed [`UserRepository`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<User> {
        let query = format!("{SELECT_USER} WHERE {filter}");

        sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound)
    }
}

fn map_insert_error(err: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(EMAIL_CONSTRAINT) => {
                    return RepositoryError::Conflict(UniqueField::Email);
                },
                Some(USERNAME_CONSTRAINT) => {
                    return RepositoryError::Conflict(UniqueField::Username);
                },
                _ => {},
            }
        }
    }

    RepositoryError::Database(err)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn register(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users (id, first_name, last_name, username, email, password,
                verified_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.verified_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<User> {
        self.find_one("id = $1", id).await
    }

    async fn find_verified_user_by_email(&self, email: &str) -> Result<User> {
        self.find_one("email = $1 AND verified_at IS NOT NULL", email)
            .await
    }

    async fn find_verified_user_by_username(
        &self,
        username: &str,
    ) -> Result<User> {
        self.find_one("username = $1 AND verified_at IS NOT NULL", username)
            .await
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users
                SET first_name = $1, last_name = $2, verified_at = $3, updated_at = $4
                WHERE id = $5"#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.verified_at)
        .bind(user.updated_at)
        .bind(&user.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}

/// In-process [`UserRepository`], used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserRepository {
    /// Create a new empty [`MemoryUserRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    fn find<F>(&self, predicate: F) -> Result<User>
    where
        F: Fn(&User) -> bool,
    {
        let users = self
            .users
            .read()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;

        users
            .values()
            .find(|user| predicate(user))
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn register(&self, user: &User) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;

        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict(UniqueField::Email));
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::Conflict(UniqueField::Username));
        }

        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<User> {
        self.find(|user| user.id == id)
    }

    async fn find_verified_user_by_email(&self, email: &str) -> Result<User> {
        self.find(|user| user.email == email && user.verified_at.is_some())
    }

    async fn find_verified_user_by_username(
        &self,
        username: &str,
    ) -> Result<User> {
        self.find(|user| {
            user.username == username && user.verified_at.is_some()
        })
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;

        match users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            },
            None => Err(RepositoryError::NotFound),
        }
    }
}
