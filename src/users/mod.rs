//! User directory: account records, roles, and federated provider links.
//!
//! The directory is a collaborator of the session manager. It owns the
//! `users` and `user_providers` tables and knows nothing about tokens;
//! password hashes pass through it as opaque strings.

use std::future::Future;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::db;

/// Closed role set. New accounts default to `User`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    User,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Teacher => "TEACHER",
            Self::Student => "STUDENT",
            Self::User => "USER",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ADMIN" => Ok(Self::Admin),
            "TEACHER" => Ok(Self::Teacher),
            "STUDENT" => Ok(Self::Student),
            "USER" => Ok(Self::User),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

/// Identity providers a local account can be linked to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Local,
    Google,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Google => "GOOGLE",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LOCAL" => Ok(Self::Local),
            "GOOGLE" => Ok(Self::Google),
            other => Err(anyhow::anyhow!("unknown provider: {other}")),
        }
    }
}

/// Account record without the password hash.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

/// One federated identity linked to a local account.
#[derive(Clone, Debug)]
pub struct ProviderLink {
    pub provider: Provider,
    pub provider_id: String,
}

#[derive(Clone, Debug)]
pub struct UserWithProviders {
    pub user: User,
    pub links: Vec<ProviderLink>,
}

/// Input for account creation. The password is already hashed by the caller;
/// the directory never sees plaintext credentials.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: Role,
    pub provider: Provider,
    pub provider_id: String,
}

/// Directory operations the session manager depends on.
///
/// Email lookups are case-insensitive. `find_*` methods return `Ok(None)` on
/// a miss; only `create` and `add_provider_link` surface `Conflict`.
pub trait UserDirectory: Send + Sync {
    fn create(&self, new_user: NewUser) -> impl Future<Output = Result<User, AuthError>> + Send;

    fn find_by_id(&self, id: Uuid)
    -> impl Future<Output = Result<Option<User>, AuthError>> + Send;

    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, AuthError>> + Send;

    /// Lookup including the stored password hash, for credential validation.
    fn find_by_email_with_password(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<(User, String)>, AuthError>> + Send;

    fn find_with_providers(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<UserWithProviders>, AuthError>> + Send;

    fn add_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// Lookup that treats a missing account as a fault, for handlers where the
/// id comes from an already-verified token.
///
/// # Errors
/// `NotFound` when no account has the id.
pub async fn find_by_id_or_fault<D: UserDirectory>(
    directory: &D,
    id: Uuid,
) -> Result<User, AuthError> {
    directory
        .find_by_id(id)
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("User {id} not found")))
}

/// Normalize an email for storage and lookups.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Uppercase the first letter, as account name parts are stored.
pub(crate) fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Postgres-backed directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User, AuthError> {
    let role: String = row.get("role");
    let role = Role::from_str(&role)
        .context("invalid role stored for user")
        .map_err(AuthError::Internal)?;
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        role,
    })
}

const SELECT_USER: &str = r"
    SELECT id, email, first_name, last_name, role::text AS role
    FROM users
    WHERE LOWER(email) = LOWER($1)
    LIMIT 1
";

impl UserDirectory for PgUserDirectory {
    async fn create(&self, new_user: NewUser) -> Result<User, AuthError> {
        let email = normalize_email(&new_user.email);
        let first_name = capitalize(&new_user.first_name);
        let last_name = capitalize(&new_user.last_name);

        // The account and its initial provider link commit together.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin user creation transaction")
            .map_err(AuthError::Internal)?;

        let query = r"
            INSERT INTO users (email, first_name, last_name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5::user_role)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&email)
            .bind(&first_name)
            .bind(&last_name)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "User", &email))?;

        let user_id: Uuid = row.get("id");

        let query = r"
            INSERT INTO user_providers (user_id, provider, provider_id)
            VALUES ($1, $2::auth_provider, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(new_user.provider.as_str())
            .bind(&new_user.provider_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "UserProvider", &new_user.provider_id))?;

        tx.commit()
            .await
            .context("commit user creation transaction")
            .map_err(AuthError::Internal)?;

        Ok(User {
            id: user_id,
            email,
            first_name,
            last_name,
            role: new_user.role,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let query = r"
            SELECT id, email, first_name, last_name, role::text AS role
            FROM users
            WHERE id = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "User", &id.to_string()))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = SELECT_USER
        );
        let row = sqlx::query(SELECT_USER)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "User", email))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email_with_password(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, AuthError> {
        let query = r"
            SELECT id, email, first_name, last_name, role::text AS role, password_hash
            FROM users
            WHERE LOWER(email) = LOWER($1)
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "User", email))?;

        match row {
            Some(row) => {
                let user = user_from_row(&row)?;
                let password_hash: String = row.get("password_hash");
                Ok(Some((user, password_hash)))
            }
            None => Ok(None),
        }
    }

    async fn find_with_providers(&self, email: &str) -> Result<Option<UserWithProviders>, AuthError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };

        let query = r"
            SELECT provider::text AS provider, provider_id
            FROM user_providers
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user.id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "UserProvider", email))?;

        let mut links = Vec::with_capacity(rows.len());
        for row in &rows {
            let provider: String = row.get("provider");
            let provider = Provider::from_str(&provider)
                .context("invalid provider stored for user")
                .map_err(AuthError::Internal)?;
            links.push(ProviderLink {
                provider,
                provider_id: row.get("provider_id"),
            });
        }

        Ok(Some(UserWithProviders { user, links }))
    }

    async fn add_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<(), AuthError> {
        let query = r"
            INSERT INTO user_providers (user_id, provider, provider_id)
            VALUES ($1, $2::auth_provider, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(provider.as_str())
            .bind(provider_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| db::classify(err, "UserProvider", provider_id))?;

        Ok(())
    }
}
