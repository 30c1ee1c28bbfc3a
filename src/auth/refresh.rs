//! Persisted, revocable refresh tokens.
//!
//! One record per login session. The client holds an opaque random secret;
//! only its bcrypt hash is stored, so a database leak exposes nothing
//! usable. Rotation atomically creates a successor and revokes the old
//! record; a revoked record is terminal and kept for replay detection.

use std::future::Future;

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::password::PasswordHasher;

const SECRET_LEN: usize = 64;

pub const DEFAULT_SHORT_HOURS: i64 = 8;
pub const DEFAULT_LONG_DAYS: i64 = 30;

/// Session lifetimes for short-lived vs "remember me" logins.
#[derive(Clone, Copy, Debug)]
pub struct RefreshTtl {
    pub short_hours: i64,
    pub long_days: i64,
}

impl Default for RefreshTtl {
    fn default() -> Self {
        Self {
            short_hours: DEFAULT_SHORT_HOURS,
            long_days: DEFAULT_LONG_DAYS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub owner_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub token_hash: String,
    pub owner_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Raw secret handed to the client. The only moment it exists in the clear.
#[derive(Debug)]
pub struct IssuedRefreshToken {
    pub raw_secret: String,
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Failure modes of the atomic replace.
#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("refresh token not found")]
    NotFound,
    /// The conditional revoke hit zero rows: a concurrent rotation won.
    #[error("refresh token already revoked")]
    AlreadyRevoked,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Persistence seam for refresh-token records.
///
/// `replace` must be atomic: successor insert and old-record revoke commit
/// together or not at all, and two concurrent replacements of the same
/// record must not both succeed.
pub trait RefreshTokenRepo: Send + Sync {
    fn insert(&self, token: NewRefreshToken) -> impl Future<Output = Result<Uuid>> + Send;

    fn find(&self, id: Uuid) -> impl Future<Output = Result<Option<RefreshTokenRecord>>> + Send;

    fn replace(
        &self,
        old_id: Uuid,
        successor: NewRefreshToken,
    ) -> impl Future<Output = Result<Uuid, ReplaceError>> + Send;
}

/// Postgres-backed repository.
#[derive(Clone)]
pub struct PgRefreshTokens {
    pool: PgPool,
}

impl PgRefreshTokens {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.get("id"),
        token_hash: row.get("token_hash"),
        owner_id: row.get("owner_id"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        replaced_by_token_id: row.get("replaced_by_token_id"),
    }
}

impl RefreshTokenRepo for PgRefreshTokens {
    async fn insert(&self, token: NewRefreshToken) -> Result<Uuid> {
        let query = r"
            INSERT INTO refresh_tokens (token_hash, owner_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&token.token_hash)
            .bind(token.owner_id)
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(row.get("id"))
    }

    async fn find(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>> {
        let query = r"
            SELECT id, token_hash, owner_id, expires_at, revoked_at, replaced_by_token_id
            FROM refresh_tokens
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
            .context("failed to lookup refresh token")?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn replace(&self, old_id: Uuid, successor: NewRefreshToken) -> Result<Uuid, ReplaceError> {
        // Single transaction: either the successor exists and the old record
        // is terminal, or nothing changed. A partial state would leave either
        // two live sessions or a locked-out client.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin refresh rotation transaction")
            .map_err(ReplaceError::Store)?;

        let query = r"
            INSERT INTO refresh_tokens (token_hash, owner_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&successor.token_hash)
            .bind(successor.owner_id)
            .bind(successor.expires_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert successor refresh token")
            .map_err(ReplaceError::Store)?;
        let new_id: Uuid = row.get("id");

        // Conditional revoke: zero rows means a concurrent rotation already
        // revoked this record, regardless of transaction isolation level.
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), replaced_by_token_id = $1
            WHERE id = $2
              AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to revoke old refresh token")
            .map_err(ReplaceError::Store)?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("rollback refresh rotation transaction")
                .map_err(ReplaceError::Store)?;
            return Err(match self.find(old_id).await.map_err(ReplaceError::Store)? {
                Some(_) => ReplaceError::AlreadyRevoked,
                None => ReplaceError::NotFound,
            });
        }

        tx.commit()
            .await
            .context("commit refresh rotation transaction")
            .map_err(ReplaceError::Store)?;

        Ok(new_id)
    }
}

/// Generate an opaque refresh secret with 512 bits of entropy.
fn generate_secret() -> Result<String> {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token secret")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Issues and rotates refresh tokens on top of a [`RefreshTokenRepo`].
pub struct RefreshTokenStore<R> {
    repo: R,
    hasher: PasswordHasher,
    ttl: RefreshTtl,
}

impl<R: RefreshTokenRepo> RefreshTokenStore<R> {
    pub const fn new(repo: R, hasher: PasswordHasher, ttl: RefreshTtl) -> Self {
        Self { repo, hasher, ttl }
    }

    pub const fn repo(&self) -> &R {
        &self.repo
    }

    /// Create a session record and return the raw secret to the caller.
    ///
    /// # Errors
    /// Internal fault on secret generation, hashing, or persistence failure.
    pub async fn issue(
        &self,
        owner_id: Uuid,
        short_lived: bool,
    ) -> Result<IssuedRefreshToken, AuthError> {
        let raw_secret = generate_secret()?;
        let token_hash = self
            .hasher
            .hash(&raw_secret)
            .context("failed to hash refresh token secret")?;

        let hours = if short_lived {
            self.ttl.short_hours
        } else {
            self.ttl.long_days * 24
        };
        let expires_at = Utc::now() + Duration::hours(hours);

        let id = self
            .repo
            .insert(NewRefreshToken {
                token_hash,
                owner_id,
                expires_at,
            })
            .await
            .context("failed to persist refresh token")?;

        Ok(IssuedRefreshToken {
            raw_secret,
            id,
            expires_at,
        })
    }

    /// Look up a record by id, or `NotFound`.
    pub async fn peek(&self, id: Uuid) -> Result<RefreshTokenRecord, AuthError> {
        self.repo
            .find(id)
            .await
            .context("failed to lookup refresh token")?
            .ok_or_else(|| AuthError::NotFound(format!("refresh token {id} not found")))
    }

    /// Verify a presented raw secret against a record's stored hash.
    ///
    /// # Errors
    /// Internal fault if the stored digest cannot be parsed.
    pub fn verify_secret(
        &self,
        record: &RefreshTokenRecord,
        presented: &str,
    ) -> Result<bool, AuthError> {
        Ok(self
            .hasher
            .verify(presented, &record.token_hash)
            .context("failed to verify refresh token secret")?)
    }

    /// Exchange a record for its successor, revoking the old one.
    ///
    /// Reuse of an already-revoked record is the replay signal and returns
    /// `Forbidden`. The successor keeps the old record's owner and expiry;
    /// rotation never extends a session. Secret verification is not done
    /// here; the access-refresh path checks it independently.
    pub async fn rotate(&self, old_id: Uuid) -> Result<IssuedRefreshToken, AuthError> {
        let record = self.peek(old_id).await?;
        if record.revoked_at.is_some() {
            return Err(AuthError::Forbidden(
                "refresh token already revoked".to_string(),
            ));
        }
        if record.expires_at <= Utc::now() {
            return Err(AuthError::Forbidden("refresh token expired".to_string()));
        }

        let raw_secret = generate_secret()?;
        let token_hash = self
            .hasher
            .hash(&raw_secret)
            .context("failed to hash refresh token secret")?;

        let new_id = self
            .repo
            .replace(
                old_id,
                NewRefreshToken {
                    token_hash,
                    owner_id: record.owner_id,
                    expires_at: record.expires_at,
                },
            )
            .await
            .map_err(|err| match err {
                ReplaceError::NotFound => {
                    AuthError::NotFound(format!("refresh token {old_id} not found"))
                }
                ReplaceError::AlreadyRevoked => {
                    AuthError::Forbidden("refresh token already revoked".to_string())
                }
                ReplaceError::Store(err) => {
                    AuthError::Internal(err.context("failed to rotate refresh token"))
                }
            })?;

        Ok(IssuedRefreshToken {
            raw_secret,
            id: new_id,
            expires_at: record.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::HashSetting;
    use crate::auth::testing::MemoryRefreshRepo;

    fn store() -> RefreshTokenStore<MemoryRefreshRepo> {
        let hasher = PasswordHasher::new(&HashSetting::Cost(4)).expect("valid cost");
        RefreshTokenStore::new(MemoryRefreshRepo::default(), hasher, RefreshTtl::default())
    }

    #[test]
    fn generated_secrets_are_long_and_unique() -> Result<()> {
        let first = generate_secret()?;
        let second = generate_secret()?;
        assert_ne!(first, second);
        assert_eq!(Base64UrlUnpadded::decode_vec(&first).map(|b| b.len()), Ok(SECRET_LEN));
        Ok(())
    }

    #[tokio::test]
    async fn issue_returns_raw_secret_and_stores_only_hash() -> Result<(), AuthError> {
        let store = store();
        let owner = Uuid::new_v4();

        let issued = store.issue(owner, true).await?;
        let record = store.peek(issued.id).await?;

        assert_eq!(record.owner_id, owner);
        assert!(record.revoked_at.is_none());
        assert!(record.replaced_by_token_id.is_none());
        assert_ne!(record.token_hash, issued.raw_secret);
        assert!(store.verify_secret(&record, &issued.raw_secret)?);
        assert!(!store.verify_secret(&record, "wrong-secret")?);
        Ok(())
    }

    #[tokio::test]
    async fn short_and_long_sessions_get_expected_ttls() -> Result<(), AuthError> {
        let store = store();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let short = store.issue(owner, true).await?;
        let long = store.issue(owner, false).await?;

        let tolerance = Duration::minutes(1);
        assert!((short.expires_at - (now + Duration::hours(DEFAULT_SHORT_HOURS))).abs() < tolerance);
        assert!(
            (long.expires_at - (now + Duration::hours(DEFAULT_LONG_DAYS * 24))).abs() < tolerance
        );
        Ok(())
    }

    #[tokio::test]
    async fn rotation_preserves_owner_and_expiry() -> Result<(), AuthError> {
        let store = store();
        let owner = Uuid::new_v4();

        let issued = store.issue(owner, false).await?;
        let old = store.peek(issued.id).await?;
        let rotated = store.rotate(issued.id).await?;

        let new_record = store.peek(rotated.id).await?;
        assert_eq!(new_record.owner_id, owner);
        assert_eq!(new_record.expires_at, old.expires_at);
        assert_ne!(rotated.raw_secret, issued.raw_secret);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_is_single_use() -> Result<(), AuthError> {
        let store = store();
        let issued = store.issue(Uuid::new_v4(), false).await?;

        store.rotate(issued.id).await?;

        // Replay of the revoked record is rejected, and the old record now
        // points at its successor.
        let err = store.rotate(issued.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(msg) if msg.contains("already revoked")));

        let old = store.peek(issued.id).await?;
        assert!(old.revoked_at.is_some());
        assert!(old.replaced_by_token_id.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn rotating_unknown_record_is_not_found() {
        let err = store().rotate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotating_expired_record_is_forbidden() -> Result<(), AuthError> {
        let hasher = PasswordHasher::new(&HashSetting::Cost(4)).expect("valid cost");
        let ttl = RefreshTtl {
            short_hours: -1,
            long_days: DEFAULT_LONG_DAYS,
        };
        let store = RefreshTokenStore::new(MemoryRefreshRepo::default(), hasher, ttl);

        let issued = store.issue(Uuid::new_v4(), true).await?;
        let err = store.rotate(issued.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(msg) if msg.contains("expired")));
        Ok(())
    }

    #[tokio::test]
    async fn failed_replace_leaves_original_untouched() -> Result<(), AuthError> {
        let store = store();
        let issued = store.issue(Uuid::new_v4(), false).await?;

        store.repo().fail_next_replace();
        let err = store.rotate(issued.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        let record = store.peek(issued.id).await?;
        assert!(record.revoked_at.is_none());
        assert!(record.replaced_by_token_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_rotations_yield_one_winner() -> Result<(), AuthError> {
        let store = std::sync::Arc::new(store());
        let issued = store.issue(Uuid::new_v4(), false).await?;

        let first = tokio::spawn({
            let store = store.clone();
            let id = issued.id;
            async move { store.rotate(id).await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            let id = issued.id;
            async move { store.rotate(id).await }
        });

        let outcomes = [
            first.await.expect("task joins"),
            second.await.expect("task joins"),
        ];
        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(winners, 1);
        Ok(())
    }
}
