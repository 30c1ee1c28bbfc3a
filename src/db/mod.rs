//! Database pool setup and the shared persistence-error translator.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::auth::error::AuthError;

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Connect to Postgres with the service pool settings.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Translate a raw persistence error into the shared error taxonomy.
///
/// Every data-access module maps through here so transports see one
/// vocabulary: missing row on a point lookup is `NotFound`, a unique
/// constraint hit is `Conflict`, a dangling foreign key is `BadRequest`,
/// anything else is an internal fault. Messages embed the model name and
/// the identifying field for the failing statement.
#[must_use]
pub fn classify(err: sqlx::Error, model: &str, ident: &str) -> AuthError {
    match err {
        sqlx::Error::RowNotFound => AuthError::NotFound(format!("{model} {ident} not found")),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|code| code.into_owned());
            match code.as_deref() {
                Some(SQLSTATE_UNIQUE_VIOLATION) => {
                    AuthError::Conflict(format!("{model} {ident} already exists"))
                }
                Some(SQLSTATE_FOREIGN_KEY_VIOLATION) => {
                    AuthError::BadRequest(format!("{model} {ident} references a missing record"))
                }
                _ => AuthError::Internal(
                    anyhow::Error::new(sqlx::Error::Database(db_err))
                        .context(format!("failed to access {model} {ident}")),
                ),
            }
        }
        other => AuthError::Internal(
            anyhow::Error::new(other).context(format!("failed to access {model} {ident}")),
        ),
    }
}
