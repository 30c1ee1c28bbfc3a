//! In-memory doubles for the persistence seams, test-only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::refresh::{NewRefreshToken, RefreshTokenRecord, RefreshTokenRepo, ReplaceError};
use crate::users::{
    NewUser, ProviderLink, Provider, User, UserDirectory, UserWithProviders, capitalize,
    normalize_email,
};

#[derive(Default)]
pub(crate) struct MemoryRefreshRepo {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
    fail_next_replace: AtomicBool,
}

impl MemoryRefreshRepo {
    /// Make the next `replace` fail after nothing has been written, as a
    /// rolled-back transaction would.
    pub(crate) fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }
}

impl RefreshTokenRepo for MemoryRefreshRepo {
    async fn insert(&self, token: NewRefreshToken) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.records.lock().await.insert(
            id,
            RefreshTokenRecord {
                id,
                token_hash: token.token_hash,
                owner_id: token.owner_id,
                expires_at: token.expires_at,
                revoked_at: None,
                replaced_by_token_id: None,
            },
        );
        Ok(id)
    }

    async fn find(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn replace(&self, old_id: Uuid, successor: NewRefreshToken) -> Result<Uuid, ReplaceError> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            return Err(ReplaceError::Store(anyhow!("injected replace failure")));
        }

        let mut records = self.records.lock().await;
        match records.get(&old_id) {
            None => return Err(ReplaceError::NotFound),
            Some(record) if record.revoked_at.is_some() => {
                return Err(ReplaceError::AlreadyRevoked);
            }
            Some(_) => {}
        }

        let new_id = Uuid::new_v4();
        records.insert(
            new_id,
            RefreshTokenRecord {
                id: new_id,
                token_hash: successor.token_hash,
                owner_id: successor.owner_id,
                expires_at: successor.expires_at,
                revoked_at: None,
                replaced_by_token_id: None,
            },
        );
        let old = records.get_mut(&old_id).expect("checked above");
        old.revoked_at = Some(Utc::now());
        old.replaced_by_token_id = Some(new_id);

        Ok(new_id)
    }
}

struct StoredUser {
    user: User,
    password_hash: String,
    links: Vec<ProviderLink>,
}

#[derive(Default)]
pub(crate) struct MemoryDirectory {
    users: Mutex<Vec<StoredUser>>,
}

impl MemoryDirectory {
    pub(crate) async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    pub(crate) async fn link_count(&self, email: &str) -> usize {
        let email = normalize_email(email);
        self.users
            .lock()
            .await
            .iter()
            .find(|stored| stored.user.email == email)
            .map_or(0, |stored| stored.links.len())
    }
}

impl UserDirectory for MemoryDirectory {
    async fn create(&self, new_user: NewUser) -> Result<User, AuthError> {
        let email = normalize_email(&new_user.email);
        let mut users = self.users.lock().await;
        if users.iter().any(|stored| stored.user.email == email) {
            return Err(AuthError::Conflict(format!("User {email} already exists")));
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            first_name: capitalize(&new_user.first_name),
            last_name: capitalize(&new_user.last_name),
            role: new_user.role,
        };
        users.push(StoredUser {
            user: user.clone(),
            password_hash: new_user.password_hash,
            links: vec![ProviderLink {
                provider: new_user.provider,
                provider_id: new_user.provider_id,
            }],
        });
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|stored| stored.user.id == id)
            .map(|stored| stored.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let email = normalize_email(email);
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|stored| stored.user.email == email)
            .map(|stored| stored.user.clone()))
    }

    async fn find_by_email_with_password(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, AuthError> {
        let email = normalize_email(email);
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|stored| stored.user.email == email)
            .map(|stored| (stored.user.clone(), stored.password_hash.clone())))
    }

    async fn find_with_providers(&self, email: &str) -> Result<Option<UserWithProviders>, AuthError> {
        let email = normalize_email(email);
        Ok(self
            .users
            .lock()
            .await
            .iter()
            .find(|stored| stored.user.email == email)
            .map(|stored| UserWithProviders {
                user: stored.user.clone(),
                links: stored.links.clone(),
            }))
    }

    async fn add_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<(), AuthError> {
        let mut users = self.users.lock().await;
        let stored = users
            .iter_mut()
            .find(|stored| stored.user.id == user_id)
            .ok_or_else(|| AuthError::NotFound(format!("User {user_id} not found")))?;
        stored.links.push(ProviderLink {
            provider,
            provider_id: provider_id.to_string(),
        });
        Ok(())
    }
}
