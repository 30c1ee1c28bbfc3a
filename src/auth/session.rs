//! Session manager: orchestrates the hasher, token codec, refresh store,
//! and user directory into the login/signup/rotation flows.
//!
//! Per-session state machine over the refresh record: ACTIVE -> ROTATED,
//! terminal. Expiry is checked lazily at use time; nothing sweeps expired
//! records in the background.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

use crate::auth::Principal;
use crate::auth::error::AuthError;
use crate::auth::password::PasswordHasher;
use crate::auth::refresh::{RefreshTokenRepo, RefreshTokenStore};
use crate::auth::token::TokenCodec;
use crate::users::{NewUser, Provider, Role, User, UserDirectory};

/// Access + refresh credentials returned by login, signup, and rotation.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
}

/// Signup input, already shape-validated at the transport edge.
#[derive(Clone, Debug)]
pub struct SignupProfile {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Identity asserted by a federated provider, as extracted from its
/// callback. The provider handshake itself happens upstream.
#[derive(Clone, Debug)]
pub struct ProvidedProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub provider: Provider,
    pub provider_id: String,
}

pub struct SessionManager<R, D> {
    codec: TokenCodec,
    hasher: PasswordHasher,
    refresh: RefreshTokenStore<R>,
    directory: D,
}

impl<R: RefreshTokenRepo, D: UserDirectory> SessionManager<R, D> {
    pub const fn new(
        codec: TokenCodec,
        hasher: PasswordHasher,
        refresh: RefreshTokenStore<R>,
        directory: D,
    ) -> Self {
        Self {
            codec,
            hasher,
            refresh,
            directory,
        }
    }

    pub const fn directory(&self) -> &D {
        &self.directory
    }

    /// Register a local account and issue its first token pair.
    ///
    /// New accounts always get the default role and the local provider. A
    /// duplicate email surfaces as `Conflict` from the directory.
    pub async fn sign_up(&self, profile: SignupProfile) -> Result<TokenPair, AuthError> {
        let password_hash = self
            .hasher
            .hash(&profile.password)
            .context("failed to hash password")?;

        let user = self
            .directory
            .create(NewUser {
                email: profile.email,
                first_name: profile.first_name,
                last_name: profile.last_name,
                password_hash,
                role: Role::User,
                provider: Provider::Local,
                provider_id: Provider::Local.as_str().to_string(),
            })
            .await?;

        self.issue_pair(Principal::from(&user), false).await
    }

    /// Issue a token pair for an already-authenticated principal.
    pub async fn login(
        &self,
        principal: Principal,
        remember_me: bool,
    ) -> Result<TokenPair, AuthError> {
        self.issue_pair(principal, remember_me).await
    }

    /// Check an email/password pair against the directory.
    ///
    /// Returns `None` on unknown email or wrong password; the caller decides
    /// how to surface the miss. Never logs or stores the plaintext.
    pub async fn validate_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let Some((user, password_hash)) = self.directory.find_by_email_with_password(email).await?
        else {
            return Ok(None);
        };

        let matches = self
            .hasher
            .verify(password, &password_hash)
            .context("failed to verify password")?;

        Ok(matches.then_some(user))
    }

    /// Find-or-create flow for a federated identity.
    ///
    /// An unknown email provisions a local account with a random unusable
    /// password; a known email gets the new provider linked to it, so one
    /// account can carry several federated identities.
    pub async fn validate_provided_identity(
        &self,
        profile: ProvidedProfile,
    ) -> Result<User, AuthError> {
        let existing = self.directory.find_with_providers(&profile.email).await?;

        let Some(existing) = existing else {
            let password_hash = self
                .hasher
                .hash(&random_unusable_password()?)
                .context("failed to hash generated password")?;
            let user = self
                .directory
                .create(NewUser {
                    email: profile.email,
                    first_name: profile.first_name,
                    last_name: profile.last_name,
                    password_hash,
                    role: Role::User,
                    provider: profile.provider,
                    provider_id: profile.provider_id,
                })
                .await?;
            return Ok(user);
        };

        let already_linked = existing
            .links
            .iter()
            .any(|link| link.provider == profile.provider && link.provider_id == profile.provider_id);
        if !already_linked {
            self.directory
                .add_provider_link(existing.user.id, profile.provider, &profile.provider_id)
                .await?;
        }

        Ok(existing.user)
    }

    /// Exchange a refresh token for a fresh pair.
    ///
    /// Two independent checks run concurrently: the presented secret is
    /// verified and a new access token minted, while the refresh record is
    /// rotated. Both must succeed; no partial pair is ever returned.
    pub async fn rotate_tokens(
        &self,
        old_refresh_token: &str,
        old_record_id: Uuid,
    ) -> Result<TokenPair, AuthError> {
        let (access_token, rotated) = tokio::try_join!(
            self.refresh_access_token(old_record_id, old_refresh_token),
            self.refresh.rotate(old_record_id),
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token: rotated.raw_secret,
            refresh_token_id: rotated.id,
        })
    }

    /// Best-effort resolution of the user a token claims to belong to.
    ///
    /// Uses the unverified decode; suitable only for attaching a display
    /// identity to an already-issued pair, never for authorization.
    pub async fn principal_from_token(&self, access_token: &str) -> Option<User> {
        let claims = self.codec.decode_unverified(access_token)?;
        self.directory.find_by_id(claims.sub).await.ok().flatten()
    }

    async fn refresh_access_token(
        &self,
        record_id: Uuid,
        presented: &str,
    ) -> Result<String, AuthError> {
        let record = self.refresh.peek(record_id).await?;

        if !self.refresh.verify_secret(&record, presented)? {
            return Err(AuthError::Unauthenticated(
                "refresh tokens do not match".to_string(),
            ));
        }

        let user = self
            .directory
            .find_by_id(record.owner_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("User {} not found", record.owner_id)))?;

        Ok(self
            .codec
            .sign(user.id, user.role)
            .context("failed to sign access token")?)
    }

    async fn issue_pair(
        &self,
        principal: Principal,
        remember_me: bool,
    ) -> Result<TokenPair, AuthError> {
        // Access minting and refresh persistence are independent.
        let (access_token, refresh) = tokio::try_join!(
            async {
                self.codec
                    .sign(principal.id, principal.role)
                    .context("failed to sign access token")
                    .map_err(AuthError::Internal)
            },
            self.refresh.issue(principal.id, !remember_me),
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.raw_secret,
            refresh_token_id: refresh.id,
        })
    }
}

/// Random password for auto-provisioned federated accounts. Never shown to
/// anyone; such accounts have no password login path unless a reset flow is
/// layered on separately.
fn random_unusable_password() -> Result<String, AuthError> {
    let mut bytes = [0u8; 64];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate account password")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::HashSetting;
    use crate::auth::refresh::RefreshTtl;
    use crate::auth::testing::{MemoryDirectory, MemoryRefreshRepo};
    use secrecy::SecretString;

    type TestSessions = SessionManager<MemoryRefreshRepo, MemoryDirectory>;

    fn sessions() -> TestSessions {
        let hasher = PasswordHasher::new(&HashSetting::Cost(4)).expect("valid cost");
        let codec = TokenCodec::new(SecretString::from("test-secret"), 5);
        let refresh = RefreshTokenStore::new(
            MemoryRefreshRepo::default(),
            hasher.clone(),
            RefreshTtl::default(),
        );
        SessionManager::new(codec, hasher, refresh, MemoryDirectory::default())
    }

    fn signup_profile() -> SignupProfile {
        SignupProfile {
            email: "a@x.com".to_string(),
            password: "Password12#".to_string(),
            first_name: "ann".to_string(),
            last_name: "lee".to_string(),
        }
    }

    fn google_profile() -> ProvidedProfile {
        ProvidedProfile {
            email: "ann@gmail.com".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            provider: Provider::Google,
            provider_id: "google-123".to_string(),
        }
    }

    #[tokio::test]
    async fn signup_issues_pair_with_default_role() -> Result<(), AuthError> {
        let sessions = sessions();
        let pair = sessions.sign_up(signup_profile()).await?;

        let user = sessions
            .principal_from_token(&pair.access_token)
            .await
            .expect("token resolves to the new user");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.first_name, "Ann");
        assert_eq!(user.role, Role::User);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() -> Result<(), AuthError> {
        let sessions = sessions();
        sessions.sign_up(signup_profile()).await?;

        let mut again = signup_profile();
        again.email = "A@X.com".to_string();
        let err = sessions.sign_up(again).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
        Ok(())
    }

    #[tokio::test]
    async fn credential_validation_requires_matching_password() -> Result<(), AuthError> {
        let sessions = sessions();
        sessions.sign_up(signup_profile()).await?;

        assert!(
            sessions
                .validate_credentials("a@x.com", "wrong-password")
                .await?
                .is_none()
        );
        assert!(
            sessions
                .validate_credentials("missing@x.com", "Password12#")
                .await?
                .is_none()
        );

        let user = sessions
            .validate_credentials("A@x.COM", "Password12#")
            .await?
            .expect("correct credentials validate, case-insensitive email");
        assert_eq!(user.email, "a@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn login_pair_embeds_principal() -> Result<(), AuthError> {
        let sessions = sessions();
        sessions.sign_up(signup_profile()).await?;
        let user = sessions
            .validate_credentials("a@x.com", "Password12#")
            .await?
            .expect("valid credentials");

        let pair = sessions.login(Principal::from(&user), true).await?;
        let resolved = sessions
            .principal_from_token(&pair.access_token)
            .await
            .expect("resolves");
        assert_eq!(resolved.id, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_returns_new_pair_and_revokes_old() -> Result<(), AuthError> {
        let sessions = sessions();
        let pair = sessions.sign_up(signup_profile()).await?;

        let rotated = sessions
            .rotate_tokens(&pair.refresh_token, pair.refresh_token_id)
            .await?;
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_ne!(rotated.refresh_token_id, pair.refresh_token_id);

        // Replay of the original token is caught.
        let err = sessions
            .rotate_tokens(&pair.refresh_token, pair.refresh_token_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_rejects_mismatched_secret() -> Result<(), AuthError> {
        let sessions = sessions();
        let pair = sessions.sign_up(signup_profile()).await?;

        let err = sessions
            .rotate_tokens("not-the-secret", pair.refresh_token_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_of_unknown_record_is_not_found() {
        let err = sessions()
            .rotate_tokens("secret", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn federated_login_provisions_once() -> Result<(), AuthError> {
        let sessions = sessions();

        let first = sessions.validate_provided_identity(google_profile()).await?;
        assert_eq!(sessions.directory().user_count().await, 1);
        assert_eq!(sessions.directory().link_count("ann@gmail.com").await, 1);

        // Same provider identity again: same user, no duplicate link.
        let second = sessions.validate_provided_identity(google_profile()).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(sessions.directory().user_count().await, 1);
        assert_eq!(sessions.directory().link_count("ann@gmail.com").await, 1);

        // Provisioned accounts have no usable password.
        assert!(
            sessions
                .validate_credentials("ann@gmail.com", "Password12#")
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn federated_login_links_existing_account() -> Result<(), AuthError> {
        let sessions = sessions();
        let mut profile = signup_profile();
        profile.email = "ann@gmail.com".to_string();
        sessions.sign_up(profile).await?;

        let user = sessions.validate_provided_identity(google_profile()).await?;
        assert_eq!(sessions.directory().user_count().await, 1);
        assert_eq!(sessions.directory().link_count("ann@gmail.com").await, 2);
        assert_eq!(user.email, "ann@gmail.com");
        Ok(())
    }

    #[tokio::test]
    async fn principal_from_token_is_best_effort() -> Result<(), AuthError> {
        let sessions = sessions();
        assert!(sessions.principal_from_token("garbage").await.is_none());

        let pair = sessions.sign_up(signup_profile()).await?;
        assert!(
            sessions
                .principal_from_token(&pair.access_token)
                .await
                .is_some()
        );
        Ok(())
    }
}
