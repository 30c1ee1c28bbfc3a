//! Password hashing with bcrypt.
//!
//! The work factor comes from configuration and has no fallback: a missing
//! or invalid setting fails at startup, not silently with a weak default.
//! A fixed salt can be configured instead of a cost for deterministic
//! hashing, mainly useful in tests.

use anyhow::{Context, Result, ensure};
use base64ct::{Base64, Encoding};
use bcrypt::Version;

const SALT_LEN: usize = 16;
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// Work-factor setting: a numeric bcrypt cost, or a base64 encoded fixed
/// 16-byte salt paired with the default cost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashSetting {
    Cost(u32),
    Salt(String),
}

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    cost: u32,
    salt: Option<[u8; SALT_LEN]>,
}

impl PasswordHasher {
    /// Build a hasher from the configured setting.
    ///
    /// # Errors
    /// Returns an error if the cost is outside the bcrypt range or the salt
    /// does not decode to 16 bytes.
    pub fn new(setting: &HashSetting) -> Result<Self> {
        match setting {
            HashSetting::Cost(cost) => {
                ensure!(
                    (MIN_COST..=MAX_COST).contains(cost),
                    "bcrypt cost {cost} outside valid range {MIN_COST}..={MAX_COST}"
                );
                Ok(Self {
                    cost: *cost,
                    salt: None,
                })
            }
            HashSetting::Salt(encoded) => {
                let bytes = Base64::decode_vec(encoded)
                    .map_err(|err| anyhow::anyhow!("fixed salt is not valid base64: {err}"))?;
                let salt: [u8; SALT_LEN] = bytes
                    .as_slice()
                    .try_into()
                    .context("fixed salt must decode to 16 bytes")?;
                Ok(Self {
                    cost: bcrypt::DEFAULT_COST,
                    salt: Some(salt),
                })
            }
        }
    }

    /// One-way hash of a plaintext credential.
    ///
    /// # Errors
    /// Returns an error on bcrypt failure; callers wrap it as an internal fault.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let digest = match self.salt {
            Some(salt) => bcrypt::hash_with_salt(plaintext, self.cost, salt)
                .map(|parts| parts.format_for_version(Version::TwoB)),
            None => bcrypt::hash(plaintext, self.cost),
        }
        .context("failed to hash credential")?;
        Ok(digest)
    }

    /// Verify a plaintext against a stored digest. Comparison happens inside
    /// bcrypt in constant time.
    ///
    /// # Errors
    /// Returns an error if the digest is not a parseable bcrypt string.
    pub fn verify(&self, plaintext: &str, digest: &str) -> Result<bool> {
        bcrypt::verify(plaintext, digest).context("failed to verify credential")
    }
}
