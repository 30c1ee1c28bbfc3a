use secrecy::SecretString;

use crate::auth::password::HashSetting;
use crate::auth::refresh::RefreshTtl;

/// Security settings threaded from the CLI into the server. Business logic
/// receives these by reference; nothing reads the environment directly.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: SecretString,
    pub hash_setting: HashSetting,
    pub access_ttl_minutes: i64,
    pub refresh_ttl: RefreshTtl,
    pub frontend_url: String,
}
