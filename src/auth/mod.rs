//! Authentication and session lifecycle.
//!
//! Password hashing, stateless access tokens, persisted refresh tokens with
//! single-use rotation, the session manager tying them together, and the
//! route authorization gate.

pub mod error;
pub mod gate;
pub mod password;
pub mod refresh;
pub mod session;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

use uuid::Uuid;

use crate::users::{Role, User};

/// Authenticated identity attached to a request after the gate admits it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}
