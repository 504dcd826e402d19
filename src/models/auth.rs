use serde::{Deserialize, Serialize};

use super::user::UserRole;

/// Claims embedded in the session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // normalised email
    pub name: String,
    pub role: UserRole,
    /// Session epoch of the user when the token was issued.
    #[serde(default)]
    pub epoch: u64,
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from the validated JWT, available via Axum extractors
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub email: String,
    pub name: String,
    /// Role at issue time. Admin-only routes re-read the stored role.
    pub role: UserRole,
    pub epoch: u64,
}
