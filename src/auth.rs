//! Password hashing and caller identity.
//!
//! Services never look at request state directly. They receive a
//! [`CurrentUserProvider`] and ask it for the caller, which keeps them usable
//! from the HTTP layer, the CLI and tests alike.

use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use rusqlite::Connection;

use crate::model::User;
use crate::ops;

// Argon2id at m=19 MiB, t=2, p=1: comparable work to bcrypt at cost 12.
const MEMORY_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials supplied")]
    MissingCredentials,
    #[error("malformed authorization header")]
    Malformed,
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("wrong password for '{0}'")]
    BadPassword(String),
}

/// Source of the authenticated caller for a single operation.
pub trait CurrentUserProvider {
    fn current_user(&self) -> Result<User>;
}

/// A caller whose credentials have already been checked.
#[derive(Debug, Clone)]
pub struct Authenticated(pub User);

impl CurrentUserProvider for Authenticated {
    fn current_user(&self) -> Result<User> {
        Ok(self.0.clone())
    }
}

/// A caller with no principal at all.
#[derive(Debug, Clone, Copy)]
pub struct Anonymous;

impl CurrentUserProvider for Anonymous {
    fn current_user(&self) -> Result<User> {
        Err(AuthError::MissingCredentials.into())
    }
}

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, None)
        .map_err(|e| anyhow!("invalid argon2 parameters: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a plaintext password into a self-describing PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!("bad salt: {e}"))?;
    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string. A mismatch is `Ok(false)`;
/// only an unparseable hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("stored hash is invalid: {e}"))?;
    Ok(hasher()?
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Parse an `Authorization: Basic <base64(user:pass)>` header value.
pub fn parse_basic(header: Option<&str>) -> Result<Credentials, AuthError> {
    let header = header.ok_or(AuthError::MissingCredentials)?;
    let (scheme, encoded) = header.trim().split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::Malformed);
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
    let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
    if username.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Find the account the credentials name.
///
/// The lookup shares the store's substring matching, so the account checked
/// is the first one whose name contains the supplied username.
pub fn lookup(conn: &Connection, creds: &Credentials) -> Result<User> {
    let user = ops::find_user_by_username(conn, &creds.username)?
        .ok_or_else(|| AuthError::UnknownUser(creds.username.clone()))?;
    Ok(user)
}

/// Verify the supplied password against `user`. Needs no connection, so
/// callers can release the database before paying for the hash.
pub fn check_password(user: User, creds: &Credentials) -> Result<User> {
    if !verify_password(&creds.password, &user.password)? {
        return Err(AuthError::BadPassword(creds.username.clone()).into());
    }
    Ok(user)
}
