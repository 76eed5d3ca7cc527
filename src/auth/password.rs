//! Argon2 password hashing.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, error, instrument};

use super::AuthError;

/// Hashes a plain-text password into a PHC string.
#[instrument(skip(password))]
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    if password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "Argon2 password hashing failed");
            AuthError::InternalError("Password hashing failed".to_string())
        })
}

/// Returns `Ok(false)` on mismatch; a malformed stored hash is an internal error.
#[instrument(skip_all)]
pub fn verify_password(stored_hash: &str, provided: &str) -> Result<bool, AuthError> {
    if provided.is_empty() {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!(error = %e, "Stored password hash is malformed");
        AuthError::InternalError("Invalid stored password hash".to_string())
    })?;

    match Argon2::default().verify_password(provided.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => {
            debug!("Password mismatch");
            Ok(false)
        }
        Err(e) => {
            error!(error = %e, "Argon2 password verification failed");
            Err(AuthError::InternalError(
                "Password verification failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "correct horse battery staple").unwrap());
        assert!(!verify_password(&hash, "wrong").unwrap());
        assert!(!verify_password(&hash, "").unwrap());
    }

    #[test]
    fn malformed_hash_is_internal_error() {
        assert!(matches!(
            verify_password("not-a-hash", "secret"),
            Err(AuthError::InternalError(_))
        ));
    }

    #[test]
    fn empty_password_cannot_be_hashed() {
        assert!(hash_password("").is_err());
    }
}
