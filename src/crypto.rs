//! Cryptogragic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

/// Length of the code embedded in confirmation links.
pub const CONFIRMATION_CODE_LENGTH: usize = 32;
const SESSION_TOKEN_BYTES: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// Any malformed hash counts as a mismatch.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// Generate a confirmation code made of ASCII letters and digits.
pub fn confirmation_code() -> String {
    Alphanumeric.sample_string(&mut OsRng, CONFIRMATION_CODE_LENGTH)
}

/// Generate an opaque session token, hex encoded.
pub fn session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_manager() -> PasswordManager {
        PasswordManager::new(Some(ArgonConfig {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap()
    }

    #[test]
    fn test_argon2() {
        let pwd = fast_manager();

        let hash = pwd.hash_password("P$soW%920$n&").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("P$soW%920$n&", &hash));
        assert!(!pwd.verify_password("P$soW%920$n", &hash));
        assert!(!pwd.verify_password("P$soW%920$n&", "not a phc string"));
    }

    #[test]
    fn test_salt_is_random() {
        let pwd = fast_manager();

        assert_ne!(
            pwd.hash_password("password").unwrap(),
            pwd.hash_password("password").unwrap()
        );
    }

    #[test]
    fn test_invalid_params() {
        let config = ArgonConfig {
            hash_length: 1,
            ..Default::default()
        };
        assert!(PasswordManager::new(Some(config)).is_err());
    }

    #[test]
    fn test_confirmation_code() {
        let code = confirmation_code();
        assert_eq!(code.len(), CONFIRMATION_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, confirmation_code());
    }

    #[test]
    fn test_session_token() {
        let token = session_token();
        assert_eq!(token.len(), SESSION_TOKEN_BYTES * 2);
        assert!(hex::decode(&token).is_ok());
    }
}
