//! Credential hashing
use crate::{
    config::HashingConfig,
    error::{AdminError, AdminResult},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// One-way password hashing used at registration and login
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> AdminResult<String>;
    fn verify(&self, plaintext: &str, hash: &str) -> AdminResult<bool>;
}

/// Argon2id hasher producing PHC strings
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(config: &HashingConfig) -> AdminResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AdminError::InvalidArgument(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> AdminResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| AdminError::Internal(format!("Password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    fn verify(&self, plaintext: &str, hash: &str) -> AdminResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AdminError::Internal(format!("Stored password hash is malformed: {}", e)))?;

        // Parameters come from the PHC string, not from our config
        match self.argon2().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AdminError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Argon2Hasher {
    Argon2Hasher::new(&HashingConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}
