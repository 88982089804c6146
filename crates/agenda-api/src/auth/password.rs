/// Credential validation and password hashing
///
/// Passwords are hashed with Argon2id; the PHC string (algorithm,
/// parameters and salt included) is what gets persisted.
use agenda_core::AuthConfig;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use thiserror::Error;
use validator::ValidateEmail;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2 cost parameters
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Iterations (default: 3)
    pub time_cost: u32,
    /// Lanes (default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl From<&AuthConfig> for PasswordConfig {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            memory_cost: auth.hash_memory_kib,
            time_cost: auth.hash_iterations,
            parallelism: auth.hash_parallelism,
            ..Self::default()
        }
    }
}

impl PasswordConfig {
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a plaintext password with the given Argon2id parameters
///
/// # Example
///
/// ```no_run
/// use agenda_api::auth::password::{hash_password, verify_password, PasswordConfig};
///
/// let hash = hash_password("SecureP@ssw0rd!", &PasswordConfig::default()).unwrap();
/// assert!(verify_password("SecureP@ssw0rd!", &hash).unwrap());
/// ```
pub fn hash_password(password: &str, config: &PasswordConfig) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = config.to_params()?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash
///
/// Returns `Ok(false)` on mismatch; errors are reserved for malformed hashes.
/// Cost parameters are read from the hash itself.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// Validate registration credentials
///
/// Rules are checked in a fixed order and the first failure is reported:
/// email shape, then password length, uppercase, lowercase, digit and
/// special character.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), String> {
    if !email.to_string().validate_email() {
        return Err("Invalid email format".to_string());
    }

    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }

    if !password.chars().any(|c| c.is_lowercase()) {
        return Err("Password must contain at least one lowercase letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_string());
    }

    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err("Password must contain at least one special character".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep hashing cheap in unit tests
    fn light() -> PasswordConfig {
        PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let password = "SecureP@ssw0rd!";
        let hash = hash_password(password, &light()).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("WrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_same_password_produces_different_hashes() {
        let password = "SamePassword123!";

        let hash1 = hash_password(password, &light()).unwrap();
        let hash2 = hash_password(password, &light()).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password(password, &hash1).unwrap());
        assert!(verify_password(password, &hash2).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let result = verify_password("password", "invalid-hash-format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[test]
    fn test_hash_carries_parameters() {
        let hash = hash_password("TestPassword123!", &light()).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=1024"));
        assert!(hash.contains("t=1"));
        assert!(hash.contains("p=1"));
    }

    #[test]
    fn test_config_from_auth_config() {
        let mut auth = AuthConfig::default();
        auth.hash_memory_kib = 2048;
        auth.hash_iterations = 2;
        auth.hash_parallelism = 1;

        let config = PasswordConfig::from(&auth);
        assert_eq!(config.memory_cost, 2048);
        assert_eq!(config.time_cost, 2);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.output_len, Some(32));
    }

    #[test]
    fn test_valid_credentials() {
        assert!(validate_credentials("user@example.com", "SecureP@ssw0rd!").is_ok());
        assert!(validate_credentials("a.b@sub.example.org", "Abcdef1!").is_ok());
    }

    #[test]
    fn test_each_rule_reports_its_message() {
        let cases = [
            ("not-an-email", "SecureP@ssw0rd!", "Invalid email format"),
            (
                "user@example.com",
                "Ab1!",
                "Password must be at least 8 characters long",
            ),
            (
                "user@example.com",
                "password1!",
                "Password must contain at least one uppercase letter",
            ),
            (
                "user@example.com",
                "PASSWORD1!",
                "Password must contain at least one lowercase letter",
            ),
            (
                "user@example.com",
                "Password!!",
                "Password must contain at least one number",
            ),
            (
                "user@example.com",
                "Password12",
                "Password must contain at least one special character",
            ),
        ];

        for (email, password, expected) in cases {
            assert_eq!(
                validate_credentials(email, password).unwrap_err(),
                expected,
                "email={email} password={password}"
            );
        }
    }

    #[test]
    fn test_first_failing_rule_wins() {
        // Bad email and weak password: email rule comes first
        assert_eq!(
            validate_credentials("nope", "x").unwrap_err(),
            "Invalid email format"
        );
        // Short and missing everything else: length comes first
        assert_eq!(
            validate_credentials("user@example.com", "abc").unwrap_err(),
            "Password must be at least 8 characters long"
        );
        // Lacks lowercase, digit and special: lowercase reported
        assert_eq!(
            validate_credentials("user@example.com", "ABCDEFGH").unwrap_err(),
            "Password must contain at least one lowercase letter"
        );
    }
}
