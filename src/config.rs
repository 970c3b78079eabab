//! Configuration management for Practicum Admin
use crate::error::{AdminError, AdminResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest key body accepted by `validate`
pub const MIN_KEY_BODY_LENGTH: usize = 7;

/// Longest key body accepted by `validate` and by registration
pub const MAX_KEY_BODY_LENGTH: usize = 64;

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub keys: KeyConfig,
    pub access: AccessConfig,
    pub requests: RequestConfig,
    pub hashing: HashingConfig,
    pub jobs: JobConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8080,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub max_connections: u32,
    /// Upper bound on a single blocking statement, in seconds
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_directory = PathBuf::from("./data");
        Self {
            database: data_directory.join("practicum.sqlite"),
            data_directory,
            max_connections: 10,
            busy_timeout_secs: 5,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lifetime of an issued session token, in seconds
    pub token_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 3600,
        }
    }
}

/// Registration key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub body_length: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { body_length: 12 }
    }
}

/// Access mediator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Require object and action to match on the same permission row
    pub strict_pairs: bool,
}

/// Per-request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        // argon2 crate defaults (OWASP minimum for Argon2id)
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Exhausted key sweep interval in seconds, 0 disables the job
    pub key_sweep_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            key_sweep_interval_secs: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "practicum_admin=debug,tower_http=debug".to_string(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AdminResult<Self> {
        dotenv::dotenv().ok();

        let defaults = ServerConfig::default();

        let hostname =
            env::var("PRACTICUM_HOSTNAME").unwrap_or_else(|_| defaults.service.hostname.clone());
        let port = match env::var("PRACTICUM_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AdminError::InvalidArgument("Invalid port number".to_string()))?,
            Err(_) => defaults.service.port,
        };
        let version =
            env::var("PRACTICUM_VERSION").unwrap_or_else(|_| defaults.service.version.clone());

        let data_directory: PathBuf = env::var("PRACTICUM_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("PRACTICUM_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("practicum.sqlite"));
        let max_connections = env::var("PRACTICUM_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.storage.max_connections);
        let busy_timeout_secs = env::var("PRACTICUM_DB_BUSY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.storage.busy_timeout_secs);

        let jwt_secret = env::var("PRACTICUM_JWT_SECRET")
            .map_err(|_| AdminError::InvalidArgument("JWT secret required".to_string()))?;
        let token_ttl_secs = env::var("PRACTICUM_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.authentication.token_ttl_secs);

        let body_length = env::var("PRACTICUM_KEY_BODY_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.keys.body_length);

        let strict_pairs = env::var("PRACTICUM_ACCESS_STRICT_PAIRS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let timeout_ms = env::var("PRACTICUM_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.requests.timeout_ms);

        let memory_kib = env::var("PRACTICUM_HASH_MEMORY_KIB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hashing.memory_kib);
        let iterations = env::var("PRACTICUM_HASH_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hashing.iterations);
        let parallelism = env::var("PRACTICUM_HASH_PARALLELISM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hashing.parallelism);

        let key_sweep_interval_secs = env::var("PRACTICUM_KEY_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.jobs.key_sweep_interval_secs);

        let level = env::var("RUST_LOG").unwrap_or_else(|_| defaults.logging.level.clone());
        let json = env::var("PRACTICUM_LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
                max_connections,
                busy_timeout_secs,
            },
            authentication: AuthConfig {
                jwt_secret,
                token_ttl_secs,
            },
            keys: KeyConfig { body_length },
            access: AccessConfig { strict_pairs },
            requests: RequestConfig { timeout_ms },
            hashing: HashingConfig {
                memory_kib,
                iterations,
                parallelism,
            },
            jobs: JobConfig {
                key_sweep_interval_secs,
            },
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AdminResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AdminError::InvalidArgument(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(AdminError::InvalidArgument(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if !(MIN_KEY_BODY_LENGTH..=MAX_KEY_BODY_LENGTH).contains(&self.keys.body_length) {
            return Err(AdminError::InvalidArgument(format!(
                "Key body length must be between {} and {}",
                MIN_KEY_BODY_LENGTH, MAX_KEY_BODY_LENGTH
            )));
        }

        if self.requests.timeout_ms == 0 {
            return Err(AdminError::InvalidArgument(
                "Request timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
