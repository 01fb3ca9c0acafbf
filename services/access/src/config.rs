//! Access service configuration

use chrono::TimeDelta;
use std::{env, str::FromStr, time::Duration};

use crate::{
    error::ConfigError,
    keys::{KeyMaterial, KeyRing, RemoteKeyPolicy, parse_version},
};

/// Configuration of the token lifecycle and scan pipeline
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Static key ring: current fallback key plus retired keys
    pub key_ring: KeyRing,
    /// Lifetime of an issued token
    pub validity_window: TimeDelta,
    /// How far in the future an issuance time may lie
    pub clock_skew: TimeDelta,
    /// Redis key holding the remote override
    pub remote_key_name: String,
    pub remote_key_policy: RemoteKeyPolicy,
    /// Budget for one `process_scan` call
    pub scan_timeout: Duration,
    /// Compare-and-set attempts before reporting a conflict
    pub max_commit_attempts: u32,
}

impl AccessConfig {
    /// Create a new AccessConfig from environment variables
    ///
    /// # Environment Variables
    /// - `ACCESS_TOKEN_KEY`: base64 32 byte static key (required)
    /// - `ACCESS_TOKEN_KEY_VERSION`: version of the static key (default: 1)
    /// - `ACCESS_TOKEN_PREVIOUS_KEYS`: retired keys, `version:base64,...` (default: none)
    /// - `ACCESS_TOKEN_VALIDITY_SECS`: token lifetime (default: 300)
    /// - `ACCESS_CLOCK_SKEW_SECS`: tolerated issuer clock skew (default: 30)
    /// - `ACCESS_REMOTE_KEY_NAME`: Redis key of the override (default: `access:token_key:current`)
    /// - `ACCESS_REMOTE_KEY_TIMEOUT_MS`: remote lookup timeout (default: 200)
    /// - `ACCESS_REMOTE_KEY_CACHE_SECS`: remote lookup cache TTL (default: 60)
    /// - `ACCESS_SCAN_TIMEOUT_MS`: scan processing budget (default: 2000)
    /// - `ACCESS_MAX_COMMIT_ATTEMPTS`: log compare-and-set attempts (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let encoded_key =
            env::var("ACCESS_TOKEN_KEY").map_err(|_| ConfigError::Missing("ACCESS_TOKEN_KEY"))?;
        let version = match env::var("ACCESS_TOKEN_KEY_VERSION") {
            Ok(raw) => parse_version(&raw)?,
            Err(_) => 1,
        };
        let current = KeyMaterial::from_base64(version, &encoded_key)?;
        let previous = KeyRing::parse_previous(
            &env::var("ACCESS_TOKEN_PREVIOUS_KEYS").unwrap_or_default(),
        )?;
        let key_ring = KeyRing::new(current, previous)?;

        let validity_secs: i64 = parse_var("ACCESS_TOKEN_VALIDITY_SECS", 300)?;
        if validity_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "ACCESS_TOKEN_VALIDITY_SECS",
                reason: "must be positive".to_string(),
            });
        }
        let clock_skew_secs: i64 = parse_var("ACCESS_CLOCK_SKEW_SECS", 30)?;
        if clock_skew_secs < 0 {
            return Err(ConfigError::Invalid {
                name: "ACCESS_CLOCK_SKEW_SECS",
                reason: "must not be negative".to_string(),
            });
        }

        let remote_key_name = env::var("ACCESS_REMOTE_KEY_NAME")
            .unwrap_or_else(|_| "access:token_key:current".to_string());
        let validity_window = TimeDelta::seconds(validity_secs);
        let remote_key_policy = RemoteKeyPolicy {
            lookup_timeout: Duration::from_millis(parse_var("ACCESS_REMOTE_KEY_TIMEOUT_MS", 200)?),
            cache_ttl: Duration::from_secs(parse_var("ACCESS_REMOTE_KEY_CACHE_SECS", 60)?),
            // A superseded remote key must outlive every token it sealed
            retention: Duration::from_secs(validity_secs.unsigned_abs()),
        };

        let max_commit_attempts: u32 = parse_var("ACCESS_MAX_COMMIT_ATTEMPTS", 3)?;
        if max_commit_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "ACCESS_MAX_COMMIT_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(AccessConfig {
            key_ring,
            validity_window,
            clock_skew: TimeDelta::seconds(clock_skew_secs),
            remote_key_name,
            remote_key_policy,
            scan_timeout: Duration::from_millis(parse_var("ACCESS_SCAN_TIMEOUT_MS", 2000)?),
            max_commit_attempts,
        })
    }
}

/// Settings of the HTTP front end
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// HS256 secret scan stations' operator tokens are signed with
    pub operator_jwt_secret: String,
}

impl ServerConfig {
    /// # Environment Variables
    /// - `BIND_ADDRESS`: listen address (default: `0.0.0.0:3000`)
    /// - `OPERATOR_JWT_SECRET`: operator token secret (required)
    pub fn from_env() -> Result<Self, ConfigError> {
        let operator_jwt_secret = env::var("OPERATOR_JWT_SECRET")
            .map_err(|_| ConfigError::Missing("OPERATOR_JWT_SECRET"))?;
        if operator_jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                name: "OPERATOR_JWT_SECRET",
                reason: "must be at least 32 bytes".to_string(),
            });
        }

        Ok(ServerConfig {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            operator_jwt_secret,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("cannot parse {:?}", raw),
        }),
        Err(_) => Ok(default),
    }
}
