//! Key provider for token encryption
//!
//! Tokens are sealed with a versioned 256-bit key. The static key ring comes
//! from configuration and is always available. An operator may publish an
//! override through the remote key channel; when that lookup is slow, fails,
//! or finds nothing, the static ring answers instead. Key lookup never fails
//! a scan.

use async_trait::async_trait;
use base64::Engine;
use common::cache::RedisStore;
use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a token key in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Error parsing configured key material
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("key is not valid base64")]
    InvalidBase64,

    #[error("key must be exactly 32 bytes, got {0}")]
    WrongLength(usize),

    #[error("invalid key version: {0}")]
    InvalidVersion(String),

    #[error("key entry must look like `<version>:<base64>`")]
    InvalidEntry,

    #[error("key version {0} is configured more than once")]
    DuplicateVersion(u32),
}

/// A symmetric key together with the version tag embedded in tokens
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    version: u32,
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn new(version: u32, bytes: [u8; KEY_LEN]) -> Self {
        Self { version, bytes }
    }

    /// Decode a standard base64 key
    pub fn from_base64(version: u32, encoded: &str) -> Result<Self, KeyError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyError::InvalidBase64)?;

        let bytes: [u8; KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::WrongLength(decoded.len()))?;

        Ok(Self::new(version, bytes))
    }

    /// Parse the `<version>:<base64>` form used for retired and remote keys
    pub fn parse_versioned(entry: &str) -> Result<Self, KeyError> {
        let (version, encoded) = entry.trim().split_once(':').ok_or(KeyError::InvalidEntry)?;
        Self::from_base64(parse_version(version)?, encoded)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Parse a key version as written in configuration
pub fn parse_version(raw: &str) -> Result<u32, KeyError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| KeyError::InvalidVersion(raw.to_string()))
}

/// The current static key plus retired keys still accepted for decoding
#[derive(Clone, Debug)]
pub struct KeyRing {
    current: KeyMaterial,
    previous: Vec<KeyMaterial>,
}

impl KeyRing {
    pub fn new(current: KeyMaterial, previous: Vec<KeyMaterial>) -> Result<Self, KeyError> {
        let mut seen = vec![current.version()];
        for key in &previous {
            if seen.contains(&key.version()) {
                return Err(KeyError::DuplicateVersion(key.version()));
            }
            seen.push(key.version());
        }
        Ok(Self { current, previous })
    }

    /// Parse a comma separated list of `<version>:<base64>` entries
    pub fn parse_previous(list: &str) -> Result<Vec<KeyMaterial>, KeyError> {
        list.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(KeyMaterial::parse_versioned)
            .collect()
    }

    pub fn current(&self) -> &KeyMaterial {
        &self.current
    }

    pub fn get(&self, version: u32) -> Option<&KeyMaterial> {
        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .find(|key| key.version() == version)
    }
}

/// Resolves keys for sealing and opening tokens
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Key used to seal newly issued tokens
    async fn current_key(&self) -> KeyMaterial;

    /// Key that sealed a token carrying `version`, if still accepted
    async fn key_for_version(&self, version: u32) -> Option<KeyMaterial>;
}

/// Key provider backed only by the configured key ring
#[derive(Clone, Debug)]
pub struct StaticKeyProvider {
    ring: KeyRing,
}

impl StaticKeyProvider {
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn current_key(&self) -> KeyMaterial {
        self.ring.current().clone()
    }

    async fn key_for_version(&self, version: u32) -> Option<KeyMaterial> {
        self.ring.get(version).cloned()
    }
}

/// Source of a remotely published key override
#[async_trait]
pub trait RemoteKeySource: Send + Sync {
    /// Fetch the published key, `None` when no override is set
    async fn fetch_current(&self) -> anyhow::Result<Option<KeyMaterial>>;
}

/// Reads the override from a Redis string holding `<version>:<base64>`
#[derive(Clone)]
pub struct RedisKeySource {
    store: RedisStore,
    key_name: String,
}

impl RedisKeySource {
    pub fn new(store: RedisStore, key_name: impl Into<String>) -> Self {
        Self {
            store,
            key_name: key_name.into(),
        }
    }
}

#[async_trait]
impl RemoteKeySource for RedisKeySource {
    async fn fetch_current(&self) -> anyhow::Result<Option<KeyMaterial>> {
        match self.store.read(&self.key_name).await? {
            Some(entry) => Ok(Some(KeyMaterial::parse_versioned(&entry)?)),
            None => Ok(None),
        }
    }
}

/// Timing knobs for [`CachingKeyProvider`]
#[derive(Debug, Clone)]
pub struct RemoteKeyPolicy {
    /// Upper bound on a single remote lookup
    pub lookup_timeout: Duration,
    /// How long a lookup result is trusted before re-resolving
    pub cache_ttl: Duration,
    /// How long a superseded remote key stays usable for decoding
    pub retention: Duration,
}

#[derive(Default)]
struct RemoteCache {
    resolved_at: Option<Instant>,
    current_version: Option<u32>,
    keys: HashMap<u32, (KeyMaterial, Instant)>,
}

impl RemoteCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.resolved_at
            .is_some_and(|resolved| resolved.elapsed() < ttl)
    }

    fn current(&self) -> Option<KeyMaterial> {
        self.current_version
            .and_then(|version| self.keys.get(&version))
            .map(|(key, _)| key.clone())
    }
}

/// Remote override in front of the static key ring
///
/// Lookups are cached for `cache_ttl`, including failed and empty ones, so
/// an unreachable channel costs at most one timeout per TTL. Remote keys
/// that get superseded stay available for decoding for `retention`, which
/// lets tokens issued just before a rotation still validate.
pub struct CachingKeyProvider<R> {
    remote: R,
    fallback: StaticKeyProvider,
    policy: RemoteKeyPolicy,
    cache: RwLock<RemoteCache>,
}

impl<R: RemoteKeySource> CachingKeyProvider<R> {
    pub fn new(remote: R, fallback: StaticKeyProvider, policy: RemoteKeyPolicy) -> Self {
        Self {
            remote,
            fallback,
            policy,
            cache: RwLock::new(RemoteCache::default()),
        }
    }

    async fn remote_current(&self) -> Option<KeyMaterial> {
        {
            let cache = self.cache.read().await;
            if cache.is_fresh(self.policy.cache_ttl) {
                return cache.current();
            }
        }

        let fetched =
            match tokio::time::timeout(self.policy.lookup_timeout, self.remote.fetch_current())
                .await
            {
                Ok(Ok(key)) => key,
                Ok(Err(e)) => {
                    warn!("Remote key lookup failed, using static key: {}", e);
                    None
                }
                Err(_) => {
                    warn!(
                        "Remote key lookup timed out after {:?}, using static key",
                        self.policy.lookup_timeout
                    );
                    None
                }
            };

        // A remote key may not reuse a static version: it would shadow the
        // static key and strand tokens sealed with it during an outage
        let fetched = fetched.filter(|key| {
            let collides = self.fallback.ring.get(key.version()).is_some();
            if collides {
                warn!(
                    "Ignoring remote token key: version {} is already in the static key ring",
                    key.version()
                );
            }
            !collides
        });

        let mut cache = self.cache.write().await;
        let now = Instant::now();
        cache.resolved_at = Some(now);
        cache
            .keys
            .retain(|_, (_, seen)| now.duration_since(*seen) < self.policy.retention);

        match fetched {
            Some(key) => {
                if cache.current_version != Some(key.version()) {
                    info!("Using remote token key version {}", key.version());
                }
                cache.current_version = Some(key.version());
                cache.keys.insert(key.version(), (key.clone(), now));
                Some(key)
            }
            None => {
                cache.current_version = None;
                None
            }
        }
    }
}

#[async_trait]
impl<R: RemoteKeySource> KeyProvider for CachingKeyProvider<R> {
    async fn current_key(&self) -> KeyMaterial {
        match self.remote_current().await {
            Some(key) => key,
            None => self.fallback.current_key().await,
        }
    }

    async fn key_for_version(&self, version: u32) -> Option<KeyMaterial> {
        let current = self.current_key().await;
        if current.version() == version {
            return Some(current);
        }

        let retained = {
            let cache = self.cache.read().await;
            cache
                .keys
                .get(&version)
                .filter(|(_, seen)| seen.elapsed() < self.policy.retention)
                .map(|(key, _)| key.clone())
        };
        if retained.is_some() {
            debug!("Decoding with retained remote key version {}", version);
            return retained;
        }

        self.fallback.key_for_version(version).await
    }
}
