//! Configuration management for Ratewall.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional configuration file, `RATEWALL__SECTION__FIELD` environment
//! variables, and finally the flat legacy variables listed in [`LEGACY_ENV`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RatewallError, Result};
use crate::ratelimit::{ClassLimits, KeySpace, LimitPolicy};

/// Prefix of structured environment overrides.
const ENV_PREFIX: &str = "RATEWALL";

/// How a legacy variable's value must parse to be accepted.
#[derive(Debug, Clone, Copy)]
enum LegacyKind {
    Text,
    Count,
    Database,
    Duration,
}

impl LegacyKind {
    fn accepts(self, value: &str) -> bool {
        match self {
            LegacyKind::Text => true,
            LegacyKind::Count => value.trim().parse::<u64>().is_ok(),
            LegacyKind::Database => value.trim().parse::<u8>().is_ok(),
            LegacyKind::Duration => parse_duration(value).is_ok(),
        }
    }
}

/// Flat environment variables mapped onto configuration keys.
///
/// Unparseable values are ignored with a warning, leaving the lower layers
/// in effect.
const LEGACY_ENV: &[(&str, &str, LegacyKind)] = &[
    ("REDIS_ADDR", "store.redis_addr", LegacyKind::Text),
    ("REDIS_PASSWORD", "store.redis_password", LegacyKind::Text),
    ("REDIS_DB", "store.redis_db", LegacyKind::Database),
    ("IP_LIMIT_PER_SECOND", "rate_limiting.anonymous_limit", LegacyKind::Count),
    ("IP_BLOCK_DURATION", "rate_limiting.anonymous_block_duration", LegacyKind::Duration),
    ("TOKEN_LIMIT_PER_SECOND", "rate_limiting.credentialed_limit", LegacyKind::Count),
    ("TOKEN_BLOCK_DURATION", "rate_limiting.credentialed_block_duration", LegacyKind::Duration),
];

/// Main configuration for the Ratewall service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewallConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counting store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Which counting store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    Redis,
    /// Process-local maps; limits are per instance
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = RatewallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(RatewallError::Config(format!(
                "unknown store backend '{}', expected 'redis' or 'memory'",
                other
            ))),
        }
    }
}

/// Counting store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis `host:port`
    pub redis_addr: String,

    pub redis_password: Option<String>,

    pub redis_db: u8,

    /// Prefix of counter and block keys; empty for none
    pub key_prefix: String,

    /// Upper bound for a single store call; zero disables the bound
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_addr: "localhost:6379".to_string(),
            redis_password: None,
            redis_db: 0,
            key_prefix: "limiter".to_string(),
            timeout: Duration::from_millis(500),
        }
    }
}

impl StoreConfig {
    /// Connection URL for the Redis client.
    pub fn redis_url(&self) -> String {
        match self.redis_password.as_deref() {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}/{}", password, self.redis_addr, self.redis_db)
            }
            _ => format!("redis://{}/{}", self.redis_addr, self.redis_db),
        }
    }

    /// Store call bound, if enabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Requests per second for callers without a credential
    pub anonymous_limit: u64,

    /// Lockout after an anonymous caller exceeds its limit
    #[serde(with = "duration_str")]
    pub anonymous_block_duration: Duration,

    /// Requests per second for callers presenting a credential
    pub credentialed_limit: u64,

    /// Lockout after a credentialed caller exceeds its limit
    #[serde(with = "duration_str")]
    pub credentialed_block_duration: Duration,

    /// Request header carrying the credential token
    pub credential_header: String,

    /// Take the caller address from proxy headers
    pub trust_proxy: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        let policy = LimitPolicy::default();
        Self {
            anonymous_limit: policy.anonymous.limit,
            anonymous_block_duration: policy.anonymous.block_duration,
            credentialed_limit: policy.credentialed.limit,
            credentialed_block_duration: policy.credentialed.block_duration,
            credential_header: "API_KEY".to_string(),
            trust_proxy: false,
        }
    }
}

impl RateLimitingConfig {
    /// The limits handed to the rate limiter.
    pub fn policy(&self) -> LimitPolicy {
        LimitPolicy {
            anonymous: ClassLimits {
                limit: self.anonymous_limit,
                block_duration: self.anonymous_block_duration,
            },
            credentialed: ClassLimits {
                limit: self.credentialed_limit,
                block_duration: self.credentialed_block_duration,
            },
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RatewallConfig {
    /// Load configuration from the process environment and an optional file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load configuration reading variables from `env` instead of the process.
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&RatewallConfig::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .source(Some(env.clone().into_iter().collect())),
        );

        for (var, key, kind) in LEGACY_ENV {
            let Some(value) = env.get(*var) else {
                continue;
            };
            if kind.accepts(value) {
                builder = builder.set_override(*key, value.as_str())?;
            } else {
                warn!(variable = %var, value = %value, "Ignoring unparseable environment variable");
            }
        }

        let config: RatewallConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a file path, ignoring the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load_with_env(Some(path), HashMap::new())
    }
}

/// Parse a duration such as `300ms`, `1m`, `1h30m` or `2.5s`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let invalid = || RatewallError::Config(format!("invalid duration '{}'", input));

    if input.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total_nanos: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(invalid()),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        total_nanos += whole * nanos_per_unit;

        if !fraction.is_empty() {
            let digits: u128 = fraction.parse().map_err(|_| invalid())?;
            let scale = 10u128
                .checked_pow(u32::try_from(fraction.len()).map_err(|_| invalid())?)
                .ok_or_else(invalid)?;
            total_nanos += digits * nanos_per_unit / scale;
        }

        rest = tail;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000).map_err(|_| invalid())?;
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return format!("{}ns", duration.as_nanos());
    }
    if duration.subsec_nanos() % 1_000_000 != 0 {
        return format!("{}us", duration.as_micros());
    }
    match millis {
        m if m % 3_600_000 == 0 => format!("{}h", m / 3_600_000),
        m if m % 60_000 == 0 => format!("{}m", m / 60_000),
        m if m % 1000 == 0 => format!("{}s", m / 1000),
        m => format!("{}ms", m),
    }
}

/// Serde adapter storing durations as human-readable strings.
mod duration_str {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration string like \"1m\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            super::parse_duration(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration cannot be negative"))
        }
    }
}
