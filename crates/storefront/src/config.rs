//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required in production
//! - `SHOPFRONT_ADDR` - Listen socket address (e.g., `0.0.0.0:8080`)
//! - `SHOPFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `SHOPFRONT_SECRET` - Signing secret (min 32 bytes, high entropy)
//! - `SHOPFRONT_SECURE` - Must be `true`
//! - `SHOPFRONT_TLS_CERT_FILE` / `SHOPFRONT_TLS_KEY_FILE` - Unless `SHOPFRONT_TLS_OFFLOADED=true`
//!
//! ## Optional
//! - `SHOPFRONT_ENV` - `development` (default) or `production`
//! - `SHOPFRONT_TRUSTED_PROXIES` - Comma-separated IPs/CIDRs (default: `127.0.0.1,::1`)
//! - `SHOPFRONT_CDN_ORIGIN` - Extra origin allowed for scripts and styles
//! - `SHOPFRONT_BEARER_SECRET` - HS256 secret shared with the token issuer; unset disables bearer auth
//! - `SHOPFRONT_LOG_DIR` - Directory for log files (default: `logs`, empty disables)
//! - `SHOPFRONT_LOG_JSON` - JSON console output (default: false)
//! - `SHOPFRONT_SHUTDOWN_TIMEOUT` - Drain budget (default: 10s)
//! - `SHOPFRONT_READ_HEADER_TIMEOUT` - (default: 5s)
//! - `SHOPFRONT_READ_TIMEOUT` - (default: 10s)
//! - `SHOPFRONT_WRITE_TIMEOUT` - (default: 30s)
//! - `SHOPFRONT_IDLE_TIMEOUT` - (default: 60s)
//! - `SHOPFRONT_REQUEST_TIMEOUT` - Per-request deadline, `0` disables (default: 15s)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use secrecy::{ExposeSecret, SecretString};
use shopfront_core::TrustAllowList;
use thiserror::Error;
use url::Url;

/// Minimum signing secret strength in bytes.
pub const MIN_SECRET_BYTES: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_DATABASE_URL: &str = "postgres://localhost/shopfront";
const DEFAULT_TRUSTED_PROXIES: &str = "127.0.0.1,::1";
const DEFAULT_LOG_DIR: &str = "logs";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Unsafe production configuration: {0}")]
    UnsafeProduction(String),
}

/// Execution mode selected by `SHOPFRONT_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Development,
    Production,
}

impl ExecutionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Timeout budgets for connections, requests and shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read_header: Duration,
    pub read: Duration,
    pub write: Duration,
    pub idle: Duration,
    /// Per-request deadline. Zero disables the timeout guard.
    pub request: Duration,
    /// Graceful shutdown drain budget.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_header: Duration::from_secs(5),
            read: Duration::from_secs(10),
            write: Duration::from_secs(30),
            idle: Duration::from_secs(60),
            request: Duration::from_secs(15),
            shutdown: Duration::from_secs(10),
        }
    }
}

/// PEM files for in-process TLS termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Shop front server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Development or production behaviour
    pub mode: ExecutionMode,
    /// Socket address to listen on
    pub addr: SocketAddr,
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Long-lived signing secret; `None` means generate one per process
    pub secret: Option<SecretString>,
    /// HTTPS behaviour: `Secure` cookies and HSTS
    pub secure: bool,
    /// TLS is terminated by the reverse proxy
    pub tls_offloaded: bool,
    /// Certificate and key for in-process TLS
    pub tls: Option<TlsConfig>,
    /// Proxies allowed to connect and set forwarded headers
    pub trusted_proxies: TrustAllowList,
    /// Extra origin allowed for scripts and styles
    pub cdn_origin: Option<String>,
    /// HS256 secret for bearer tokens
    pub bearer_secret: Option<SecretString>,
    /// Directory for main and error log files
    pub log_dir: Option<PathBuf>,
    /// Emit JSON on the console
    pub log_json: bool,
    /// Timeout budgets
    pub timeouts: Timeouts,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if variables are invalid or, in production, if
    /// the configuration is unsafe.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Values are trimmed; empty values count as unset.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let mode = match vars.get("SHOPFRONT_ENV") {
            Some(value) => ExecutionMode::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvVar(
                    "SHOPFRONT_ENV".to_string(),
                    format!("expected development or production, got {value}"),
                )
            })?,
            None => ExecutionMode::Development,
        };
        let production = mode == ExecutionMode::Production;

        let addr = match vars.get("SHOPFRONT_ADDR") {
            Some(value) => value,
            None if production => {
                return Err(ConfigError::MissingEnvVar("SHOPFRONT_ADDR".to_string()));
            }
            None => DEFAULT_ADDR.to_string(),
        }
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidEnvVar("SHOPFRONT_ADDR".to_string(), e.to_string()))?;

        let database_url = match vars
            .get("SHOPFRONT_DATABASE_URL")
            .or_else(|| vars.get("DATABASE_URL"))
        {
            Some(url) => SecretString::from(url),
            None if production => {
                return Err(ConfigError::MissingEnvVar(
                    "SHOPFRONT_DATABASE_URL".to_string(),
                ));
            }
            None => SecretString::from(DEFAULT_DATABASE_URL),
        };

        let secret = vars.get("SHOPFRONT_SECRET").map(SecretString::from);

        let tls = match (
            vars.get("SHOPFRONT_TLS_CERT_FILE"),
            vars.get("SHOPFRONT_TLS_KEY_FILE"),
        ) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_file: PathBuf::from(cert),
                key_file: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidEnvVar(
                    "SHOPFRONT_TLS_CERT_FILE".to_string(),
                    "certificate and key files must be set together".to_string(),
                ));
            }
        };

        let trusted_proxies = vars
            .get_or("SHOPFRONT_TRUSTED_PROXIES", DEFAULT_TRUSTED_PROXIES)
            .parse::<TrustAllowList>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("SHOPFRONT_TRUSTED_PROXIES".to_string(), e.to_string())
            })?;

        // SHOPFRONT_LOG_DIR="" explicitly disables file logging
        let log_dir = match (vars.0)("SHOPFRONT_LOG_DIR") {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir.trim())),
            None => Some(PathBuf::from(DEFAULT_LOG_DIR)),
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            read_header: vars.duration("SHOPFRONT_READ_HEADER_TIMEOUT", defaults.read_header)?,
            read: vars.duration("SHOPFRONT_READ_TIMEOUT", defaults.read)?,
            write: vars.duration("SHOPFRONT_WRITE_TIMEOUT", defaults.write)?,
            idle: vars.duration("SHOPFRONT_IDLE_TIMEOUT", defaults.idle)?,
            request: vars.duration("SHOPFRONT_REQUEST_TIMEOUT", defaults.request)?,
            shutdown: vars.duration("SHOPFRONT_SHUTDOWN_TIMEOUT", defaults.shutdown)?,
        };

        let config = Self {
            mode,
            addr,
            database_url,
            secret,
            secure: vars.flag("SHOPFRONT_SECURE", false)?,
            tls_offloaded: vars.flag("SHOPFRONT_TLS_OFFLOADED", false)?,
            tls,
            trusted_proxies,
            cdn_origin: vars
                .get("SHOPFRONT_CDN_ORIGIN")
                .map(|raw| parse_origin(&raw))
                .transpose()?,
            bearer_secret: vars.get("SHOPFRONT_BEARER_SECRET").map(SecretString::from),
            log_dir,
            log_json: vars.flag("SHOPFRONT_LOG_JSON", false)?,
            timeouts,
            sentry_dsn: vars.get("SENTRY_DSN"),
        };

        if production {
            config.validate_production()?;
        }

        Ok(config)
    }

    /// Whether the process runs in production mode.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.mode == ExecutionMode::Production
    }

    /// Strict checks that make a production start fatal rather than unsafe.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("SHOPFRONT_SECRET".to_string()))?;
        validate_secret_length(secret, "SHOPFRONT_SECRET")?;
        validate_secret_strength(secret.expose_secret(), "SHOPFRONT_SECRET")?;

        if let Some(bearer) = &self.bearer_secret {
            validate_secret_length(bearer, "SHOPFRONT_BEARER_SECRET")?;
            validate_secret_strength(bearer.expose_secret(), "SHOPFRONT_BEARER_SECRET")?;
        }

        if !self.secure {
            return Err(ConfigError::UnsafeProduction(
                "SHOPFRONT_SECURE must be true (HTTPS behaviour is required even when TLS is offloaded)"
                    .to_string(),
            ));
        }

        if !self.tls_offloaded && self.tls.is_none() {
            return Err(ConfigError::UnsafeProduction(
                "SHOPFRONT_TLS_CERT_FILE / SHOPFRONT_TLS_KEY_FILE are required unless SHOPFRONT_TLS_OFFLOADED=true"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable source with trimming and typed accessors.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get a variable, treating blank values as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Get a variable with a default value.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a boolean flag (`true/1/yes/on`, `false/0/no/off`).
    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("expected a boolean, got {value}"),
            )),
        }
    }

    /// Parse a duration.
    fn duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(value) => parse_duration(&value).ok_or_else(|| {
                ConfigError::InvalidEnvVar(key.to_string(), format!("invalid duration {value}"))
            }),
            None => Ok(default),
        }
    }
}

/// Parse `500ms`, `30s`, `5m`, `1h` or a bare number of seconds.
pub(crate) fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

/// Normalize an origin (`scheme://host[:port]`) for use in the CSP.
fn parse_origin(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| {
        ConfigError::InvalidEnvVar("SHOPFRONT_CDN_ORIGIN".to_string(), reason.to_string())
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid("expected an http(s) origin"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("origin must not carry a path, query or fragment"));
    }

    Ok(url.origin().ascii_serialization())
}

/// Effective strength of a secret in bytes.
///
/// Base64 values count their decoded length; anything else its raw length.
fn secret_strength(secret: &str) -> usize {
    STANDARD
        .decode(secret)
        .map_or_else(|_| secret.len(), |decoded| decoded.len())
}

/// Validate that a signing secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let strength = secret_strength(secret.expose_secret());
    if strength < MIN_SECRET_BYTES {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("must be at least {MIN_SECRET_BYTES} bytes (got {strength})"),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const STRONG_SECRET: &str = "q8Zr3vN1xK7pL0aW5mT2yB9cF4hJ6dS8gE1uR3iO7nQ=";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    fn production_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SHOPFRONT_ENV", "production"),
            ("SHOPFRONT_ADDR", "0.0.0.0:8080"),
            ("SHOPFRONT_DATABASE_URL", "postgres://db/shop"),
            ("SHOPFRONT_SECRET", STRONG_SECRET),
            ("SHOPFRONT_SECURE", "true"),
            ("SHOPFRONT_TLS_OFFLOADED", "true"),
        ]
    }

    fn with(
        mut vars: Vec<(&'static str, &'static str)>,
        key: &'static str,
        value: &'static str,
    ) -> Vec<(&'static str, &'static str)> {
        vars.retain(|(k, _)| *k != key);
        vars.push((key, value));
        vars
    }

    #[test]
    fn test_development_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.mode, ExecutionMode::Development);
        assert_eq!(config.addr.to_string(), "127.0.0.1:8080");
        assert!(config.secret.is_none());
        assert!(!config.secure);
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.trusted_proxies.contains("127.0.0.1".parse().unwrap()));
        assert!(config.trusted_proxies.contains("::1".parse().unwrap()));
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_empty_log_dir_disables_file_logging() {
        let config = load(&[("SHOPFRONT_LOG_DIR", "")]).unwrap();
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_production_valid() {
        let config = load(&production_vars()).unwrap();
        assert!(config.is_production());
        assert!(config.secure);
    }

    #[test]
    fn test_production_short_secret_rejected() {
        let vars = with(production_vars(), "SHOPFRONT_SECRET", "aB3$xY9!mK2@");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_bearer_secret_optional() {
        let config = load(&[]).unwrap();
        assert!(config.bearer_secret.is_none());

        let config = load(&[("SHOPFRONT_BEARER_SECRET", "dev-bearer")]).unwrap();
        assert_eq!(
            config.bearer_secret.unwrap().expose_secret(),
            "dev-bearer"
        );
    }

    #[test]
    fn test_production_weak_bearer_secret_rejected() {
        let vars = with(production_vars(), "SHOPFRONT_BEARER_SECRET", "short");
        let err = load(&vars).unwrap_err();
        assert!(
            matches!(err, ConfigError::InsecureSecret(ref var, _) if var == "SHOPFRONT_BEARER_SECRET")
        );

        let vars = with(
            production_vars(),
            "SHOPFRONT_BEARER_SECRET",
            "Vb4Nq8Lw2Xc6Tz0Rk3Jm7Hp1Gf5Ds9Ay2Ue6Io4Pq8M=",
        );
        assert!(load(&vars).unwrap().bearer_secret.is_some());
    }

    #[test]
    fn test_production_missing_secret_rejected() {
        let mut vars = production_vars();
        vars.retain(|(k, _)| *k != "SHOPFRONT_SECRET");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::MissingEnvVar(_)
        ));
    }

    #[test]
    fn test_production_placeholder_secret_rejected() {
        let vars = with(
            production_vars(),
            "SHOPFRONT_SECRET",
            "changeme-changeme-changeme-changeme-1234",
        );
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::InsecureSecret(_, _)
        ));
    }

    #[test]
    fn test_production_requires_secure() {
        let vars = with(production_vars(), "SHOPFRONT_SECURE", "false");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::UnsafeProduction(_)
        ));
    }

    #[test]
    fn test_production_requires_tls_material_unless_offloaded() {
        let vars = with(production_vars(), "SHOPFRONT_TLS_OFFLOADED", "false");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::UnsafeProduction(_)
        ));

        let vars = with(vars, "SHOPFRONT_TLS_CERT_FILE", "/etc/tls/cert.pem");
        let vars = with(vars, "SHOPFRONT_TLS_KEY_FILE", "/etc/tls/key.pem");
        assert!(load(&vars).is_ok());
    }

    #[test]
    fn test_production_requires_addr() {
        let mut vars = production_vars();
        vars.retain(|(k, _)| *k != "SHOPFRONT_ADDR");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::MissingEnvVar(_)
        ));
    }

    #[test]
    fn test_half_tls_config_rejected() {
        let err = load(&[("SHOPFRONT_TLS_CERT_FILE", "cert.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_invalid_trusted_proxy_rejected() {
        let err = load(&[("SHOPFRONT_TRUSTED_PROXIES", "127.0.0.1,proxy.local")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let err = load(&[("SHOPFRONT_SECURE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = load(&[("SHOPFRONT_REQUEST_TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_request_timeout_zero_allowed() {
        let config = load(&[("SHOPFRONT_REQUEST_TIMEOUT", "0")]).unwrap();
        assert_eq!(config.timeouts.request, Duration::ZERO);
    }

    #[test]
    fn test_cdn_origin_normalized() {
        let config = load(&[("SHOPFRONT_CDN_ORIGIN", "https://CDN.Example.net/")]).unwrap();
        assert_eq!(config.cdn_origin.as_deref(), Some("https://cdn.example.net"));

        let err = load(&[("SHOPFRONT_CDN_ORIGIN", "https://cdn.example.net/js; script-src *")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10d"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_secret_strength_counts_decoded_base64() {
        // 32 random bytes, base64-encoded
        assert_eq!(secret_strength(STRONG_SECRET), 32);
        // Not base64 -> raw length
        assert_eq!(secret_strength("aB3$xY9!"), 8);
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }
}
