//! Configuration management
//!
//! Configuration is read from `config.yml` and then overridden by
//! `INKWELL_*` environment variables. Every section is optional; missing
//! values fall back to defaults.

use serde::{Deserialize, Serialize};

use crate::models::{ReadAccess, Role};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/inkwell.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Sqlite,
    Mysql,
}

/// Read cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Turn the cache off entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_ttl(),
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

/// Session and login settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a session token
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Add `Secure` to the session cookie
    #[serde(default)]
    pub secure_cookies: bool,
    /// Role granted to newly registered users
    #[serde(default)]
    pub default_role: Option<Role>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            secure_cookies: false,
            default_role: None,
        }
    }
}

fn default_session_days() -> i64 {
    7
}

/// Read policies per endpoint family. Writes always require a login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Books and authors
    #[serde(default = "default_permission_read")]
    pub books_read: ReadAccess,
    /// Posts, comments and tags
    #[serde(default = "default_public_read")]
    pub posts_read: ReadAccess,
    /// Public user profiles and follower lists
    #[serde(default = "default_public_read")]
    pub profiles_read: ReadAccess,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            books_read: default_permission_read(),
            posts_read: default_public_read(),
            profiles_read: default_public_read(),
        }
    }
}

fn default_permission_read() -> ReadAccess {
    ReadAccess::Permission
}

fn default_public_read() -> ReadAccess {
    ReadAccess::Public
}

/// Validation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// How many years past the current one a publication year may be
    #[serde(default = "default_max_years_ahead")]
    pub max_years_ahead: i32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_years_ahead: default_max_years_ahead(),
        }
    }
}

fn default_max_years_ahead() -> i32 {
    5
}

/// Response hardening and request screening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub csp: CspConfig,
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
    /// Emit `Strict-Transport-Security` with this max-age when set
    #[serde(default)]
    pub hsts_seconds: Option<u64>,
    /// User-agent fragments that get a request logged
    #[serde(default = "default_suspicious_agents")]
    pub suspicious_agents: Vec<String>,
    /// Path or query fragments that get a request logged
    #[serde(default = "default_suspicious_patterns")]
    pub suspicious_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csp: CspConfig::default(),
            referrer_policy: default_referrer_policy(),
            hsts_seconds: None,
            suspicious_agents: default_suspicious_agents(),
            suspicious_patterns: default_suspicious_patterns(),
        }
    }
}

fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}

fn default_suspicious_agents() -> Vec<String> {
    ["sqlmap", "nikto", "dirb", "nmap"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_suspicious_patterns() -> Vec<String> {
    [
        "../../../",
        "union+select",
        "union select",
        "<script>",
        "javascript:",
        "eval(",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Content-Security-Policy source lists.
///
/// The header is only emitted when `default_src` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CspConfig {
    pub default_src: Option<Vec<String>>,
    pub script_src: Option<Vec<String>>,
    pub style_src: Option<Vec<String>>,
    pub img_src: Option<Vec<String>>,
    pub font_src: Option<Vec<String>>,
    pub connect_src: Option<Vec<String>>,
    pub frame_ancestors: Option<Vec<String>>,
    pub base_uri: Option<Vec<String>>,
    pub form_action: Option<Vec<String>>,
}

impl Default for CspConfig {
    fn default() -> Self {
        let self_only = || Some(vec!["'self'".to_string()]);
        Self {
            default_src: self_only(),
            script_src: None,
            style_src: None,
            img_src: None,
            font_src: None,
            connect_src: None,
            frame_ancestors: Some(vec!["'none'".to_string()]),
            base_uri: self_only(),
            form_action: self_only(),
        }
    }
}

impl CspConfig {
    /// Render the header value, or `None` when `default_src` is unset
    pub fn header_value(&self) -> Option<String> {
        self.default_src.as_ref()?;

        let directives = [
            ("default-src", &self.default_src),
            ("script-src", &self.script_src),
            ("style-src", &self.style_src),
            ("img-src", &self.img_src),
            ("font-src", &self.font_src),
            ("connect-src", &self.connect_src),
            ("frame-ancestors", &self.frame_ancestors),
            ("base-uri", &self.base_uri),
            ("form-action", &self.form_action),
        ];

        let parts: Vec<String> = directives
            .iter()
            .filter_map(|(name, sources)| {
                sources
                    .as_ref()
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("{} {}", name, s.join(" ")))
            })
            .collect();

        Some(parts.join("; "))
    }
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields the defaults. Malformed YAML is an
    /// error that names the offending line and column.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides.
    ///
    /// Recognised variables:
    /// - INKWELL_SERVER_HOST, INKWELL_SERVER_PORT, INKWELL_SERVER_CORS_ORIGIN
    /// - INKWELL_DATABASE_DRIVER, INKWELL_DATABASE_URL
    /// - INKWELL_CACHE_ENABLED, INKWELL_CACHE_TTL_SECONDS
    /// - INKWELL_AUTH_SESSION_DAYS, INKWELL_AUTH_SECURE_COOKIES
    /// - INKWELL_BOOKS_READ, INKWELL_POSTS_READ, INKWELL_PROFILES_READ
    /// - INKWELL_VALIDATION_MAX_YEARS_AHEAD
    /// - INKWELL_SECURITY_HSTS_SECONDS
    ///
    /// Values that fail to parse are ignored.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.session_days < 1 {
            return Err(ConfigError::ValidationError(
                "auth.session_days must be at least 1".to_string(),
            ));
        }
        if self.validation.max_years_ahead < 0 {
            return Err(ConfigError::ValidationError(
                "validation.max_years_ahead must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INKWELL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("INKWELL_SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(cors_origin) = std::env::var("INKWELL_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("INKWELL_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("INKWELL_DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(enabled) = env_parse::<bool>("INKWELL_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
        if let Some(ttl) = env_parse::<u64>("INKWELL_CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }

        if let Some(days) = env_parse::<i64>("INKWELL_AUTH_SESSION_DAYS") {
            if days >= 1 {
                self.auth.session_days = days;
            }
        }
        if let Some(secure) = env_parse::<bool>("INKWELL_AUTH_SECURE_COOKIES") {
            self.auth.secure_cookies = secure;
        }

        if let Some(policy) = env_parse::<ReadAccess>("INKWELL_BOOKS_READ") {
            self.access.books_read = policy;
        }
        if let Some(policy) = env_parse::<ReadAccess>("INKWELL_POSTS_READ") {
            self.access.posts_read = policy;
        }
        if let Some(policy) = env_parse::<ReadAccess>("INKWELL_PROFILES_READ") {
            self.access.profiles_read = policy;
        }

        if let Some(years) = env_parse::<i32>("INKWELL_VALIDATION_MAX_YEARS_AHEAD") {
            if years >= 0 {
                self.validation.max_years_ahead = years;
            }
        }
        if let Some(seconds) = env_parse::<u64>("INKWELL_SECURITY_HSTS_SECONDS") {
            self.security.hsts_seconds = Some(seconds);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test module that touches environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "INKWELL_SERVER_HOST",
    "INKWELL_SERVER_PORT",
    "INKWELL_SERVER_CORS_ORIGIN",
    "INKWELL_DATABASE_DRIVER",
    "INKWELL_DATABASE_URL",
    "INKWELL_CACHE_ENABLED",
    "INKWELL_CACHE_TTL_SECONDS",
    "INKWELL_AUTH_SESSION_DAYS",
    "INKWELL_AUTH_SECURE_COOKIES",
    "INKWELL_BOOKS_READ",
    "INKWELL_POSTS_READ",
    "INKWELL_PROFILES_READ",
    "INKWELL_VALIDATION_MAX_YEARS_AHEAD",
    "INKWELL_SECURITY_HSTS_SECONDS",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}
