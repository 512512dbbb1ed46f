//! Tunnistamo configuration.
//!
//! One explicit struct, built once and handed to every component.

use std::path::{Path, PathBuf};

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::info;
use url::Url;

/// Default broker provider name.
pub const DEFAULT_PROVIDER: &str = "tunnistamo";

/// Code and link validity window: 30 minutes.
pub const DEFAULT_CODE_TTL_MINUTES: i64 = 30;

/// Longest accepted validity window: one week.
pub const MAX_CODE_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Wrong codes allowed before the challenge locks.
pub const DEFAULT_MAX_CONFIRMATION_ATTEMPTS: u32 = 20;

/// Domains of well-known throwaway mailbox services.
pub const DEFAULT_DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "discard.email",
    "dispostable.com",
    "getnada.com",
    "guerrillamail.com",
    "mailinator.com",
    "maildrop.cc",
    "mintemail.com",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid application host: {0}")]
    InvalidHost(#[from] url::ParseError),
}

/// Runtime configuration shared by the authenticator, the orchestrator and
/// the sign-in pipeline.
#[derive(Clone, Debug)]
pub struct TunnistamoConfig {
    /// Provider name identities are stored under.
    pub provider: String,
    /// When true the broker email is never trusted and every account goes
    /// through email verification.
    pub confirm_emails: bool,
    /// Domain of placeholder emails. Falls back to the organization host.
    pub auto_email_domain: Option<String>,
    /// AMR values that count as strong identification.
    pub strong_identity_providers: Vec<String>,
    /// Server-side secret for digests and signatures.
    pub secret_key_base: String,
    pub code_ttl_minutes: i64,
    pub max_confirmation_attempts: u32,
    pub disposable_domains: Vec<String>,
    /// Base URL of confirmation links.
    pub application_host: String,
}

impl TunnistamoConfig {
    /// Configuration with defaults and the given secret.
    pub fn new(secret_key_base: impl Into<String>) -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            confirm_emails: false,
            auto_email_domain: None,
            strong_identity_providers: Vec::new(),
            secret_key_base: secret_key_base.into(),
            code_ttl_minutes: DEFAULT_CODE_TTL_MINUTES,
            max_confirmation_attempts: DEFAULT_MAX_CONFIRMATION_ATTEMPTS,
            disposable_domains: DEFAULT_DISPOSABLE_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            application_host: "http://localhost:3000".to_string(),
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                                | Default                    |
    /// |-----------------------------------------|----------------------------|
    /// | `TUNNISTAMO_PROVIDER`                   | `tunnistamo`               |
    /// | `TUNNISTAMO_CONFIRM_EMAILS`             | `false`                    |
    /// | `TUNNISTAMO_AUTO_EMAIL_DOMAIN`          | organization host          |
    /// | `TUNNISTAMO_STRONG_IDENTITY_PROVIDERS`  | empty (comma separated)    |
    /// | `TUNNISTAMO_CODE_TTL_MINUTES`           | `30`                       |
    /// | `TUNNISTAMO_MAX_CONFIRMATION_ATTEMPTS`  | `20`                       |
    /// | `TUNNISTAMO_DISPOSABLE_DOMAINS`         | appended to built-in list  |
    /// | `TUNNISTAMO_APPLICATION_HOST`           | `http://localhost:3000`    |
    /// | `SECRET_KEY_BASE`                       | generated & persisted      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(resolve_secret_key_base());

        if let Some(provider) = env_non_empty("TUNNISTAMO_PROVIDER") {
            config.provider = provider;
        }
        if let Some(flag) = env_non_empty("TUNNISTAMO_CONFIRM_EMAILS") {
            config.confirm_emails = parse_bool("TUNNISTAMO_CONFIRM_EMAILS", &flag)?;
        }
        config.auto_email_domain = env_non_empty("TUNNISTAMO_AUTO_EMAIL_DOMAIN");
        if let Some(list) = env_non_empty("TUNNISTAMO_STRONG_IDENTITY_PROVIDERS") {
            config.strong_identity_providers = split_list(&list);
        }
        if let Some(ttl) = env_non_empty("TUNNISTAMO_CODE_TTL_MINUTES") {
            config.code_ttl_minutes = parse_ttl_minutes("TUNNISTAMO_CODE_TTL_MINUTES", &ttl)?;
        }
        if let Some(max) = env_non_empty("TUNNISTAMO_MAX_CONFIRMATION_ATTEMPTS") {
            config.max_confirmation_attempts =
                parse_number("TUNNISTAMO_MAX_CONFIRMATION_ATTEMPTS", &max)?;
        }
        if let Some(list) = env_non_empty("TUNNISTAMO_DISPOSABLE_DOMAINS") {
            config.disposable_domains.extend(split_list(&list));
        }
        if let Some(host) = env_non_empty("TUNNISTAMO_APPLICATION_HOST") {
            config.application_host = application_host(Some(&host), None, None)?;
        }

        Ok(config)
    }

    /// Validity window of codes and links, clamped to
    /// `0..=MAX_CODE_TTL_MINUTES`.
    pub fn code_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.code_ttl_minutes.clamp(0, MAX_CODE_TTL_MINUTES))
    }

    /// Domain used for placeholder emails of `organization_host`.
    pub fn placeholder_domain<'a>(&'a self, organization_host: &'a str) -> &'a str {
        self.auto_email_domain
            .as_deref()
            .unwrap_or(organization_host)
    }

    /// Build the confirmation link carrying `token`.
    pub fn confirmation_url(&self, token: &str) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.application_host)?
            .join("/users/auth/tunnistamo/email_confirmations/confirm_with_token")?;
        url.query_pairs_mut()
            .append_pair("confirmation_token", token);
        Ok(url)
    }
}

/// Normalise the public base URL of the application.
///
/// Missing host → `http://localhost:3000`; a host without scheme gets
/// `protocol` (default https); standard ports are dropped.
pub fn application_host(
    host: Option<&str>,
    port: Option<u16>,
    protocol: Option<&str>,
) -> Result<String, ConfigError> {
    let (host, port) = match host.map(str::trim).filter(|h| !h.is_empty()) {
        None => ("http://localhost".to_string(), port.or(Some(3000))),
        Some(h) if h.starts_with("http://") || h.starts_with("https://") => (h.to_string(), port),
        Some(h) => (format!("{}://{h}", protocol.unwrap_or("https")), port),
    };

    let mut url = Url::parse(&host)?;
    if let Some(port) = port {
        let port = if port == 80 || port == 443 { None } else { Some(port) };
        url.set_port(port).map_err(|_| ConfigError::InvalidValue {
            key: "port".into(),
            message: format!("cannot set port on {host}"),
        })?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Resolve the secret: env var `SECRET_KEY_BASE` → persisted file → generated.
pub fn resolve_secret_key_base() -> String {
    if let Some(secret) = env_non_empty("SECRET_KEY_BASE") {
        return secret;
    }
    load_or_generate_secret(&secret_key_base_path())
}

/// Read the secret stored at `path`, generating and persisting one if absent.
pub fn load_or_generate_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, &secret);
    info!(path = %path.display(), "generated new secret key base");
    secret
}

/// Path to the persisted secret file.
fn secret_key_base_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunnistamo")
        .join("secret-key-base")
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a number, got '{value}'"),
    })
}

fn parse_ttl_minutes(key: &str, value: &str) -> Result<i64, ConfigError> {
    let minutes: i64 = parse_number(key, value)?;
    if !(1..=MAX_CODE_TTL_MINUTES).contains(&minutes) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected 1..={MAX_CODE_TTL_MINUTES} minutes, got {minutes}"),
        });
    }
    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TunnistamoConfig::new("secret");
        assert_eq!(config.provider, "tunnistamo");
        assert!(!config.confirm_emails);
        assert_eq!(config.code_ttl(), chrono::Duration::minutes(30));
        assert_eq!(config.max_confirmation_attempts, 20);
        assert!(config.disposable_domains.iter().any(|d| d == "mailinator.com"));
    }

    #[test]
    fn placeholder_domain_prefers_configured_domain() {
        let mut config = TunnistamoConfig::new("secret");
        assert_eq!(config.placeholder_domain("org.example"), "org.example");
        config.auto_email_domain = Some("auto.example".into());
        assert_eq!(config.placeholder_domain("org.example"), "auto.example");
    }

    #[test]
    fn application_host_defaults_to_localhost() {
        assert_eq!(
            application_host(None, None, None).unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn application_host_adds_scheme_and_drops_standard_ports() {
        assert_eq!(
            application_host(Some("decidim.example"), Some(443), None).unwrap(),
            "https://decidim.example"
        );
        assert_eq!(
            application_host(Some("decidim.example"), Some(8080), Some("http")).unwrap(),
            "http://decidim.example:8080"
        );
        assert_eq!(
            application_host(Some("https://decidim.example"), None, None).unwrap(),
            "https://decidim.example"
        );
    }

    #[test]
    fn confirmation_url_carries_token() {
        let mut config = TunnistamoConfig::new("secret");
        config.application_host = "https://decidim.example".into();
        let url = config.confirmation_url("tok en").unwrap();
        assert_eq!(url.host_str(), Some("decidim.example"));
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "confirmation_token").map(|(_, v)| v.into_owned()),
            Some("tok en".to_string())
        );
    }

    #[test]
    fn secret_is_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret-key-base");
        let first = load_or_generate_secret(&path);
        assert_eq!(first.len(), 64);
        let second = load_or_generate_secret(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        assert!(parse_bool("K", "maybe").is_err());
        assert!(parse_bool("K", "TRUE").unwrap());
        assert!(!parse_bool("K", "off").unwrap());
    }

    #[test]
    fn ttl_outside_range_is_rejected() {
        assert_eq!(parse_ttl_minutes("K", "45").unwrap(), 45);
        assert!(parse_ttl_minutes("K", "0").is_err());
        assert!(parse_ttl_minutes("K", "-5").is_err());
        assert!(parse_ttl_minutes("K", &i64::MAX.to_string()).is_err());
    }

    #[test]
    fn code_ttl_never_panics_on_extreme_values() {
        let mut config = TunnistamoConfig::new("secret");
        config.code_ttl_minutes = i64::MAX;
        assert_eq!(
            config.code_ttl(),
            chrono::Duration::minutes(MAX_CODE_TTL_MINUTES)
        );
        config.code_ttl_minutes = -10;
        assert_eq!(config.code_ttl(), chrono::Duration::zero());
    }

    #[test]
    fn split_list_trims_and_lowercases() {
        assert_eq!(split_list(" Suomi_FI, ,mfa "), vec!["suomi_fi", "mfa"]);
    }
}
