//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use safelink_tracing::TracingConfig;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::link;
use crate::select::RoutingTarget;
use crate::signing;

/// Placeholder used when no secret is configured. Production deployments
/// must always supply a real secret explicitly.
pub const INSECURE_PLACEHOLDER_SECRET: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SafelinkConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Link-signing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// 64 hex characters. Absent → the insecure all-zero placeholder
    /// (a startup warning is logged). Malformed → hard startup error.
    /// Can also be set via CLI `--secret`.
    pub secret: Option<String>,

    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: i64,
}

/// Decision-engine configuration: flags, allow-list, rule type, targets.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_true")]
    pub system_on: bool,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default = "default_rule_type")]
    pub rule_type: String,

    /// Seconds to stay muted per duty cycle.
    #[serde(default = "default_duration")]
    pub mute_duration: i64,

    /// Seconds to stay unmuted per duty cycle.
    #[serde(default = "default_duration")]
    pub unmute_duration: i64,

    /// Lowercase ISO-2 codes; empty list allows every country.
    #[serde(default)]
    pub allowed_countries: Vec<String>,

    #[serde(default)]
    pub flag_wap: bool,
    #[serde(default)]
    pub flag_vpn: bool,
    #[serde(default)]
    pub flag_proxy: bool,
    #[serde(default)]
    pub flag_bot: bool,

    /// Candidate destinations, evaluated per decision request.
    #[serde(default)]
    pub targets: Vec<RoutingTarget>,
}

/// State-file location for the mute/unmute duty cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Can also be set via CLI `--state-file`.
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:3090".to_string()
}

fn default_ttl_minutes() -> i64 {
    link::DEFAULT_TTL_MINUTES
}

fn default_rule_type() -> String {
    "static_route".to_string()
}

fn default_duration() -> i64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_state_file() -> String {
    "safelink_state.json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            system_on: true,
            is_active: true,
            rule_type: default_rule_type(),
            mute_duration: default_duration(),
            unmute_duration: default_duration(),
            allowed_countries: Vec::new(),
            flag_wap: false,
            flag_vpn: false,
            flag_proxy: false,
            flag_bot: false,
            targets: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: None,
            default_ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl SigningConfig {
    /// The effective secret: configured value or the insecure placeholder.
    pub fn effective_secret(&self) -> &str {
        self.secret.as_deref().unwrap_or(INSECURE_PLACEHOLDER_SECRET)
    }

    pub fn is_placeholder(&self) -> bool {
        self.secret.is_none()
    }
}

impl SafelinkConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SAFELINK_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: SafelinkConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SAFELINK_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Validate everything that must fail loudly at startup: secret format,
    /// target URLs, target weights, duty-cycle durations.
    pub fn validate(&self) -> Result<()> {
        if let Some(secret) = self.signing.secret.as_deref() {
            signing::decode_secret(secret)?;
        }

        for target in &self.routing.targets {
            link::validate_http_url(&target.url)?;
            if target.weight == 0 {
                return Err(Error::Validation(format!(
                    "target {} has zero weight; weights must be positive",
                    target.url
                )));
            }
        }

        if self.routing.mute_duration <= 0 || self.routing.unmute_duration <= 0 {
            return Err(Error::Validation(
                "mute_duration and unmute_duration must be positive seconds".to_string(),
            ));
        }

        if self.signing.default_ttl_minutes <= 0 {
            return Err(Error::Validation(
                "default_ttl_minutes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Allowed countries normalized to lowercase for gate comparison.
    pub fn allowed_countries_lower(&self) -> Vec<String> {
        self.routing
            .allowed_countries
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SafelinkConfig {
        SafelinkConfig {
            server: ServerConfig::default(),
            signing: SigningConfig::default(),
            routing: RoutingConfig::default(),
            storage: StorageConfig::default(),
            tracing: TracingConfig::default(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_placeholder_secret_when_absent() {
        let config = base_config();
        assert!(config.signing.is_placeholder());
        assert_eq!(
            config.signing.effective_secret(),
            INSECURE_PLACEHOLDER_SECRET
        );
        // The placeholder itself is a structurally valid key
        assert!(signing::decode_secret(config.signing.effective_secret()).is_ok());
    }

    #[test]
    fn test_malformed_secret_is_hard_error() {
        let mut config = base_config();
        config.signing.secret = Some("deadbeef".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_target_url_rejected() {
        let mut config = base_config();
        config.routing.targets = vec![RoutingTarget {
            url: "ftp://example.com".to_string(),
            weight: 1,
            priority: 1,
            active: true,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let mut config = base_config();
        config.routing.targets = vec![RoutingTarget {
            url: "https://example.com".to_string(),
            weight: 0,
            priority: 1,
            active: true,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allowed_countries_normalized() {
        let mut config = base_config();
        config.routing.allowed_countries =
            vec![" US ".to_string(), "id".to_string(), "".to_string()];
        assert_eq!(
            config.allowed_countries_lower(),
            vec!["us".to_string(), "id".to_string()]
        );
    }

    #[test]
    fn test_nonpositive_durations_rejected() {
        let mut config = base_config();
        config.routing.mute_duration = 0;
        assert!(config.validate().is_err());
    }
}
