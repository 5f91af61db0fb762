use chrono::Duration;
use persistence::db::DatabaseConfig;
use serde::Deserialize;

use crate::logging::LoggingConfig;

/// Plain environment variables accepted for the review code lists.
pub const BYPASS_CODES_ENV: &str = "REVIEW_BYPASS_CODES";
pub const REJECT_CODES_ENV: &str = "REVIEW_REJECT_CODES";

/// Prefixed forms of the review code lists.
const PREFIXED_BYPASS_CODES_ENV: &str = "REG__REVIEW__BYPASS_CODES";
const PREFIXED_REJECT_CODES_ENV: &str = "REG__REVIEW__REJECT_CODES";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Invitation codes that short-circuit registration review
    #[serde(default)]
    pub review: ReviewCodesConfig,
}

/// Review policy attached to a configured invitation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewPolicy {
    /// Registrations using the code are approved without manual review.
    AutoApprove,
    /// Registrations using the code are rejected without manual review.
    AutoReject,
}

impl ReviewPolicy {
    /// Policies in the order they are seeded.
    pub const ALL: [ReviewPolicy; 2] = [ReviewPolicy::AutoApprove, ReviewPolicy::AutoReject];

    pub fn label(&self) -> &'static str {
        match self {
            ReviewPolicy::AutoApprove => "auto-approve",
            ReviewPolicy::AutoReject => "auto-reject",
        }
    }

    /// Notes stored on codes seeded for this policy.
    pub fn notes(&self) -> &'static str {
        match self {
            ReviewPolicy::AutoApprove => "auto-approve review code",
            ReviewPolicy::AutoReject => "auto-reject review code",
        }
    }

    /// Environment variable holding this policy's code list.
    pub fn env_key(&self) -> &'static str {
        match self {
            ReviewPolicy::AutoApprove => BYPASS_CODES_ENV,
            ReviewPolicy::AutoReject => REJECT_CODES_ENV,
        }
    }
}

impl std::fmt::Display for ReviewPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewCodesConfig {
    /// Codes whose registrations are approved automatically
    #[serde(default)]
    pub bypass_codes: Vec<String>,

    /// Codes whose registrations are rejected automatically
    #[serde(default)]
    pub reject_codes: Vec<String>,

    /// Days a seeded or reset code stays valid (default: 30)
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
}

fn default_validity_days() -> i64 {
    domain::models::DEFAULT_VALIDITY_DAYS
}

impl ReviewCodesConfig {
    /// Build a config from explicit lists with the default validity.
    pub fn new(bypass_codes: Vec<String>, reject_codes: Vec<String>) -> Self {
        Self {
            bypass_codes,
            reject_codes,
            validity_days: default_validity_days(),
        }
    }

    /// Configured codes for a policy: trimmed, blanks dropped, first occurrence kept.
    pub fn codes_for(&self, policy: ReviewPolicy) -> Vec<String> {
        let raw = match policy {
            ReviewPolicy::AutoApprove => &self.bypass_codes,
            ReviewPolicy::AutoReject => &self.reject_codes,
        };

        let mut codes: Vec<String> = Vec::with_capacity(raw.len());
        for code in raw.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !codes.iter().any(|seen| seen == code) {
                codes.push(code.to_string());
            }
        }
        codes
    }

    /// The review policy a code is configured for, if any.
    pub fn policy_for(&self, code: &str) -> Option<ReviewPolicy> {
        ReviewPolicy::ALL
            .into_iter()
            .find(|policy| self.codes_for(*policy).iter().any(|c| c == code))
    }

    pub fn validity_window(&self) -> Duration {
        Duration::days(self.validity_days)
    }
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parses a code list given either as a JSON array or comma-separated.
///
/// A value starting with `[` must be a JSON array of strings.
pub fn parse_code_list(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed);
    }
    Ok(trimmed
        .split(',')
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty())
        .collect())
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration (optional)
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with REG__ prefix
    /// 4. REVIEW_BYPASS_CODES / REVIEW_REJECT_CODES
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_env(std::env::vars().collect())
    }

    /// Same as [`Config::load`], reading variables from `env` instead of the
    /// process environment.
    ///
    /// The code lists are always taken as strings, so a single numeric code
    /// such as `123456` stays a code.
    pub fn load_from_env(env: config::Map<String, String>) -> Result<Self, config::ConfigError> {
        let bypass = code_list_var(&env, BYPASS_CODES_ENV, PREFIXED_BYPASS_CODES_ENV);
        let reject = code_list_var(&env, REJECT_CODES_ENV, PREFIXED_REJECT_CODES_ENV);

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("REG")
                    .separator("__")
                    .source(Some(env)),
            );

        let builder = with_code_list_overrides(builder, bypass, reject)?;

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files or the process environment.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [database]
            url = ""
            max_connections = 2
            min_connections = 1
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "compact"

            [review]
            bypass_codes = []
            reject_codes = []
            validity_days = 30
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "REG__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.review.validity_days <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "review.validity_days must be positive".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty" | "compact") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "logging.format must be json, pretty or compact (got {:?})",
                self.logging.format
            )));
        }

        let bypass = self.review.codes_for(ReviewPolicy::AutoApprove);
        let overlapping: Vec<String> = self
            .review
            .codes_for(ReviewPolicy::AutoReject)
            .into_iter()
            .filter(|code| bypass.contains(code))
            .collect();
        if !overlapping.is_empty() {
            return Err(ConfigValidationError::InvalidValue(format!(
                "codes configured for both {} and {}: {}",
                BYPASS_CODES_ENV,
                REJECT_CODES_ENV,
                overlapping.join(", ")
            )));
        }

        Ok(())
    }
}

/// The raw list for one policy: the plain variable wins over the prefixed one.
fn code_list_var(
    env: &config::Map<String, String>,
    plain: &'static str,
    prefixed: &'static str,
) -> Option<(&'static str, String)> {
    env.get(plain)
        .map(|raw| (plain, raw.clone()))
        .or_else(|| env.get(prefixed).map(|raw| (prefixed, raw.clone())))
}

fn parse_code_list_var(
    var: Option<(&'static str, String)>,
) -> Result<Option<Vec<String>>, config::ConfigError> {
    var.map(|(name, raw)| {
        parse_code_list(&raw).map_err(|e| {
            config::ConfigError::Message(
                ConfigValidationError::InvalidValue(format!(
                    "{} is not a valid JSON list of codes: {}",
                    name, e
                ))
                .to_string(),
            )
        })
    })
    .transpose()
}

/// Applies the review code list variables on top of the layered sources.
fn with_code_list_overrides(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    bypass: Option<(&'static str, String)>,
    reject: Option<(&'static str, String)>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_override_option("review.bypass_codes", parse_code_list_var(bypass)?)?
        .set_override_option("review.reject_codes", parse_code_list_var(reject)?)
}
