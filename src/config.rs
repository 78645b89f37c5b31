//! Configuration types.
//!
//! Everything is read from environment variables with sensible defaults.
//! Each settings struct also exposes `from_vars`, which takes a lookup
//! closure so tests never touch the process environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Default Azure OpenAI API version.
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Default model / deployment name.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default size of the per-entry synthesis worker pool.
pub const DEFAULT_WORKERS: usize = 5;

/// Connection settings for the text-inference backend.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    /// Base endpoint (Azure only).
    pub endpoint: Option<String>,
    pub api_key: SecretString,
    /// Azure `api-version` query parameter.
    pub api_version: String,
    /// Model name (OpenAI) or deployment name (Azure).
    pub model: String,
}

impl LlmSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match var("MAIL_ANALYZER_BACKEND")
            .unwrap_or_else(|| "azure".to_string())
            .to_lowercase()
            .as_str()
        {
            "azure" => LlmBackend::AzureOpenAi,
            "openai" => LlmBackend::OpenAi,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "MAIL_ANALYZER_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected azure or openai)"),
                });
            }
        };

        let (endpoint, key_var) = match backend {
            LlmBackend::AzureOpenAi => {
                let endpoint = var("AZURE_OPENAI_ENDPOINT")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnvVar("AZURE_OPENAI_ENDPOINT".into()))?;
                (Some(endpoint), "AZURE_OPENAI_API_KEY")
            }
            LlmBackend::OpenAi => (None, "OPENAI_API_KEY"),
        };

        let api_key = var(key_var)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.into()))?;

        let api_version =
            var("AZURE_OPENAI_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let model = var("AZURE_OPENAI_DEPLOYMENT")
            .or_else(|| var("MAIL_ANALYZER_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            backend,
            endpoint,
            api_key: SecretString::from(api_key),
            api_version,
            model,
        })
    }
}

/// Outbound call pacing and retry budget.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Requests per minute; 0 disables pacing.
    pub rpm: u32,
    /// Attempts per inference request (at least 1).
    pub max_retries: u32,
    /// Optional JSON-lines file receiving token usage records.
    pub usage_log: Option<PathBuf>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rpm: 60,
            max_retries: 3,
            usage_log: None,
        }
    }
}

impl RateLimitSettings {
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            rpm: parse_var(&var, "MAIL_ANALYZER_RPM")?.unwrap_or(defaults.rpm),
            max_retries: parse_var(&var, "MAIL_ANALYZER_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries)
                .max(1),
            usage_log: var("MAIL_ANALYZER_USAGE_LOG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Minimum spacing between outbound calls.
    pub fn min_interval(&self) -> Duration {
        if self.rpm == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(self.rpm))
        }
    }
}

/// Complete analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub llm: LlmSettings,
    pub rate_limit: RateLimitSettings,
    /// Directory scanned for `.eml` files.
    pub mail_dir: PathBuf,
    /// Output JSON document.
    pub output_json: PathBuf,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// Directory attachment payloads are written to before extraction.
    pub temp_dir: PathBuf,
    /// Worker pool size for per-entry synthesis.
    pub workers: usize,
}

impl AnalyzerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path_or = |key: &str, default: &str| {
            PathBuf::from(var(key).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            llm: LlmSettings::from_vars(&var)?,
            rate_limit: RateLimitSettings::from_vars(&var)?,
            mail_dir: path_or("MAIL_ANALYZER_MAIL_DIR", "mails"),
            output_json: path_or("MAIL_ANALYZER_OUTPUT", "output.json"),
            log_dir: path_or("MAIL_ANALYZER_LOG_DIR", "logs"),
            temp_dir: path_or("MAIL_ANALYZER_TEMP_DIR", "temp_attachments"),
            workers: parse_var(&var, "MAIL_ANALYZER_WORKERS")?
                .unwrap_or(DEFAULT_WORKERS)
                .max(1),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn azure_requires_endpoint() {
        let err = LlmSettings::from_vars(vars(&[("AZURE_OPENAI_API_KEY", "k")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "AZURE_OPENAI_ENDPOINT"));
    }

    #[test]
    fn azure_settings_with_defaults() {
        let settings = LlmSettings::from_vars(vars(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_API_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(settings.backend, LlmBackend::AzureOpenAi);
        assert_eq!(settings.api_version, DEFAULT_API_VERSION);
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.api_key.expose_secret(), "secret");
    }

    #[test]
    fn openai_backend_needs_only_key() {
        let settings = LlmSettings::from_vars(vars(&[
            ("MAIL_ANALYZER_BACKEND", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MAIL_ANALYZER_MODEL", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(settings.backend, LlmBackend::OpenAi);
        assert!(settings.endpoint.is_none());
        assert_eq!(settings.model, "gpt-4o");
    }

    #[test]
    fn unknown_backend_rejected() {
        let err = LlmSettings::from_vars(vars(&[("MAIL_ANALYZER_BACKEND", "bard")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rate_limit_interval_from_rpm() {
        let settings = RateLimitSettings::from_vars(vars(&[("MAIL_ANALYZER_RPM", "120")])).unwrap();
        assert_eq!(settings.min_interval(), Duration::from_millis(500));

        let unlimited = RateLimitSettings::from_vars(vars(&[("MAIL_ANALYZER_RPM", "0")])).unwrap();
        assert_eq!(unlimited.min_interval(), Duration::ZERO);
    }

    #[test]
    fn invalid_number_is_config_error() {
        let err =
            RateLimitSettings::from_vars(vars(&[("MAIL_ANALYZER_MAX_RETRIES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAIL_ANALYZER_MAX_RETRIES"));
    }

    #[test]
    fn analyzer_config_defaults() {
        let config = AnalyzerConfig::from_vars(vars(&[
            ("MAIL_ANALYZER_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MAIL_ANALYZER_WORKERS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.mail_dir, PathBuf::from("mails"));
        assert_eq!(config.output_json, PathBuf::from("output.json"));
        assert_eq!(config.workers, 1);
        assert_eq!(config.rate_limit.max_retries, 3);
        assert!(config.rate_limit.usage_log.is_none());
    }
}
