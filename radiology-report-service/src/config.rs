use anyhow::{Context, Result, bail};
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PROTOCOL_LIBRARY: &str = "protocols/library.yaml";

/// Runtime settings, read once at start-up.
#[derive(Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub protocol_library: PathBuf,
    pub database_url: Option<String>,
    pub port: u16,
    pub dynamic_follow_ups: bool,
    pub refine_questions: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(api_key) = get("OPENROUTER_API_KEY") else {
            bail!("OPENROUTER_API_KEY environment variable is required");
        };

        let temperature = match get("LLM_TEMPERATURE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("LLM_TEMPERATURE must be a number, got '{raw}'"))?,
            None => 0.2,
        };
        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid port, got '{raw}'"))?,
            None => 3000,
        };

        Ok(Self {
            api_key,
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature,
            protocol_library: get("PROTOCOL_LIBRARY")
                .unwrap_or_else(|| DEFAULT_PROTOCOL_LIBRARY.to_string())
                .into(),
            database_url: get("DATABASE_URL"),
            port,
            dynamic_follow_ups: flag(get("DYNAMIC_FOLLOW_UPS"), "DYNAMIC_FOLLOW_UPS")?,
            refine_questions: flag(get("REFINE_QUESTIONS"), "REFINE_QUESTIONS")?,
        })
    }

    /// Both optional question layers switched off.
    pub fn static_questions(&self) -> bool {
        !self.dynamic_follow_ups && !self.refine_questions
    }
}

fn flag(raw: Option<String>, key: &str) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(true);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be true or false, got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config =
            ServiceConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.port, 3000);
        assert_eq!(config.protocol_library, PathBuf::from(DEFAULT_PROTOCOL_LIBRARY));
        assert!(config.database_url.is_none());
        assert!(config.dynamic_follow_ups && config.refine_questions);
        assert!(!config.static_questions());
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "  ")]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn overrides_and_flags_are_parsed() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("LLM_MODEL", "anthropic/claude-3.5-haiku"),
            ("LLM_TEMPERATURE", "0"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/reports"),
            ("DYNAMIC_FOLLOW_UPS", "false"),
            ("REFINE_QUESTIONS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.model, "anthropic/claude-3.5-haiku");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/reports"));
        assert!(config.static_questions());
    }

    #[test]
    fn malformed_values_fail_loudly() {
        let bad_port = ServiceConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("PORT", "eighty"),
        ]));
        assert!(bad_port.is_err());

        let bad_flag = ServiceConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("REFINE_QUESTIONS", "sometimes"),
        ]));
        assert!(bad_flag.is_err());
    }
}
