//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default wall-clock time of the morning invitation.
pub const DEFAULT_MORNING_TIME: &str = "08:00";

/// Process-wide configuration, built once at startup and handed to each
/// component by value.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token; the Telegram channel is disabled when absent.
    pub telegram_token: Option<SecretString>,
    /// Telegram usernames or numeric ids allowed to talk to the bot (`*` = all).
    pub telegram_allowed_users: Vec<String>,
    /// Synthesizer backend. `None` disables synthesis (fallbacks only).
    pub llm: Option<LlmConfig>,
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    /// libSQL file holding the user registry.
    pub db_path: PathBuf,
    /// Append-only journal file.
    pub journal_path: PathBuf,
    /// Directory for the rolling log file, if any.
    pub log_dir: Option<PathBuf>,
}

/// Flow engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single synthesizer call.
    pub synth_timeout: Duration,
    /// Upper bound on a single outbound send.
    pub send_timeout: Duration,
    /// Keep every registration instead of replacing the previous one.
    pub multi_user: bool,
    /// Store the raw answers under the summary of each journal entry.
    pub journal_raw_answers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synth_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(15),
            multi_user: false,
            journal_raw_answers: true,
        }
    }
}

/// Daily trigger configuration.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily invitation.
    pub morning_time: NaiveTime,
    /// How often the scheduler checks for due jobs.
    pub tick_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            tick_interval: Duration::from_secs(20),
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").map(SecretString::from);
        let telegram_allowed_users = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let llm = llm_from_lookup(&get)?;

        let morning = get("ALEX_MORNING_TIME").unwrap_or_else(|| DEFAULT_MORNING_TIME.to_string());
        let morning_time = parse_time_of_day(&morning).ok_or_else(|| ConfigError::InvalidValue {
            key: "ALEX_MORNING_TIME".into(),
            message: format!("expected HH:MM, got '{morning}'"),
        })?;

        let engine = EngineConfig {
            synth_timeout: parse_secs(&get, "ALEX_SYNTH_TIMEOUT_SECS", 30)?,
            send_timeout: parse_secs(&get, "ALEX_SEND_TIMEOUT_SECS", 15)?,
            multi_user: parse_bool(&get, "ALEX_MULTI_USER", false)?,
            journal_raw_answers: parse_bool(&get, "ALEX_JOURNAL_RAW_ANSWERS", true)?,
        };

        Ok(Self {
            telegram_token,
            telegram_allowed_users,
            llm,
            engine,
            schedule: ScheduleConfig {
                morning_time,
                ..ScheduleConfig::default()
            },
            db_path: get("ALEX_DB_PATH")
                .unwrap_or_else(|| "./data/alex.db".to_string())
                .into(),
            journal_path: get("ALEX_JOURNAL_PATH")
                .unwrap_or_else(|| "./data/diario.txt".to_string())
                .into(),
            log_dir: get("ALEX_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn llm_from_lookup<G>(get: &G) -> Result<Option<LlmConfig>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let backend = match get("ALEX_LLM_BACKEND").as_deref() {
        None => {
            if get("ANTHROPIC_API_KEY").is_some() {
                LlmBackend::Anthropic
            } else if get("OPENAI_API_KEY").is_some() {
                LlmBackend::OpenAi
            } else {
                return Ok(None);
            }
        }
        Some("anthropic") => LlmBackend::Anthropic,
        Some("openai") => LlmBackend::OpenAi,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: "ALEX_LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected anthropic or openai)"),
            });
        }
    };

    let (key_var, default_model) = match backend {
        LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
        LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
    };
    let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

    Ok(Some(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model: get("ALEX_MODEL").unwrap_or_else(|| default_model.to_string()),
    }))
}

/// Parse an `HH:MM` time of day.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

fn parse_secs<G>(get: &G, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a positive number of seconds, got '{raw}'"),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
        },
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert!(config.telegram_token.is_none());
        assert_eq!(config.telegram_allowed_users, vec!["*"]);
        assert!(config.llm.is_none());
        assert_eq!(config.schedule.morning_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(config.engine.synth_timeout, Duration::from_secs(30));
        assert!(!config.engine.multi_user);
        assert_eq!(config.journal_path, PathBuf::from("./data/diario.txt"));
    }

    #[test]
    fn anthropic_key_selects_backend() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "sk-ant-test")]).unwrap();
        let llm = config.llm.unwrap();
        assert_eq!(llm.backend, LlmBackend::Anthropic);
        assert_eq!(llm.api_key.expose_secret(), "sk-ant-test");
    }

    #[test]
    fn explicit_backend_requires_its_key() {
        let err = config_from(&[("ALEX_LLM_BACKEND", "openai")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn unknown_backend_rejected() {
        let err = config_from(&[("ALEX_LLM_BACKEND", "gemini")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn morning_time_parsed() {
        let config = config_from(&[("ALEX_MORNING_TIME", "07:30")]).unwrap();
        assert_eq!(config.schedule.morning_time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(config_from(&[("ALEX_MORNING_TIME", "8am")]).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(config_from(&[("ALEX_SYNTH_TIMEOUT_SECS", "0")]).is_err());
        let config = config_from(&[("ALEX_SEND_TIMEOUT_SECS", "5")]).unwrap();
        assert_eq!(config.engine.send_timeout, Duration::from_secs(5));
    }

    #[test]
    fn allowed_users_split_and_trimmed() {
        let config = config_from(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_ALLOWED_USERS", "alice, 42 ,,"),
            ("ALEX_MULTI_USER", "yes"),
        ])
        .unwrap();
        assert!(config.telegram_token.is_some());
        assert_eq!(config.telegram_allowed_users, vec!["alice", "42"]);
        assert!(config.engine.multi_user);
    }
}
