//! Configuration types.
//!
//! Everything is driven by `WARRANTY_DESK_*` environment variables with
//! working defaults, so a bare `warranty-desk intake` run against the
//! bundled data directory needs no setup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// How outbound mail is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Record the dispatch, contact nothing. The safe default.
    Manual,
    /// Deliver via SMTP.
    Smtp,
}

/// SMTP transport settings (only used when `SendMode::Smtp`).
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Company identity used in customer-facing artifacts.
#[derive(Debug, Clone)]
pub struct CompanyIdentity {
    pub name: String,
    pub support_email: String,
    pub support_phone: String,
}

impl Default for CompanyIdentity {
    fn default() -> Self {
        Self {
            name: "Meridian Appliance Co.".to_string(),
            support_email: "warranty@meridianappliance.example".to_string(),
            support_phone: "1-800-MERIDIAN".to_string(),
        }
    }
}

/// Which LLM backend to use for the reasoning capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonerBackend {
    Anthropic,
    OpenAi,
    /// No model: deterministic fallbacks only.
    Offline,
}

/// Reasoning-capability settings.
#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    pub backend: ReasonerBackend,
    pub api_key: SecretString,
    pub model: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Inbox directory of raw message JSON files.
    pub inbox_dir: PathBuf,
    /// Product catalog JSON file.
    pub products_file: PathBuf,
    /// Directory of policy text documents.
    pub policies_dir: PathBuf,
    /// Policy index JSON file (metadata per policy document).
    pub policy_index_file: PathBuf,
    /// Root for generated artifacts (packets, drafts, labels, logs).
    pub outbox_dir: PathBuf,
    /// libSQL database file (checkpoints, dispatch ledger, audit rows).
    pub db_path: PathBuf,
    /// Warranty window in days.
    pub warranty_days: i64,
    /// Upper bound on a single reasoning call.
    pub llm_timeout: Duration,
    /// Outbound delivery mode.
    pub send_mode: SendMode,
    /// Envelope sender for outbound mail.
    pub sender_address: String,
    pub smtp: Option<SmtpConfig>,
    pub company: CompanyIdentity,
    pub reasoner: ReasonerConfig,
}

impl AppConfig {
    /// Build a config rooted at `data_root`, with defaults for everything else.
    pub fn for_root(data_root: PathBuf) -> Self {
        let company = CompanyIdentity::default();
        Self {
            inbox_dir: data_root.join("inbox"),
            products_file: data_root.join("products.json"),
            policies_dir: data_root.join("policies"),
            policy_index_file: data_root.join("policies").join("index.json"),
            outbox_dir: data_root.join("outbox"),
            db_path: data_root.join("outbox").join("claims.db"),
            warranty_days: 90,
            llm_timeout: Duration::from_secs(60),
            send_mode: SendMode::Manual,
            sender_address: company.support_email.clone(),
            smtp: None,
            company,
            reasoner: ReasonerConfig {
                backend: ReasonerBackend::Offline,
                api_key: SecretString::from(String::new()),
                model: String::new(),
            },
        }
    }

    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_root = PathBuf::from(env_or("WARRANTY_DESK_DATA", "./data"));
        let mut config = Self::for_root(data_root);

        if let Ok(outbox) = std::env::var("WARRANTY_DESK_OUTBOX") {
            config.outbox_dir = PathBuf::from(&outbox);
            config.db_path = PathBuf::from(&outbox).join("claims.db");
        }
        if let Ok(db) = std::env::var("WARRANTY_DESK_DB_PATH") {
            config.db_path = PathBuf::from(db);
        }

        if let Ok(days) = std::env::var("WARRANTY_DESK_WARRANTY_DAYS") {
            config.warranty_days =
                days.parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "WARRANTY_DESK_WARRANTY_DAYS".to_string(),
                        message: format!("not a number: {days}"),
                    })?;
        }

        if let Ok(secs) = std::env::var("WARRANTY_DESK_LLM_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "WARRANTY_DESK_LLM_TIMEOUT_SECS".to_string(),
                message: format!("not a number: {secs}"),
            })?;
            config.llm_timeout = Duration::from_secs(secs);
        }

        if let Ok(name) = std::env::var("WARRANTY_DESK_COMPANY_NAME") {
            config.company.name = name;
        }
        if let Ok(email) = std::env::var("WARRANTY_DESK_SUPPORT_EMAIL") {
            config.company.support_email = email.clone();
            config.sender_address = email;
        }
        if let Ok(phone) = std::env::var("WARRANTY_DESK_SUPPORT_PHONE") {
            config.company.support_phone = phone;
        }
        if let Ok(from) = std::env::var("WARRANTY_DESK_EMAIL_FROM") {
            config.sender_address = from;
        }

        config.send_mode = match env_or("WARRANTY_DESK_SEND_MODE", "manual").as_str() {
            "manual" | "" => SendMode::Manual,
            "smtp" => SendMode::Smtp,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "WARRANTY_DESK_SEND_MODE".to_string(),
                    message: format!("expected manual|smtp, got {other}"),
                });
            }
        };

        if config.send_mode == SendMode::Smtp {
            let host = std::env::var("SMTP_HOST")
                .map_err(|_| ConfigError::MissingEnvVar("SMTP_HOST".to_string()))?;
            let port: u16 = env_or("SMTP_PORT", "587")
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "SMTP_PORT".to_string(),
                    message: "not a port number".to_string(),
                })?;
            config.smtp = Some(SmtpConfig {
                host,
                port,
                username: env_or("SMTP_USERNAME", ""),
                password: SecretString::from(env_or("SMTP_PASSWORD", "")),
            });
        }

        config.reasoner = reasoner_from_env();
        Ok(config)
    }
}

/// Pick the reasoning backend from available API keys.
///
/// `ANTHROPIC_API_KEY` wins over `OPENAI_API_KEY`; with neither set the
/// desk runs offline on deterministic fallbacks.
fn reasoner_from_env() -> ReasonerConfig {
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        return ReasonerConfig {
            backend: ReasonerBackend::Anthropic,
            api_key: SecretString::from(key),
            model: env_or("WARRANTY_DESK_MODEL", "claude-sonnet-4-20250514"),
        };
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        return ReasonerConfig {
            backend: ReasonerBackend::OpenAi,
            api_key: SecretString::from(key),
            model: env_or("WARRANTY_DESK_MODEL", "gpt-4o"),
        };
    }
    ReasonerConfig {
        backend: ReasonerBackend::Offline,
        api_key: SecretString::from(String::new()),
        model: String::new(),
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_root_derives_paths() {
        let config = AppConfig::for_root(PathBuf::from("/tmp/wd"));
        assert_eq!(config.inbox_dir, PathBuf::from("/tmp/wd/inbox"));
        assert_eq!(config.policy_index_file, PathBuf::from("/tmp/wd/policies/index.json"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/wd/outbox/claims.db"));
        assert_eq!(config.warranty_days, 90);
        assert_eq!(config.send_mode, SendMode::Manual);
    }

    #[test]
    fn default_reasoner_is_offline() {
        let config = AppConfig::for_root(PathBuf::from("/tmp/wd"));
        assert_eq!(config.reasoner.backend, ReasonerBackend::Offline);
    }
}
