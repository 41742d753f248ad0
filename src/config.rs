use crate::error::ConfigError;

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STATUS_LOG: &str = "call_status_log.csv";
pub const DEFAULT_MAX_EMPTY_TURNS: u32 = 3;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 600;

/// Everything read from the environment.  Credentials stay optional here; the
/// operation that needs them asks for a validated view and gets a `ConfigError`
/// naming every absent variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_timeout: Duration,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub webhook_url: Option<String>,
    pub port: u16,
    pub status_log: PathBuf,
    pub max_empty_turns: u32,
    pub session_idle: Duration,
}

/// Credentials and callback base required before a call can be originated.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub webhook_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // blank values are treated the same as unset ones
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_timeout: Duration::from_secs(parse_or(
                "OPENAI_TIMEOUT_SECS",
                get("OPENAI_TIMEOUT_SECS"),
                DEFAULT_OPENAI_TIMEOUT_SECS,
            )?),
            twilio_account_sid: get("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: get("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: get("TWILIO_PHONE_NUMBER"),
            webhook_url: get("WEBHOOK_URL").map(|u| u.trim_end_matches('/').to_string()),
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            status_log: get("CALL_STATUS_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_LOG)),
            max_empty_turns: parse_or(
                "MAX_EMPTY_TURNS",
                get("MAX_EMPTY_TURNS"),
                DEFAULT_MAX_EMPTY_TURNS,
            )?,
            session_idle: Duration::from_secs(parse_or(
                "SESSION_IDLE_SECS",
                get("SESSION_IDLE_SECS"),
                DEFAULT_SESSION_IDLE_SECS,
            )?),
        })
    }

    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::Missing(vec!["OPENAI_API_KEY"]))
    }

    /// Validate that every variable needed to originate a call is present.
    pub fn outbound(&self) -> Result<OutboundConfig, ConfigError> {
        let mut missing = vec![];
        if self.twilio_account_sid.is_none() {
            missing.push("TWILIO_ACCOUNT_SID");
        }
        if self.twilio_auth_token.is_none() {
            missing.push("TWILIO_AUTH_TOKEN");
        }
        if self.twilio_phone_number.is_none() {
            missing.push("TWILIO_PHONE_NUMBER");
        }
        if self.webhook_url.is_none() {
            missing.push("WEBHOOK_URL");
        }
        match (
            &self.twilio_account_sid,
            &self.twilio_auth_token,
            &self.twilio_phone_number,
            &self.webhook_url,
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number), Some(webhook_url)) => {
                Ok(OutboundConfig {
                    account_sid: account_sid.clone(),
                    auth_token: auth_token.clone(),
                    from_number: from_number.clone(),
                    webhook_url: webhook_url.clone(),
                })
            }
            _ => Err(ConfigError::Missing(missing)),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}
