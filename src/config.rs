use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub confirm: ConfirmConfig,
    pub poller: PollerConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    /// Where handled messages are moved; `None` leaves them in place
    pub processed_folder: Option<String>,
    pub sender_filter: Option<String>,
    pub subject_filter: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConfirmConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub message_pause: Duration,
    /// Size of the in-memory set of confirmed message ids, 0 disables it
    pub dedupe_capacity: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load the configuration from the process environment
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::check_required_env_vars(&lookup)?;

        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} must be set", key)))
        };
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_interval: f64 = parse_var(&lookup, "POLL_INTERVAL", 1.0)?;
        // Negative, NaN, infinite and out-of-range values all fail the conversion
        let interval = Duration::try_from_secs_f64(poll_interval)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                Error::Config(format!(
                    "POLL_INTERVAL must be a positive number of seconds, got {}",
                    poll_interval
                ))
            })?;

        let imap_timeout: u64 = parse_var(&lookup, "IMAP_TIMEOUT_SECS", 30)?;
        let confirm_timeout: u64 = parse_var(&lookup, "CONFIRM_TIMEOUT_SECS", 20)?;
        if imap_timeout == 0 || confirm_timeout == 0 {
            return Err(Error::Config("timeouts must be at least one second".to_string()));
        }

        // An explicitly empty PROCESSED_FOLDER disables the move
        let processed_folder = match lookup("PROCESSED_FOLDER") {
            Some(folder) => Some(folder.trim().to_string()).filter(|f| !f.is_empty()),
            None => Some("Processed".to_string()),
        };

        Ok(Config {
            imap: ImapConfig {
                server: required("IMAP_HOST")?,
                port: parse_var(&lookup, "IMAP_PORT", 993)?,
                username: required("IMAP_USER")?,
                password: required("IMAP_PASS")?,
                mailbox: optional("MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
                processed_folder,
                sender_filter: optional("SENDER_FILTER"),
                subject_filter: optional("SUBJECT_FILTER"),
                timeout: Duration::from_secs(imap_timeout),
            },
            confirm: ConfirmConfig {
                timeout: Duration::from_secs(confirm_timeout),
                user_agent: optional("CONFIRM_USER_AGENT")
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            },
            poller: PollerConfig {
                interval,
                message_pause: Duration::from_millis(parse_var(&lookup, "MESSAGE_PAUSE_MS", 500)?),
                dedupe_capacity: parse_var(&lookup, "DEDUPE_CAPACITY", 1024)?,
                dry_run: false,
            },
            http: HttpConfig {
                host: optional("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_var(&lookup, "PORT", 5000)?,
            },
        })
    }

    fn check_required_env_vars<F>(lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required_vars = ["IMAP_HOST", "IMAP_USER", "IMAP_PASS"];

        let missing_vars: Vec<&str> = required_vars
            .iter()
            .copied()
            .filter(|var| lookup(*var).map_or(true, |v| v.trim().is_empty()))
            .collect();

        if !missing_vars.is_empty() {
            return Err(Error::Config(format!(
                "missing environment variables: {}\n\
                 \n\
                 Set them in a .env file next to the binary or export them:\n\
                 \x20   export IMAP_HOST=imap.example.com\n\
                 \x20   export IMAP_USER=pin@example.com\n\
                 \x20   export IMAP_PASS=secret",
                missing_vars.join(", ")
            )));
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid value '{}' for {}: {}", raw, key, e))),
        None => Ok(default),
    }
}
