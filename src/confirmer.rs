use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use log::{info, warn};
use reqwest::{redirect, Client, ClientBuilder};

use crate::config::ConfirmConfig;
use crate::error::{Error, Result};

const MAX_REDIRECTS: usize = 10;

/// Result of one confirmation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The endpoint answered with a 2xx status
    Success { status: u16, final_url: String },
    /// Non-2xx status, timeout, connection error or redirect loop
    Failure { status: Option<u16>, reason: String },
}

impl ConfirmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConfirmOutcome::Success { .. })
    }

    /// Short description kept in the status report
    pub fn info(&self) -> String {
        match self {
            ConfirmOutcome::Success { status, final_url } => {
                format!("status={},final={}", status, final_url)
            }
            ConfirmOutcome::Failure { status: Some(status), reason } => {
                format!("status={},error={}", status, reason)
            }
            ConfirmOutcome::Failure { status: None, reason } => format!("error={}", reason),
        }
    }
}

/// Anything able to follow a confirmation link
pub trait Confirm: Send + Sync {
    fn confirm<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = ConfirmOutcome> + Send + 'a>>;
}

/// Follows confirmation links with a plain HTTP GET
pub struct HttpConfirmer {
    client: Client,
    timeout: Duration,
}

impl HttpConfirmer {
    pub fn new(config: &ConfirmConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::Confirmation(format!("unable to build HTTP client: {}", e)))?;

        Ok(HttpConfirmer {
            client,
            timeout: config.timeout,
        })
    }

    async fn get(&self, url: &str) -> ConfirmOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timed out after {}s", self.timeout.as_secs())
                } else if e.is_redirect() {
                    "too many redirects".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                warn!("❌ GET {} failed: {}", url, reason);
                return ConfirmOutcome::Failure { status: None, reason };
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        info!("GET {} -> {} (final: {})", url, status.as_u16(), final_url);

        if status.is_success() {
            ConfirmOutcome::Success {
                status: status.as_u16(),
                final_url,
            }
        } else {
            ConfirmOutcome::Failure {
                status: Some(status.as_u16()),
                reason: format!("unexpected status {}", status),
            }
        }
    }
}

impl Confirm for HttpConfirmer {
    fn confirm<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = ConfirmOutcome> + Send + 'a>> {
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_info() {
        let ok = ConfirmOutcome::Success {
            status: 200,
            final_url: "https://www.pinterest.com/".to_string(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.info(), "status=200,final=https://www.pinterest.com/");

        let failed = ConfirmOutcome::Failure {
            status: Some(500),
            reason: "unexpected status 500 Internal Server Error".to_string(),
        };
        assert!(!failed.is_success());
        assert!(failed.info().starts_with("status=500,error="));

        let timeout = ConfirmOutcome::Failure {
            status: None,
            reason: "timed out after 20s".to_string(),
        };
        assert_eq!(timeout.info(), "error=timed out after 20s");
    }

    #[test]
    fn test_client_builds_from_config() {
        let config = ConfirmConfig {
            timeout: Duration::from_secs(5),
            user_agent: "pin-autoconfirm-test".to_string(),
        };
        assert!(HttpConfirmer::new(&config).is_ok());
    }
}
