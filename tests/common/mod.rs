//! Common test utilities and fixtures

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pin_autoconfirm::config::{ConfirmConfig, PollerConfig};
use pin_autoconfirm::email::EmailMessage;
use pin_autoconfirm::error::{Error, Result};
use pin_autoconfirm::imap_client::MailSource;
use pin_autoconfirm::status::{Status, StatusSnapshot};

/// Mail source returning one scripted answer per cycle, then empty cycles
#[derive(Default)]
pub struct FakeMailbox {
    cycles: VecDeque<Result<Vec<EmailMessage>>>,
    pub marked: Arc<Mutex<Vec<u32>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_messages(mut self, messages: Vec<EmailMessage>) -> Self {
        self.cycles.push_back(Ok(messages));
        self
    }

    pub fn then_error(mut self, error: Error) -> Self {
        self.cycles.push_back(Err(error));
        self
    }

    pub fn marked(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.marked)
    }
}

impl MailSource for FakeMailbox {
    fn fetch_candidates<'a>(&'a mut self)
        -> Pin<Box<dyn Future<Output = Result<Vec<EmailMessage>>> + Send + 'a>> {
        Box::pin(async move { self.cycles.pop_front().unwrap_or_else(|| Ok(Vec::new())) })
    }

    fn mark_processed<'a>(&'a mut self, uid: u32)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.marked.lock().unwrap().push(uid);
            Ok(())
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            *self.closed.lock().unwrap() = true;
        })
    }
}

/// Candidate message with the given body
pub fn message(uid: u32, body: &str) -> EmailMessage {
    EmailMessage {
        uid,
        message_id: Some(format!("msg-{}@pinterest.com", uid)),
        sender: "Pinterest <no-reply@pinterest.com>".to_string(),
        subject: "Someone wants to follow you".to_string(),
        body: Some(body.to_string()),
    }
}

/// Body carrying a confirmation link pointing at `base`
pub fn confirm_body(base: &str, token: &str) -> String {
    format!("Please confirm: {}/confirm/{} Thanks", base, token)
}

pub fn poller_config(interval: Duration) -> PollerConfig {
    PollerConfig {
        interval,
        message_pause: Duration::ZERO,
        dedupe_capacity: 16,
        dry_run: false,
    }
}

pub fn confirm_config(timeout: Duration) -> ConfirmConfig {
    ConfirmConfig {
        timeout,
        user_agent: "pin-autoconfirm-tests/1.0".to_string(),
    }
}

/// Poll the status until `predicate` holds, panics after `timeout`
pub async fn wait_for<F>(status: &Status, timeout: Duration, predicate: F) -> StatusSnapshot
where
    F: Fn(&StatusSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = status.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}, last status: {:?}", timeout, snapshot);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
