use std::num::NonZeroUsize;

use chrono::Utc;
use log::{debug, error, info, warn};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PollerConfig;
use crate::confirmer::Confirm;
use crate::email::EmailMessage;
use crate::error::{Error, Result};
use crate::extractor::extract_url;
use crate::imap_client::MailSource;
use crate::status::{MessageKind, MessageResult, Status};

/// What happened to one message, as returned by `/trigger_once`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    pub uid: u32,
    pub ok: bool,
    pub info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub results: Vec<MessageReport>,
}

type TriggerReply = oneshot::Sender<Result<CycleReport>>;

/// Cloneable way to ask the running poller for an immediate cycle
#[derive(Debug, Clone)]
pub struct PollerHandle {
    triggers: mpsc::Sender<TriggerReply>,
}

impl PollerHandle {
    /// Run one cycle now and wait for its report
    pub async fn trigger_once(&self) -> Result<CycleReport> {
        let (reply, response) = oneshot::channel();
        self.triggers
            .send(reply)
            .await
            .map_err(|_| Error::PollerUnavailable("poller task has stopped".to_string()))?;

        response
            .await
            .map_err(|_| Error::PollerUnavailable("poller dropped the request".to_string()))?
    }
}

/// Fetch → extract → confirm loop over one mailbox
pub struct Poller<M, C> {
    source: M,
    confirmer: C,
    status: Status,
    config: PollerConfig,
    confirmed_ids: Option<LruCache<String, ()>>,
}

impl<M, C> Poller<M, C>
where
    M: MailSource + 'static,
    C: Confirm + 'static,
{
    pub fn new(source: M, confirmer: C, status: Status, config: PollerConfig) -> Self {
        let confirmed_ids = NonZeroUsize::new(config.dedupe_capacity).map(LruCache::new);

        Poller {
            source,
            confirmer,
            status,
            config,
            confirmed_ids,
        }
    }

    /// Start the loop on its own task. It stops once `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> (JoinHandle<()>, PollerHandle) {
        let (triggers, requests) = mpsc::channel(8);
        let task = tokio::spawn(self.run(requests, shutdown));
        (task, PollerHandle { triggers })
    }

    async fn run(mut self, mut requests: mpsc::Receiver<TriggerReply>, shutdown: CancellationToken) {
        info!(
            "🔄 Poller started (interval {:.1}s{})",
            self.config.interval.as_secs_f64(),
            if self.config.dry_run { ", dry-run" } else { "" }
        );
        self.status.set_running(true);

        // Errors are recorded into the status by run_cycle itself
        let _ = self.run_cycle().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    let _ = self.run_cycle().await;
                }
                Some(reply) = requests.recv() => {
                    info!("⚡ Cycle triggered on demand");
                    let report = self.run_cycle().await;
                    if reply.send(report).is_err() {
                        debug!("Trigger requester went away before the report was ready");
                    }
                }
            }
        }

        self.close().await;
        info!("Poller stopped");
    }

    /// Log out of the mailbox and flag the worker as stopped
    pub async fn close(&mut self) {
        self.source.close().await;
        self.status.set_running(false);
    }

    /// One poll cycle. A fetch failure ends the cycle early and is recorded
    /// as the latest error, the counters are left untouched.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        debug!("Poll cycle starting");

        let messages = match self.source.fetch_candidates().await {
            Ok(messages) => messages,
            Err(e) => {
                error!("❌ Poll cycle aborted: {}", e);
                self.status.finish_cycle(Utc::now(), Some(e.to_string()));
                return Err(e);
            }
        };

        let mut report = CycleReport::default();
        for (index, message) in messages.into_iter().enumerate() {
            if index > 0 && !self.config.message_pause.is_zero() {
                tokio::time::sleep(self.config.message_pause).await;
            }
            report.results.push(self.handle_message(message).await);
        }

        self.status.finish_cycle(Utc::now(), None);

        if !report.results.is_empty() {
            let confirmed = report.results.iter().filter(|r| r.ok).count();
            info!(
                "✅ Cycle done: {} message(s) handled, {} confirmed",
                report.results.len(),
                confirmed
            );
        }

        Ok(report)
    }

    async fn handle_message(&mut self, message: EmailMessage) -> MessageReport {
        let uid = message.uid;
        debug!("Handling UID {} from {} ({})", uid, message.sender, message.subject);

        let (kind, info, error) = if self.already_confirmed(&message) {
            info!("Message UID {} was already confirmed, skipping", uid);
            (MessageKind::Skipped, "already-confirmed".to_string(), None)
        } else {
            match message.body.as_deref().map(extract_url) {
                None => (MessageKind::Skipped, "no-body".to_string(), None),
                Some(None) => {
                    info!("No confirmation link in UID {} ({})", uid, message.subject);
                    (MessageKind::Skipped, "no-link".to_string(), None)
                }
                Some(Some(url)) if self.config.dry_run => {
                    info!("🧪 Dry run, would confirm UID {} via {}", uid, url);
                    (MessageKind::Skipped, format!("dry-run,url={}", url), None)
                }
                Some(Some(url)) => {
                    let outcome = self.confirmer.confirm(&url).await;
                    if outcome.is_success() {
                        self.remember(&message);
                        (MessageKind::Confirmed, outcome.info(), None)
                    } else {
                        let error = format!("confirmation of UID {} failed: {}", uid, outcome.info());
                        (MessageKind::Failed, outcome.info(), Some(error))
                    }
                }
            }
        };

        if !self.config.dry_run {
            if let Err(e) = self.source.mark_processed(uid).await {
                warn!("⚠️  Unable to mark UID {} as processed: {}", uid, e);
            }
        }

        let ok = kind == MessageKind::Confirmed;
        info!("Processed UID {} -> {}", uid, info);

        self.status.record_message(
            kind,
            MessageResult {
                uid,
                ok,
                info: info.clone(),
                ts: Utc::now(),
            },
            error,
        );

        MessageReport { uid, ok, info }
    }

    fn already_confirmed(&self, message: &EmailMessage) -> bool {
        match (&self.confirmed_ids, message.dedupe_key()) {
            (Some(ids), Some(key)) => ids.contains(key),
            _ => false,
        }
    }

    fn remember(&mut self, message: &EmailMessage) {
        if let (Some(ids), Some(key)) = (self.confirmed_ids.as_mut(), message.dedupe_key()) {
            ids.put(key.to_string(), ());
        }
    }
}
