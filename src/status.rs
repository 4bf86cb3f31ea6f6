use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of the most recently handled message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageResult {
    pub uid: u32,
    pub ok: bool,
    pub info: String,
    pub ts: DateTime<Utc>,
}

/// Point-in-time copy of the worker status, served by `/status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub processed_count: u64,
    pub confirmed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub last_error: Option<String>,
    pub last_result: Option<MessageResult>,
}

/// What happened to a single message within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Confirmed,
    Failed,
    /// No confirmation link, already confirmed, or dry run
    Skipped,
}

/// Shared handle on the process-wide status.
///
/// Cloning shares the same state. Each update runs under a single write lock
/// and readers copy the whole snapshot, so a reader never sees a counter
/// bumped without its matching `last_error`/`last_result`.
#[derive(Debug, Clone, Default)]
pub struct Status {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_running(&self, running: bool) {
        self.update(|s| s.running = running);
    }

    /// Count one handled message; `error` is kept as the latest error when set
    pub fn record_message(&self, kind: MessageKind, result: MessageResult, error: Option<String>) {
        self.update(|s| {
            s.processed_count += 1;
            match kind {
                MessageKind::Confirmed => s.confirmed_count += 1,
                MessageKind::Failed => s.failed_count += 1,
                MessageKind::Skipped => s.skipped_count += 1,
            }
            if error.is_some() {
                s.last_error = error;
            }
            s.last_result = Some(result);
        });
    }

    /// Close a cycle; a failed cycle records its error
    pub fn finish_cycle(&self, at: DateTime<Utc>, error: Option<String>) {
        self.update(|s| {
            s.cycles += 1;
            s.last_poll_time = Some(at);
            if error.is_some() {
                s.last_error = error;
            }
        });
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut StatusSnapshot),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut *guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(uid: u32, ok: bool) -> MessageResult {
        MessageResult {
            uid,
            ok,
            info: "status=200,final=https://www.pinterest.com/".to_string(),
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_starts_empty() {
        let status = Status::new();
        let snap = status.snapshot();

        assert!(!snap.running);
        assert_eq!(snap.processed_count, 0);
        assert_eq!(snap.confirmed_count, 0);
        assert_eq!(snap.failed_count, 0);
        assert!(snap.last_poll_time.is_none());
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_counters() {
        let status = Status::new();
        status.record_message(MessageKind::Confirmed, result(1, true), None);
        status.record_message(MessageKind::Confirmed, result(2, true), None);
        status.record_message(MessageKind::Failed, result(3, false), Some("HTTP 500".into()));
        status.record_message(MessageKind::Skipped, result(4, false), None);

        let snap = status.snapshot();
        assert_eq!(snap.processed_count, 4);
        assert_eq!(snap.confirmed_count, 2);
        assert_eq!(snap.failed_count, 1);
        assert_eq!(snap.skipped_count, 1);
        // Skipped message does not clear the previous error
        assert_eq!(snap.last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(snap.last_result.map(|r| r.uid), Some(4));
    }

    #[test]
    fn test_finish_cycle() {
        let status = Status::new();
        let first = Utc::now();
        status.finish_cycle(first, Some("connection refused".into()));
        status.finish_cycle(first + chrono::Duration::seconds(1), None);

        let snap = status.snapshot();
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.processed_count, 0);
        assert!(snap.last_poll_time.unwrap() > first);
        assert_eq!(snap.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_clones_share_state() {
        let status = Status::new();
        let reader = status.clone();
        status.set_running(true);
        assert!(reader.snapshot().running);
    }

    #[test]
    fn test_concurrent_reads_never_see_partial_updates() {
        let status = Status::new();
        let writer = status.clone();

        let handle = std::thread::spawn(move || {
            for uid in 1..=2000u32 {
                let kind = if uid % 2 == 0 { MessageKind::Failed } else { MessageKind::Confirmed };
                let error = (kind == MessageKind::Failed).then(|| format!("UID {} failed", uid));
                writer.record_message(kind, result(uid, kind == MessageKind::Confirmed), error);
            }
        });

        while !handle.is_finished() {
            let snap = status.snapshot();
            if snap.failed_count > 0 {
                assert!(snap.last_error.is_some(), "failed_count {} without last_error", snap.failed_count);
            }
            if snap.processed_count > 0 {
                assert_eq!(snap.last_result.as_ref().map(|r| r.uid as u64), Some(snap.processed_count));
            }
            assert_eq!(snap.processed_count, snap.confirmed_count + snap.failed_count + snap.skipped_count);
        }
        handle.join().unwrap();

        let snap = status.snapshot();
        assert_eq!(snap.processed_count, 2000);
        assert_eq!(snap.failed_count, 1000);
        assert_eq!(snap.last_error.as_deref(), Some("UID 2000 failed"));
    }

    #[test]
    fn test_serializes_null_last_error() {
        let json = serde_json::to_value(Status::new().snapshot()).unwrap();
        assert!(json["last_error"].is_null());
        assert_eq!(json["processed_count"], 0);
    }
}
