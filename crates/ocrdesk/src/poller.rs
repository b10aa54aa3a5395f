//! Sequential, cancellable status polling.
//!
//! Each poll runs as its own tokio task: wait one interval, fetch the
//! status (bounded by a timeout), hand the result to a [`PollHandler`],
//! repeat. A new fetch is never issued before the previous one settled.
//!
//! Cancellation is cooperative. An in-flight fetch is not aborted, but
//! its result is discarded: once [`Poller::stop_polling`] (or dropping the
//! [`PollGuard`]) returns, the handler is not called again for that poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Notify;
use tracing::Instrument;

use crate::client::{OcrService, StatusReport};
use crate::config::PollingConfig;
use crate::error::ServiceError;

/// Receives the results of a poll.
///
/// Handlers are called synchronously from the poll task and must not stop
/// their own poll from `on_update`. Dropping the poll's guard from
/// `on_terminal` or `on_exhausted` is fine.
pub trait PollHandler: Send + Sync {
    /// Called for every successful fetch, terminal ones included.
    fn on_update(&self, id: &str, report: &StatusReport);

    /// Called once after `on_update` when the report is terminal.
    fn on_terminal(&self, id: &str, report: &StatusReport);

    /// Called once when the consecutive-failure ceiling was exceeded.
    fn on_exhausted(&self, id: &str, failures: u32, last_error: &ServiceError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub max_consecutive_failures: u32,
}

impl From<&PollingConfig> for PollOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            fetch_timeout: config.fetch_timeout(),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Poller lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[derive(Default)]
struct PollToken {
    cancelled: AtomicBool,
    /// Set before the final handler call; no further calls follow.
    finished: AtomicBool,
    /// Held while a result is checked and handed to the handler.
    gate: Mutex<()>,
    wake: Notify,
}

impl PollToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
        if !self.finished.load(Ordering::Acquire) {
            // Wait out a handler call that is already running.
            drop(lock(&self.gate));
        }
    }
}

#[derive(Default)]
struct PollerInner {
    polls: Mutex<HashMap<String, Arc<PollToken>>>,
}

impl PollerInner {
    /// Removes the entry for `id` if it still belongs to `token`.
    fn release(&self, id: &str, token: &Arc<PollToken>) {
        let mut polls = lock(&self.polls);
        if polls.get(id).is_some_and(|current| Arc::ptr_eq(current, token)) {
            polls.remove(id);
        }
    }
}

/// Owner of all running polls.
#[derive(Clone, Default)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling `id` on the current tokio runtime.
    ///
    /// An existing poll for the same id is stopped first. The poll stops
    /// when the returned guard is dropped.
    pub fn start_polling(
        &self,
        id: &str,
        options: PollOptions,
        source: Arc<dyn OcrService>,
        handler: Arc<dyn PollHandler>,
    ) -> PollGuard {
        let token = Arc::new(PollToken::default());
        let previous = lock(&self.inner.polls).insert(id.to_string(), Arc::clone(&token));
        if let Some(previous) = previous {
            debug!("Replacing active poll for {}", id);
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let task_token = Arc::clone(&token);
        let task_id = id.to_string();
        let span = tracing::info_span!("poll", id = %id);
        tokio::spawn(
            async move {
                run_poll(&task_id, options, source, handler, &task_token).await;
                inner.release(&task_id, &task_token);
            }
            .instrument(span),
        );

        PollGuard {
            inner: Arc::downgrade(&self.inner),
            id: id.to_string(),
            token: Some(token),
        }
    }

    /// Stops the poll for `id`. Safe to call when none is running.
    pub fn stop_polling(&self, id: &str) {
        let token = lock(&self.inner.polls).remove(id);
        if let Some(token) = token {
            debug!("Stopping poll for {}", id);
            token.cancel();
        }
    }

    /// Stops every running poll.
    pub fn stop_all(&self) {
        let tokens: Vec<(String, Arc<PollToken>)> = lock(&self.inner.polls).drain().collect();
        if !tokens.is_empty() {
            info!("Stopping {} active polls", tokens.len());
        }
        for (_, token) in tokens {
            token.cancel();
        }
    }

    pub fn is_polling(&self, id: &str) -> bool {
        lock(&self.inner.polls).contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.polls).len()
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Stops its poll exactly once, when dropped or on [`PollGuard::stop`].
#[must_use = "dropping the guard stops the poll"]
pub struct PollGuard {
    inner: Weak<PollerInner>,
    id: String,
    token: Option<Arc<PollToken>>,
}

impl PollGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True until the poll stopped for any reason.
    pub fn is_active(&self) -> bool {
        self.token.as_ref().is_some_and(|token| {
            !token.is_cancelled() && !token.finished.load(Ordering::Acquire)
        })
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(token) = self.token.take() {
            if let Some(inner) = self.inner.upgrade() {
                inner.release(&self.id, &token);
            }
            token.cancel();
        }
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PollGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollGuard")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn run_poll(
    id: &str,
    options: PollOptions,
    source: Arc<dyn OcrService>,
    handler: Arc<dyn PollHandler>,
    token: &PollToken,
) {
    debug!("Polling {} every {:?}", id, options.interval);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(options.interval) => {}
            _ = token.wake.notified() => {}
        }

        if token.is_cancelled() {
            debug!("Poll for {} cancelled", id);
            return;
        }

        let outcome = match tokio::time::timeout(options.fetch_timeout, source.job_status(id)).await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(options.fetch_timeout)),
        };

        match deliver(id, outcome, &mut failures, &options, handler.as_ref(), token) {
            Flow::Continue => {}
            Flow::Stop => return,
        }
    }
}

/// Hands one fetch result to the handler unless the poll was cancelled meanwhile.
fn deliver(
    id: &str,
    outcome: Result<StatusReport, ServiceError>,
    failures: &mut u32,
    options: &PollOptions,
    handler: &dyn PollHandler,
    token: &PollToken,
) -> Flow {
    let _gate = lock(&token.gate);
    if token.is_cancelled() {
        debug!("Discarding late status for {}", id);
        return Flow::Stop;
    }

    match outcome {
        Ok(report) => {
            *failures = 0;
            handler.on_update(id, &report);
            if report.is_terminal() {
                debug!("Poll for {} reached terminal status '{}'", id, report.status);
                token.finished.store(true, Ordering::Release);
                handler.on_terminal(id, &report);
                return Flow::Stop;
            }
            Flow::Continue
        }
        Err(error) => {
            *failures += 1;
            warn!(
                "Status fetch for {} failed ({} consecutive): {}",
                id, failures, error
            );
            if *failures > options.max_consecutive_failures {
                warn!("Giving up on {} after {} consecutive failures", id, failures);
                token.finished.store(true, Ordering::Release);
                handler.on_exhausted(id, *failures, &error);
                return Flow::Stop;
            }
            Flow::Continue
        }
    }
}
