//! Library update scheduler
//!
//! Refreshes every followed title from the metadata source, either on demand
//! or when the configured interval has elapsed since the last pass.
//!
//! # State
//!
//! ```text
//!   Idle ──trigger()──► Running{progress, total, current} ──pass ends──► Idle
//! ```
//!
//! The state lives in a `watch` channel: `None` is idle. `trigger()` flips it
//! with a check-and-set, so concurrent triggers (a client request racing the
//! timer) collapse into the one pass and get its current snapshot back.
//!
//! Titles are refreshed in `RefreshMode::Batched`, so a pass skips the
//! per-title cache invalidations and invalidates the library and updates
//! listings once at the end. Client mutations made meanwhile invalidate as
//! usual.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::error::Result;
use crate::services::{RefreshMode, Services};
use crate::socket_server::hub::HubHandle;
use crate::socket_server::protocol::{OutgoingMessage, Task};

const SECONDS_PER_HOUR: u64 = 60 * 60;

/// Progress snapshot of a running pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateState {
    pub progress: usize,
    pub total: usize,
    pub current: String,
}

/// Refresh interval for an `updateFrequency` preference in hours; 0 disables
pub fn interval_from_hours(hours: u64) -> Option<Duration> {
    (hours > 0).then(|| Duration::from_secs(hours.saturating_mul(SECONDS_PER_HOUR)))
}

pub struct LibraryUpdater {
    services: Arc<Services>,
    hub: HubHandle,
    state: watch::Sender<Option<UpdateState>>,
    /// Serializes passes
    pass_lock: tokio::sync::Mutex<()>,
    last_completed: Mutex<Option<Instant>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    firings: AtomicU64,
    passes: AtomicU64,
}

impl LibraryUpdater {
    pub fn new(services: Arc<Services>, hub: HubHandle) -> Arc<Self> {
        let last_updated = services.prefs().library().last_updated;
        let (state, _) = watch::channel(None);
        Arc::new(Self {
            services,
            hub,
            state,
            pass_lock: tokio::sync::Mutex::new(()),
            last_completed: Mutex::new(instant_from_unix(last_updated)),
            timer: Mutex::new(None),
            firings: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        })
    }

    /// Current snapshot, `None` when idle
    pub fn state(&self) -> Option<UpdateState> {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Number of times the interval timer has fired
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::SeqCst)
    }

    /// Number of passes started
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Start a pass unless one is already running, and return the state
    pub fn trigger(self: &Arc<Self>) -> Option<UpdateState> {
        let started = self.state.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(UpdateState::default());
                true
            } else {
                false
            }
        });

        if started {
            let updater = Arc::clone(self);
            tokio::spawn(async move { updater.run_pass().await });
        } else {
            tracing::debug!("Library update already running");
        }

        self.state()
    }

    /// Resolves once no pass is running
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(Option::is_none).await;
    }

    async fn run_pass(self: Arc<Self>) {
        let _pass = self.pass_lock.lock().await;
        self.passes.fetch_add(1, Ordering::SeqCst);
        let start = std::time::Instant::now();

        match self.refresh_followed().await {
            Ok((total, failed)) => {
                if let Err(e) = self
                    .services
                    .prefs()
                    .set_last_updated(chrono::Utc::now().timestamp())
                {
                    tracing::warn!("Failed to record library update time: {}", e);
                }
                tracing::info!(
                    total,
                    failed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Library update finished"
                );
            }
            Err(e) => tracing::error!("Library update aborted: {}", e),
        }

        *self.last_completed.lock() = Some(Instant::now());
        self.services.caches().invalidate_listings();
        self.state.send_replace(None);
        self.publish(Value::Null);
    }

    /// Returns (titles visited, titles that failed)
    async fn refresh_followed(&self) -> Result<(usize, usize)> {
        let followed = self.services.store().followed_manga()?;
        let total = followed.len();
        tracing::info!(total, "Library update started");

        let mut failed = 0;
        for (i, manga) in followed.iter().enumerate() {
            if let Err(e) = self
                .services
                .update_manga(&manga.id, RefreshMode::Batched)
                .await
            {
                tracing::warn!(manga = %manga.id, "Skipping title: {}", e);
                failed += 1;
            }

            let snapshot = UpdateState {
                progress: i + 1,
                total,
                current: manga.title.clone(),
            };
            self.state.send_replace(Some(snapshot.clone()));
            match serde_json::to_value(&snapshot) {
                Ok(body) => self.publish(body),
                Err(e) => tracing::warn!("Failed to encode progress: {}", e),
            }
        }

        Ok((total, failed))
    }

    fn publish(&self, body: Value) {
        self.hub
            .broadcast(&OutgoingMessage::event(Task::UpdateLibrary, body));
    }

    // ========================================================================
    // Timer
    // ========================================================================

    /// Run a pass now if the interval already elapsed, then arm the timer
    pub fn start(self: &Arc<Self>) {
        let interval = interval_from_hours(self.services.prefs().library().update_frequency);
        if let Some(interval) = interval {
            let overdue = match *self.last_completed.lock() {
                Some(last) => last.elapsed() >= interval,
                None => true,
            };
            if overdue {
                tracing::info!("Library update overdue; starting now");
                self.trigger();
            }
        }
        self.reschedule(interval);
    }

    /// Replace the armed timer. A running pass is left alone.
    pub fn reschedule(self: &Arc<Self>, interval: Option<Duration>) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        match interval.filter(|i| !i.is_zero()) {
            Some(interval) => {
                tracing::info!(interval_secs = interval.as_secs(), "Library update timer armed");
                *timer = Some(tokio::spawn(Arc::clone(self).run_timer(interval)));
            }
            None => tracing::info!("Library update timer disabled"),
        }
    }

    /// Disarm the timer
    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    /// Deadline for the next pass; without a completed pass the interval runs from `armed_at`
    fn next_due(&self, interval: Duration, armed_at: Instant) -> Instant {
        let last = *self.last_completed.lock();
        last.unwrap_or(armed_at) + interval
    }

    async fn run_timer(self: Arc<Self>, interval: Duration) {
        let armed_at = Instant::now();
        loop {
            self.wait_idle().await;
            time::sleep_until(self.next_due(interval, armed_at)).await;

            // A pass that finished while we slept moves the deadline
            if Instant::now() < self.next_due(interval, armed_at) {
                continue;
            }

            self.firings.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Library update timer fired");
            self.trigger();
        }
    }
}

/// Map a stored unix timestamp onto the runtime clock
fn instant_from_unix(timestamp: i64) -> Option<Instant> {
    if timestamp <= 0 {
        return None;
    }
    let elapsed = chrono::Utc::now().timestamp().saturating_sub(timestamp).max(0);
    Instant::now().checked_sub(Duration::from_secs(elapsed as u64))
}
