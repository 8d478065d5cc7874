//! Rolling inactivity timeout for an authenticated session.
//!
//! `SessionTimer` is either stopped or running. While running, a worker task
//! pushes a `SessionStatus` to the host every slow tick, switches to a
//! one-second cadence for the last stretch of the countdown, and fires the
//! expiry handler exactly once when the budget runs out. A qualifying click
//! resets the countdown.
//!
//! Time is read from `tokio::time::Instant`. A throttled or suspended task
//! simply sees a larger elapsed time on its next tick and expires at once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, ensure, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::activity::{ActivityFilter, EventTarget};
use super::logout::{LogoutRedirect, INACTIVITY_REASON};
use super::status::SessionStatus;

// ============================================================================
// Constants
// ============================================================================

/// Inactivity budget before forced logout (15 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Warning window before expiry (2 minutes).
pub const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_secs(2 * 60);

/// Status cadence outside the final stretch.
pub const DEFAULT_SLOW_TICK: Duration = Duration::from_secs(5);

/// Status cadence inside the final stretch, for a visibly ticking countdown.
pub const DEFAULT_FAST_TICK: Duration = Duration::from_secs(1);

/// Length of the final stretch that uses the fast cadence.
pub const DEFAULT_FAST_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    pub session_timeout: Duration,
    pub warning_threshold: Duration,
    pub slow_tick: Duration,
    pub fast_tick: Duration,
    pub fast_window: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            slow_tick: DEFAULT_SLOW_TICK,
            fast_tick: DEFAULT_FAST_TICK,
            fast_window: DEFAULT_FAST_WINDOW,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.session_timeout.is_zero(), "session timeout must be positive");
        ensure!(!self.slow_tick.is_zero(), "slow tick must be positive");
        ensure!(!self.fast_tick.is_zero(), "fast tick must be positive");
        ensure!(
            self.warning_threshold < self.session_timeout,
            "warning threshold ({:?}) must be shorter than the session timeout ({:?})",
            self.warning_threshold,
            self.session_timeout
        );
        Ok(())
    }

    fn status_after(&self, elapsed: Duration) -> SessionStatus {
        SessionStatus::compute(elapsed, self.session_timeout, self.warning_threshold)
    }

    fn in_fast_window(&self, status: &SessionStatus) -> bool {
        status.time_remaining > 0
            && Duration::from_millis(status.time_remaining) <= self.fast_window
    }
}

// ============================================================================
// Callbacks
// ============================================================================

pub type UpdateCallback = Arc<dyn Fn(SessionStatus) + Send + Sync>;
pub type ExpiredCallback = Box<dyn FnOnce() + Send>;

/// Notifications delivered through `SessionCallbacks::channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Update(SessionStatus),
    Expired,
}

/// Observer for one `start` .. stop/expiry cycle.
#[derive(Default)]
pub struct SessionCallbacks {
    on_update: Option<UpdateCallback>,
    on_expired: Option<ExpiredCallback>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(mut self, callback: impl Fn(SessionStatus) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(callback));
        self
    }

    /// Without an expiry callback the timer falls back to its
    /// `LogoutRedirect`, if one was configured.
    pub fn on_expired(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_expired = Some(Box::new(callback));
        self
    }

    /// Callbacks that forward every notification into a channel.
    /// Dropping the receiver silently discards further events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let update_tx = tx.clone();
        let callbacks = Self::new()
            .on_update(move |status| {
                let _ = update_tx.send(SessionEvent::Update(status));
            })
            .on_expired(move || {
                let _ = tx.send(SessionEvent::Expired);
            });
        (callbacks, rx)
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_update", &self.on_update.is_some())
            .field("on_expired", &self.on_expired.is_some())
            .finish()
    }
}

// ============================================================================
// Timer
// ============================================================================

#[derive(Debug)]
struct TimerState {
    running: bool,
    last_activity: Instant,
}

type SharedState = Arc<Mutex<TimerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Flip `running` to false. Only the caller that performs the flip gets
/// `true`.
fn try_stop(state: &SharedState) -> bool {
    std::mem::replace(&mut lock(state).running, false)
}

struct Worker {
    handle: JoinHandle<()>,
    reset_tx: mpsc::UnboundedSender<()>,
    on_update: Option<UpdateCallback>,
}

/// Inactivity countdown owned by the hosting page or controller.
///
/// `start` must be called from within a tokio runtime.
pub struct SessionTimer {
    config: TimerConfig,
    state: SharedState,
    filter: ActivityFilter,
    fallback: Option<LogoutRedirect>,
    worker: Option<Worker>,
}

impl SessionTimer {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TimerState {
                running: false,
                last_activity: Instant::now(),
            })),
            filter: ActivityFilter::default(),
            fallback: None,
            worker: None,
        }
    }

    pub fn with_activity_filter(mut self, filter: ActivityFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Expiry handling used when `start` was given no expiry callback
    pub fn with_fallback(mut self, fallback: LogoutRedirect) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Begin a countdown from now. Does nothing if already running.
    ///
    /// Fails when there is no way to end the session on expiry: neither an
    /// expiry callback nor a `with_fallback` redirect.
    pub fn start(&mut self, callbacks: SessionCallbacks) -> Result<()> {
        let SessionCallbacks {
            on_update,
            on_expired,
        } = callbacks;
        let on_expiry = match (on_expired, &self.fallback) {
            (Some(callback), _) => ExpiryHandler::Callback(callback),
            (None, Some(fallback)) => ExpiryHandler::Redirect(fallback.clone()),
            (None, None) => bail!("session timer needs an expiry callback or a fallback redirect"),
        };

        let started_at = {
            let mut state = lock(&self.state);
            if state.running {
                debug!("Session timer already running");
                return Ok(());
            }
            state.running = true;
            state.last_activity = Instant::now();
            state.last_activity
        };

        // A previous cycle that expired on its own leaves a finished handle
        if let Some(old) = self.worker.take() {
            old.handle.abort();
        }

        let (reset_tx, reset_rx) = mpsc::unbounded_channel();
        let task = WorkerTask {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            on_update: on_update.clone(),
            on_expiry: Some(on_expiry),
        };
        let handle = tokio::spawn(task.run(started_at, reset_rx));

        self.worker = Some(Worker {
            handle,
            reset_tx,
            on_update,
        });
        info!(
            timeout_secs = self.config.session_timeout.as_secs(),
            "Session timer started"
        );
        Ok(())
    }

    /// Cancel the countdown without invoking any callback.
    /// Safe to call repeatedly and before `start`.
    pub fn stop(&mut self) {
        let was_running = try_stop(&self.state);
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
        }
        if was_running {
            info!("Session timer stopped");
        }
    }

    /// Feed a click into the timer. Returns true if it reset the countdown.
    pub fn record_click(&self, target: &dyn EventTarget) -> bool {
        if !self.filter.matches(target) || !self.is_running() {
            return false;
        }
        debug!(tag = target.tag_name(), "Qualifying click, resetting session timer");
        self.reset_inactivity_timer()
    }

    /// Restart the countdown from now and push a fresh status immediately.
    /// Returns false when the timer is not running.
    pub fn reset_inactivity_timer(&self) -> bool {
        let status = {
            let mut state = lock(&self.state);
            if !state.running {
                return false;
            }
            state.last_activity = Instant::now();
            self.config.status_after(Duration::ZERO)
        };

        if let Some(ref worker) = self.worker {
            // Re-arms the expiry deadline and cancels the fast cadence
            let _ = worker.reset_tx.send(());
            if let Some(ref on_update) = worker.on_update {
                on_update(status);
            }
        }
        true
    }

    /// Status computed from the last activity time. Only meaningful while
    /// running; after a stop it keeps counting from the last activity.
    pub fn get_session_status(&self) -> SessionStatus {
        let last_activity = lock(&self.state).last_activity;
        self.config.status_after(last_activity.elapsed())
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
        }
    }
}

impl fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTimer")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// What ends the session, resolved once per `start`
enum ExpiryHandler {
    Callback(ExpiredCallback),
    Redirect(LogoutRedirect),
}

struct WorkerTask {
    config: TimerConfig,
    state: SharedState,
    on_update: Option<UpdateCallback>,
    on_expiry: Option<ExpiryHandler>,
}

impl WorkerTask {
    async fn run(mut self, started_at: Instant, mut reset_rx: mpsc::UnboundedReceiver<()>) {
        let mut slow = time::interval_at(started_at + self.config.slow_tick, self.config.slow_tick);
        slow.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fast: Option<Interval> = None;
        let deadline = time::sleep_until(started_at + self.config.session_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                reset = reset_rx.recv() => {
                    if reset.is_none() {
                        // Timer handle is gone
                        break;
                    }
                    let last_activity = lock(&self.state).last_activity;
                    deadline.as_mut().reset(last_activity + self.config.session_timeout);
                    if fast.take().is_some() {
                        debug!("Stopping fast countdown after reset");
                    }
                }

                () = &mut deadline => {
                    let (last_activity, status) = self.status();
                    if status.is_expired() {
                        self.expire();
                        break;
                    }
                    // A reset landed before its message did
                    deadline.as_mut().reset(last_activity + self.config.session_timeout);
                }

                _ = slow.tick() => {
                    let (_, status) = self.status();
                    self.notify(&status);
                    if status.is_expired() {
                        self.expire();
                        break;
                    }
                    let in_window = self.config.in_fast_window(&status);
                    if in_window && fast.is_none() {
                        debug!(remaining_ms = status.time_remaining, "Starting fast countdown");
                        let mut interval = time::interval_at(
                            Instant::now() + self.config.fast_tick,
                            self.config.fast_tick,
                        );
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        fast = Some(interval);
                    } else if !in_window && fast.take().is_some() {
                        debug!("Stopping fast countdown");
                    }
                }

                _ = tick_fast(&mut fast) => {
                    let (_, status) = self.status();
                    self.notify(&status);
                    if status.is_expired() {
                        self.expire();
                        break;
                    }
                    if !self.config.in_fast_window(&status) {
                        debug!("Stopping fast countdown");
                        fast = None;
                    }
                }
            }
        }
    }

    fn status(&self) -> (Instant, SessionStatus) {
        let last_activity = lock(&self.state).last_activity;
        (last_activity, self.config.status_after(last_activity.elapsed()))
    }

    fn notify(&self, status: &SessionStatus) {
        if !lock(&self.state).running {
            return;
        }
        if let Some(ref on_update) = self.on_update {
            on_update(status.clone());
        }
    }

    fn expire(&mut self) {
        if !try_stop(&self.state) {
            // stop() won the race
            return;
        }
        info!(reason = INACTIVITY_REASON, "Session expired");

        match self.on_expiry.take() {
            Some(ExpiryHandler::Callback(on_expired)) => on_expired(),
            Some(ExpiryHandler::Redirect(redirect)) => redirect.execute(INACTIVITY_REASON),
            None => {}
        }
    }
}

/// Next fast tick, or never when the fast cadence is off
async fn tick_fast(fast: &mut Option<Interval>) {
    match fast {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
