use std::future;
use std::pin::{Pin, pin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{MissingSignalPolicy, WatchConfig};
use crate::errors::{ConfigError, WatchError};
use crate::host::{PageEvent, PageHost};
use crate::signal::{SignalParser, SignalSource, SignalValue};
use crate::storage::{
    SessionStore, load_last_value, save_last_value, save_scroll_offset, take_scroll_offset,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ReloadReason {
    SignalChanged { from: SignalValue, to: SignalValue },
    MissingSignal,
    FailureThreshold { failures: u32 },
    Fallback,
    Forced,
    Manual,
}

impl ReloadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadReason::SignalChanged { .. } => "signal_changed",
            ReloadReason::MissingSignal => "missing_signal",
            ReloadReason::FailureThreshold { .. } => "failure_threshold",
            ReloadReason::Fallback => "fallback",
            ReloadReason::Forced => "forced",
            ReloadReason::Manual => "manual",
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Another poll was still in flight.
    Skipped,
    /// The page is hidden.
    Inactive,
    /// The watcher already reloaded or was stopped.
    Halted,
    /// First observation, adopted silently.
    Baseline(SignalValue),
    Unchanged,
    /// Value moved without qualifying for a reload.
    Updated(SignalValue),
    Reloaded(ReloadReason),
    Failed { consecutive: u32 },
}

/// Why `run` returned.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchExit {
    Reloaded(ReloadReason),
    Stopped,
}

#[derive(Debug)]
struct WatchState {
    last_value: Option<SignalValue>,
    active: bool,
    failure_count: u32,
    fallback_deadline: Option<Instant>,
    resume_at: Option<Instant>,
    halted: Option<WatchExit>,
}

/// Releases the in-flight flag on every exit path.
struct PollGuard<'a>(&'a AtomicBool);

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PollGuard(flag))
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Watches one signal for one page view and reloads the page when it moves.
///
/// A watcher lives exactly as long as the page it was attached to: once it
/// reloads (or is stopped) it is halted for good, and the next page load
/// attaches a fresh one.
pub struct Watcher<S, H> {
    config: WatchConfig,
    source: S,
    host: Arc<H>,
    store: Arc<dyn SessionStore>,
    parser: SignalParser,
    state: Mutex<WatchState>,
    in_flight: AtomicBool,
    halt: Notify,
}

impl<S: SignalSource, H: PageHost> Watcher<S, H> {
    /// Attach to a freshly loaded page using the configured parser.
    pub async fn attach(
        config: WatchConfig,
        source: S,
        host: Arc<H>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        let parser = config.parser.parser();
        Self::attach_with_parser(config, parser, source, host, store).await
    }

    /// Attach with a caller-supplied parser.
    ///
    /// Restores any pending scroll offset, then takes the baseline from the
    /// page. If the page has no signal yet, the value persisted by the
    /// previous page view is used instead.
    pub async fn attach_with_parser(
        config: WatchConfig,
        parser: SignalParser,
        source: S,
        host: Arc<H>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let watcher = Self {
            state: Mutex::new(WatchState {
                last_value: None,
                active: true,
                failure_count: 0,
                fallback_deadline: config.fallback().map(|d| Instant::now() + d),
                resume_at: None,
                halted: None,
            }),
            config,
            source,
            host,
            store,
            parser,
            in_flight: AtomicBool::new(false),
            halt: Notify::new(),
        };

        watcher.restore_scroll();

        if watcher.config.show_manual_control {
            watcher
                .host
                .show_manual_control(&watcher.config.manual_control_label);
        }

        if !watcher.config.force_reload {
            let baseline = match watcher.read_value().await {
                Ok(Some(value)) => {
                    watcher.persist_value(&value);
                    Some(value)
                }
                Ok(None) => watcher.stored_value(),
                Err(e) => {
                    warn!(
                        event = "watcher.baseline_read_failed",
                        error_code = e.error_code(),
                        error = %e
                    );
                    watcher.stored_value()
                }
            };
            watcher.lock_state().last_value = baseline;
        }

        info!(
            event = "watcher.attached",
            value_key = %watcher.config.value_key,
            interval_ms = watcher.config.interval_ms,
            force_reload = watcher.config.force_reload,
            baseline = ?watcher.last_value()
        );

        Ok(watcher)
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn last_value(&self) -> Option<SignalValue> {
        self.lock_state().last_value.clone()
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_state().failure_count
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn exit(&self) -> Option<WatchExit> {
        self.lock_state().halted.clone()
    }

    /// One interval tick: a poll, or an unconditional reload in force mode.
    pub async fn tick(&self) -> PollOutcome {
        if !self.config.force_reload {
            return self.poll().await;
        }

        let mut state = self.lock_state();
        if state.halted.is_some() {
            return PollOutcome::Halted;
        }
        if !state.active {
            return PollOutcome::Inactive;
        }
        self.reload_locked(&mut state, ReloadReason::Forced);
        PollOutcome::Reloaded(ReloadReason::Forced)
    }

    /// Read, parse, compare and decide. At most one poll runs at a time;
    /// overlapping calls return `Skipped` without touching the source.
    pub async fn poll(&self) -> PollOutcome {
        let Some(_guard) = PollGuard::acquire(&self.in_flight) else {
            debug!(event = "watcher.poll_skipped");
            return PollOutcome::Skipped;
        };

        {
            let state = self.lock_state();
            if state.halted.is_some() {
                return PollOutcome::Halted;
            }
            if !state.active {
                return PollOutcome::Inactive;
            }
        }

        let read = self.read_value().await;

        let mut state = self.lock_state();
        if state.halted.is_some() {
            return PollOutcome::Halted;
        }

        let outcome = match read {
            Ok(Some(value)) => self.on_value(&mut state, value),
            Ok(None) => self.on_missing(&mut state),
            Err(e) => self.on_failure(&mut state, &e),
        };
        debug!(event = "watcher.poll_completed", outcome = ?outcome);
        outcome
    }

    /// Save the scroll offset, cancel timers and reload the page.
    pub fn reload(&self, reason: ReloadReason) {
        let mut state = self.lock_state();
        self.reload_locked(&mut state, reason);
    }

    pub fn manual_refresh(&self) {
        self.reload(ReloadReason::Manual);
    }

    /// Halt without reloading. Pending timers are dropped when `run` returns.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if state.halted.is_some() {
            return;
        }
        state.fallback_deadline = None;
        state.resume_at = None;
        state.halted = Some(WatchExit::Stopped);
        info!(event = "watcher.stopped", value_key = %self.config.value_key);
        self.halt.notify_one();
    }

    /// Page visibility changed. Hidden pages are not polled; a page that
    /// becomes visible gets one extra poll after the settle delay.
    pub fn set_visible(&self, visible: bool) {
        let mut state = self.lock_state();
        state.active = visible;
        state.resume_at = visible.then(|| Instant::now() + self.config.resume_delay());
        debug!(event = "watcher.visibility_changed", visible = visible);
    }

    /// Drive the watcher until it reloads the page or is stopped.
    ///
    /// The first tick fires one interval after the call. A closed event
    /// channel stops the watcher. Events and deadlines are still handled
    /// while a read is in flight; a reload or stop abandons the read.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PageEvent>) -> WatchExit {
        let period = self.config.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current = pin!(None);

        info!(event = "watcher.run_started", interval_ms = self.config.interval_ms);

        loop {
            if let Some(exit) = self.exit() {
                info!(event = "watcher.run_completed", exit = ?exit);
                return exit;
            }

            let (fallback_at, resume_at) = {
                let state = self.lock_state();
                (state.fallback_deadline, state.resume_at)
            };

            tokio::select! {
                _ = ticker.tick() => {
                    if current.is_none() {
                        current.set(Some(self.tick()));
                    } else {
                        debug!(event = "watcher.poll_skipped");
                    }
                }
                outcome = in_flight(current.as_mut()) => {
                    current.set(None);
                    debug!(event = "watcher.tick_completed", outcome = ?outcome);
                }
                _ = sleep_until(fallback_at) => {
                    self.fallback_expired();
                }
                _ = sleep_until(resume_at) => {
                    self.lock_state().resume_at = None;
                    // force mode has no comparison to freshen
                    if !self.config.force_reload && current.is_none() {
                        current.set(Some(self.tick()));
                    }
                }
                event = events.recv() => match event {
                    Some(PageEvent::Visibility(visible)) => self.set_visible(visible),
                    Some(PageEvent::ManualRefresh) => self.manual_refresh(),
                    Some(PageEvent::Stop) | None => self.stop(),
                },
                _ = self.halt.notified() => {}
            }
        }
    }

    fn fallback_expired(&self) {
        let mut state = self.lock_state();
        match state.fallback_deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.reload_locked(&mut state, ReloadReason::Fallback);
            }
            _ => {}
        }
    }

    fn on_value(&self, state: &mut WatchState, value: SignalValue) -> PollOutcome {
        state.failure_count = 0;
        self.reset_fallback(state);

        let Some(baseline) = state.last_value.clone() else {
            info!(event = "watcher.baseline_established", value = %value);
            self.persist_value(&value);
            state.last_value = Some(value.clone());
            return PollOutcome::Baseline(value);
        };

        if baseline == value {
            return PollOutcome::Unchanged;
        }

        self.persist_value(&value);
        state.last_value = Some(value.clone());

        if self.config.compare.should_reload(&baseline, &value) {
            let reason = ReloadReason::SignalChanged {
                from: baseline,
                to: value,
            };
            self.reload_locked(state, reason.clone());
            PollOutcome::Reloaded(reason)
        } else {
            info!(
                event = "watcher.baseline_updated",
                from = %baseline,
                to = %value
            );
            PollOutcome::Updated(value)
        }
    }

    fn on_missing(&self, state: &mut WatchState) -> PollOutcome {
        if self.config.missing_signal == MissingSignalPolicy::Reload && state.last_value.is_some() {
            warn!(event = "watcher.signal_missing", policy = "reload");
            self.reload_locked(state, ReloadReason::MissingSignal);
            return PollOutcome::Reloaded(ReloadReason::MissingSignal);
        }
        self.count_failure(state, "signal missing")
    }

    fn on_failure(&self, state: &mut WatchState, error: &WatchError) -> PollOutcome {
        warn!(
            event = "watcher.read_failed",
            error_code = error.error_code(),
            error = %error
        );
        self.count_failure(state, error.error_code())
    }

    fn count_failure(&self, state: &mut WatchState, cause: &str) -> PollOutcome {
        state.failure_count += 1;
        let consecutive = state.failure_count;
        warn!(
            event = "watcher.poll_failed",
            cause = cause,
            consecutive = consecutive,
            max_failures = self.config.max_failures
        );

        if consecutive >= self.config.max_failures {
            state.failure_count = 0;
            let reason = ReloadReason::FailureThreshold {
                failures: consecutive,
            };
            self.reload_locked(state, reason.clone());
            return PollOutcome::Reloaded(reason);
        }
        PollOutcome::Failed { consecutive }
    }

    fn reload_locked(&self, state: &mut WatchState, reason: ReloadReason) {
        if state.halted.is_some() {
            return;
        }

        let offset = self.host.scroll_offset();
        if let Err(e) = save_scroll_offset(self.store.as_ref(), &self.config.scroll_key, offset) {
            warn!(event = "watcher.scroll_save_failed", error = %e);
        }

        state.fallback_deadline = None;
        state.resume_at = None;
        state.halted = Some(WatchExit::Reloaded(reason.clone()));

        info!(
            event = "watcher.reload_started",
            reason = reason.as_str(),
            detail = ?reason,
            scroll_offset = offset
        );
        self.host.reload();
        self.halt.notify_one();
    }

    fn reset_fallback(&self, state: &mut WatchState) {
        state.fallback_deadline = self.config.fallback().map(|d| Instant::now() + d);
    }

    async fn read_value(&self) -> Result<Option<SignalValue>, WatchError> {
        let timeout = self.config.fetch_timeout();
        let raw = time::timeout(timeout, self.source.read())
            .await
            .map_err(|_| WatchError::Timeout(timeout))??;
        Ok(raw.and_then(|raw| (self.parser)(&raw)))
    }

    fn restore_scroll(&self) {
        if let Some(offset) = take_scroll_offset(self.store.as_ref(), &self.config.scroll_key) {
            debug!(event = "watcher.scroll_restored", offset = offset);
            self.host.scroll_to(offset);
        }
    }

    fn persist_value(&self, value: &SignalValue) {
        if let Err(e) = save_last_value(self.store.as_ref(), &self.config.value_key, value) {
            warn!(event = "watcher.value_save_failed", error = %e);
        }
    }

    fn stored_value(&self) -> Option<SignalValue> {
        let stored = load_last_value(self.store.as_ref(), &self.config.value_key)?;
        debug!(
            event = "watcher.stored_baseline_loaded",
            value = %stored.value,
            observed_at = %stored.observed_at
        );
        Some(stored.value)
    }

    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn in_flight<F: Future>(current: Pin<&mut Option<F>>) -> F::Output {
    match current.as_pin_mut() {
        Some(poll) => poll.await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
