//! Arbiter Loop
//!
//! Runs a background task that snapshots the command store every tick,
//! resolves the authoritative command and hands it to the actuation sink.
//! The loop never waits for input; silence is handled by the watchdog rule.

use super::{monotonic_now, CommandStore};
use crate::actuation::ActuationSink;
use crate::config::{ArbiterConfig, ConsumptionPolicy};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rover_shared::state_machine::{resolve, ArbiterState, Arbitration, ArbitrationWindows, HaltReason};
use rover_shared::{timing, Command};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, trace, warn};

/// Loop parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterSettings {
    pub tick_period: Duration,
    pub windows: ArbitrationWindows,
    pub consumption: ConsumptionPolicy,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(timing::TICK_PERIOD_MS),
            windows: ArbitrationWindows::default(),
            consumption: ConsumptionPolicy::Latch,
        }
    }
}

impl From<&ArbiterConfig> for ArbiterSettings {
    fn from(config: &ArbiterConfig) -> Self {
        Self {
            tick_period: config.timing.tick_period(),
            windows: config.timing.windows(),
            consumption: config.consumption,
        }
    }
}

/// Counters exposed through the handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub ticks: u64,
    pub dispatch_failures: u64,
    /// Most recent decision
    pub last: Option<Arbitration>,
}

/// Resolves and dispatches one command per tick
pub struct Arbiter {
    store: Arc<CommandStore>,
    settings: ArbiterSettings,
    sink: Box<dyn ActuationSink>,
    stats: Arc<Mutex<ArbiterStats>>,
}

impl Arbiter {
    /// Create an arbiter reading from `store` and driving `sink`
    pub fn new(store: Arc<CommandStore>, settings: ArbiterSettings, sink: Box<dyn ActuationSink>) -> Self {
        Self {
            store,
            settings,
            sink,
            stats: Arc::new(Mutex::new(ArbiterStats::default())),
        }
    }

    pub fn stats(&self) -> ArbiterStats {
        *self.stats.lock()
    }

    /// Evaluate the store at `now` and dispatch the result once
    pub async fn tick(&mut self, now: Instant) -> Arbitration {
        let view = self.store.snapshot(now);
        let arbitration = resolve(&view, &self.settings.windows);

        self.log_transition(&arbitration);
        self.dispatch(arbitration.command).await;

        if self.settings.consumption == ConsumptionPolicy::ConsumeOnDispatch {
            if let Some(source) = arbitration.authority {
                if let Some(entry) = view.slot(source) {
                    if self.store.clear_if_unchanged(source, entry.received_at) {
                        trace!("[ARBITER] Consumed {} command {}", source, entry.command);
                    }
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.ticks += 1;
        stats.last = Some(arbitration);
        arbitration
    }

    async fn dispatch(&mut self, command: Command) {
        if let Err(e) = self.sink.apply(command).await {
            self.stats.lock().dispatch_failures += 1;
            error!(
                "[ARBITER] Sink '{}' failed to apply {}: {:#}",
                self.sink.name(),
                command,
                e
            );
        }
    }

    fn log_transition(&self, current: &Arbitration) {
        let previous = self.stats.lock().last;
        let Some(previous) = previous else {
            info!("[ARBITER] Initial state: {} ({})", current.state, current.command);
            return;
        };

        if previous.state != current.state {
            match (current.state, current.halt_reason) {
                (ArbiterState::Halted, Some(HaltReason::Stale)) => warn!(
                    "[ARBITER] Watchdog: no commands for over {:?}, stopping ({} -> Halted)",
                    self.settings.windows.stale, previous.state
                ),
                _ => info!(
                    "[ARBITER] State changed: {} -> {} ({})",
                    previous.state, current.state, current.command
                ),
            }
        } else if previous.command != current.command {
            info!(
                "[ARBITER] Command changed: {} -> {} ({})",
                previous.command, current.command, current.state
            );
        } else {
            trace!("[ARBITER] Dispatching {} ({})", current.command, current.state);
        }
    }

    /// Start the arbitration background task
    ///
    /// Returns a handle used to read stats and to stop the loop.
    pub fn start(self) -> ArbiterHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let mut arbiter = self;

        let task = tokio::spawn(async move {
            let mut ticker = interval(arbiter.settings.tick_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "[ARBITER] Running: tick={:?} manual_window={:?} stale_window={:?} sink={}",
                arbiter.settings.tick_period,
                arbiter.settings.windows.manual,
                arbiter.settings.windows.stale,
                arbiter.sink.name()
            );

            loop {
                tokio::select! {
                    biased;
                    // Fires on an explicit signal or when the handle is dropped
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        arbiter.tick(monotonic_now()).await;
                    }
                }
            }

            // Fail-safe: always leave the motors stopped
            arbiter.dispatch(Command::Stop).await;
            info!("[ARBITER] Stopped after {} ticks", arbiter.stats().ticks);
            arbiter.stats()
        });

        ArbiterHandle {
            shutdown_tx,
            task,
            stats,
        }
    }
}

/// Handle to a running arbiter
pub struct ArbiterHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<ArbiterStats>,
    stats: Arc<Mutex<ArbiterStats>>,
}

impl ArbiterHandle {
    /// Latest counters
    pub fn stats(&self) -> ArbiterStats {
        *self.stats.lock()
    }

    /// Stop ticking, dispatch a final `Stop` and wait for the task to finish
    pub async fn shutdown(self) -> Result<ArbiterStats> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.context("Arbiter task failed")
    }
}
