//! Arbitration State Machine
//!
//! Decides which command is authoritative from a snapshot of the latest
//! automatic and manual commands. The state is recomputed from timestamps on
//! every evaluation; nothing carries over between ticks.

use crate::{timing, Command, Source};
use std::fmt;
use std::time::{Duration, Instant};

/// A command tagged with its arrival time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedCommand {
    pub command: Command,
    pub received_at: Instant,
}

impl TimestampedCommand {
    pub fn new(command: Command, received_at: Instant) -> Self {
        Self {
            command,
            received_at,
        }
    }

    /// Time since arrival, as seen at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received_at)
    }
}

/// Consistent snapshot of the command store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandView {
    pub automatic: Option<TimestampedCommand>,
    pub manual: Option<TimestampedCommand>,
    pub last_any_received_at: Option<Instant>,
    /// Instant the snapshot was taken; all ages are measured against it
    pub taken_at: Instant,
}

impl CommandView {
    /// View of a store that has never received anything
    pub fn empty(taken_at: Instant) -> Self {
        Self {
            automatic: None,
            manual: None,
            last_any_received_at: None,
            taken_at,
        }
    }

    /// Get the slot for a source
    pub fn slot(&self, source: Source) -> Option<TimestampedCommand> {
        match source {
            Source::Automatic => self.automatic,
            Source::Manual => self.manual,
        }
    }

    /// Time since the last arrival of either kind
    pub fn silence(&self) -> Option<Duration> {
        self.last_any_received_at
            .map(|t| self.taken_at.saturating_duration_since(t))
    }
}

/// Tunable time windows for arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationWindows {
    /// Manual priority lasts this long after a manual arrival
    pub manual: Duration,
    /// Silence longer than this forces a stop
    pub stale: Duration,
}

impl Default for ArbitrationWindows {
    fn default() -> Self {
        Self {
            manual: Duration::from_millis(timing::MANUAL_WINDOW_MS),
            stale: Duration::from_millis(timing::STALE_WINDOW_MS),
        }
    }
}

/// Logical arbiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArbiterState {
    /// A fresh manual command is authoritative
    ManualActive,
    /// No fresh manual command; the automatic command is authoritative
    AutomaticActive,
    /// Nothing actionable, or the watchdog fired
    Halted,
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbiterState::ManualActive => write!(f, "ManualActive"),
            ArbiterState::AutomaticActive => write!(f, "AutomaticActive"),
            ArbiterState::Halted => write!(f, "Halted"),
        }
    }
}

/// Why the arbiter is halted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// No command held in either slot
    NoInput,
    /// Only an expired manual command is held
    ManualExpired,
    /// Watchdog: silence exceeded the stale window
    Stale,
}

/// Outcome of one arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arbitration {
    pub state: ArbiterState,
    /// Command to dispatch; `Unknown` never appears here
    pub command: Command,
    /// Slot that supplied the command, if any
    pub authority: Option<Source>,
    pub halt_reason: Option<HaltReason>,
}

impl Arbitration {
    fn halted(reason: HaltReason) -> Self {
        Self {
            state: ArbiterState::Halted,
            command: Command::Stop,
            authority: None,
            halt_reason: Some(reason),
        }
    }

    fn active(state: ArbiterState, source: Source, entry: TimestampedCommand) -> Self {
        // Unknown is not actionable, but the slot still holds authority
        let command = match entry.command {
            Command::Unknown => Command::Stop,
            other => other,
        };
        Self {
            state,
            command,
            authority: Some(source),
            halt_reason: None,
        }
    }
}

/// Check whether a manual command is still inside its priority window
pub fn is_manual_fresh(view: &CommandView, windows: &ArbitrationWindows) -> bool {
    view.manual
        .map(|m| m.age(view.taken_at) < windows.manual)
        .unwrap_or(false)
}

/// Check whether the watchdog should force a stop
pub fn is_stale(view: &CommandView, windows: &ArbitrationWindows) -> bool {
    match view.silence() {
        Some(silence) => silence > windows.stale,
        None => true,
    }
}

/// Resolve the authoritative command for a snapshot
pub fn resolve(view: &CommandView, windows: &ArbitrationWindows) -> Arbitration {
    // Watchdog overrides everything
    if view.last_any_received_at.is_none() {
        return Arbitration::halted(HaltReason::NoInput);
    }
    if is_stale(view, windows) {
        return Arbitration::halted(HaltReason::Stale);
    }

    if is_manual_fresh(view, windows) {
        if let Some(manual) = view.manual {
            return Arbitration::active(ArbiterState::ManualActive, Source::Manual, manual);
        }
    }

    match (view.automatic, view.manual) {
        (Some(automatic), _) => {
            Arbitration::active(ArbiterState::AutomaticActive, Source::Automatic, automatic)
        }
        (None, Some(_)) => Arbitration::halted(HaltReason::ManualExpired),
        (None, None) => Arbitration::halted(HaltReason::NoInput),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn view_at(
        t0: Instant,
        automatic: Option<(Command, u64)>,
        manual: Option<(Command, u64)>,
        now_ms: u64,
    ) -> CommandView {
        let automatic = automatic.map(|(c, at)| TimestampedCommand::new(c, t0 + ms(at)));
        let manual = manual.map(|(c, at)| TimestampedCommand::new(c, t0 + ms(at)));
        let last_any_received_at = [automatic, manual]
            .iter()
            .flatten()
            .map(|e| e.received_at)
            .max();
        CommandView {
            automatic,
            manual,
            last_any_received_at,
            taken_at: t0 + ms(now_ms),
        }
    }

    #[test]
    fn test_empty_view_halts() {
        let result = resolve(&CommandView::empty(Instant::now()), &ArbitrationWindows::default());
        assert_eq!(result.state, ArbiterState::Halted);
        assert_eq!(result.command, Command::Stop);
        assert_eq!(result.halt_reason, Some(HaltReason::NoInput));
    }

    #[test]
    fn test_automatic_only() {
        let t0 = Instant::now();
        let view = view_at(t0, Some((Command::Forward, 0)), None, 50);
        let result = resolve(&view, &ArbitrationWindows::default());
        assert_eq!(result.state, ArbiterState::AutomaticActive);
        assert_eq!(result.command, Command::Forward);
        assert_eq!(result.authority, Some(Source::Automatic));
    }

    #[test]
    fn test_manual_wins_even_when_older() {
        let t0 = Instant::now();
        let view = view_at(t0, Some((Command::Forward, 300)), Some((Command::Left, 100)), 400);
        let result = resolve(&view, &ArbitrationWindows::default());
        assert_eq!(result.state, ArbiterState::ManualActive);
        assert_eq!(result.command, Command::Left);
    }

    #[test]
    fn test_manual_window_boundary() {
        let t0 = Instant::now();
        let windows = ArbitrationWindows::default();

        // One millisecond before expiry, manual still holds priority
        let view = view_at(t0, Some((Command::Forward, 900)), Some((Command::Right, 0)), 999);
        assert_eq!(resolve(&view, &windows).command, Command::Right);

        // At exactly the window, manual has expired
        let view = view_at(t0, Some((Command::Forward, 900)), Some((Command::Right, 0)), 1000);
        let result = resolve(&view, &windows);
        assert_eq!(result.state, ArbiterState::AutomaticActive);
        assert_eq!(result.command, Command::Forward);
    }

    #[test]
    fn test_expired_manual_without_automatic() {
        let t0 = Instant::now();
        let view = view_at(t0, None, Some((Command::Left, 0)), 1000);
        let result = resolve(&view, &ArbitrationWindows::default());
        assert_eq!(result.command, Command::Stop);
        assert_eq!(result.halt_reason, Some(HaltReason::ManualExpired));
    }

    #[test]
    fn test_watchdog_boundary() {
        let t0 = Instant::now();
        let windows = ArbitrationWindows::default();

        let view = view_at(t0, Some((Command::Forward, 0)), None, 1000);
        assert_eq!(resolve(&view, &windows).command, Command::Forward);

        let mut view = view_at(t0, Some((Command::Forward, 0)), None, 1000);
        view.taken_at += Duration::from_nanos(1);
        let result = resolve(&view, &windows);
        assert_eq!(result.command, Command::Stop);
        assert_eq!(result.halt_reason, Some(HaltReason::Stale));
    }

    #[test]
    fn test_watchdog_uses_last_arrival_not_slots() {
        let t0 = Instant::now();
        // Slots look fresh but the last-arrival marker says otherwise
        let mut view = view_at(t0, Some((Command::Forward, 500)), None, 600);
        view.last_any_received_at = Some(t0);
        view.taken_at = t0 + ms(1500);
        assert_eq!(resolve(&view, &ArbitrationWindows::default()).command, Command::Stop);
    }

    #[test]
    fn test_unknown_manual_masks_automatic() {
        let t0 = Instant::now();
        let view = view_at(t0, Some((Command::Forward, 0)), Some((Command::Unknown, 10)), 20);
        let result = resolve(&view, &ArbitrationWindows::default());
        assert_eq!(result.state, ArbiterState::ManualActive);
        assert_eq!(result.command, Command::Stop);
    }

    #[test]
    fn test_future_timestamps_count_as_fresh() {
        let t0 = Instant::now();
        let view = view_at(t0, Some((Command::Backward, 100)), None, 0);
        assert_eq!(resolve(&view, &ArbitrationWindows::default()).command, Command::Backward);
    }

    #[test]
    fn test_custom_windows() {
        let t0 = Instant::now();
        let windows = ArbitrationWindows {
            manual: ms(200),
            stale: ms(5000),
        };
        let view = view_at(t0, Some((Command::Forward, 0)), Some((Command::Left, 0)), 250);
        assert_eq!(resolve(&view, &windows).command, Command::Forward);

        let view = view_at(t0, Some((Command::Forward, 0)), None, 4000);
        assert_eq!(resolve(&view, &windows).command, Command::Forward);
    }

    #[test]
    fn test_reference_scenario() {
        let t0 = Instant::now();
        let windows = ArbitrationWindows::default();

        let mut view = view_at(t0, Some((Command::Forward, 0)), None, 50);
        assert_eq!(resolve(&view, &windows).command, Command::Forward);

        view.manual = Some(TimestampedCommand::new(Command::Left, t0 + ms(60)));
        view.last_any_received_at = Some(t0 + ms(60));
        view.taken_at = t0 + ms(100);
        assert_eq!(resolve(&view, &windows).command, Command::Left);

        // The automatic controller keeps publishing
        view.automatic = Some(TimestampedCommand::new(Command::Forward, t0 + ms(700)));
        view.last_any_received_at = Some(t0 + ms(700));
        view.taken_at = t0 + ms(1200);
        assert_eq!(resolve(&view, &windows).command, Command::Forward);

        view.taken_at = t0 + ms(2200);
        assert_eq!(resolve(&view, &windows).command, Command::Stop);
    }

    fn any_command() -> impl Strategy<Value = Command> {
        proptest::sample::select(Command::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn manual_priority_ignores_automatic(
            automatic in any_command(),
            manual in any_command(),
            manual_at in 0u64..2000,
            (manual_age, auto_after) in (0u64..1000).prop_flat_map(|age| (Just(age), 0..=age)),
        ) {
            let t0 = Instant::now();
            // Automatic lands between the manual arrival and the tick
            let auto_at = manual_at + auto_after;
            let view = view_at(
                t0,
                Some((automatic, auto_at)),
                Some((manual, manual_at)),
                manual_at + manual_age,
            );
            let result = resolve(&view, &ArbitrationWindows::default());
            let expected = if manual == Command::Unknown { Command::Stop } else { manual };
            prop_assert_eq!(result.state, ArbiterState::ManualActive);
            prop_assert_eq!(result.command, expected);
        }

        #[test]
        fn watchdog_always_stops(
            automatic in proptest::option::of(any_command()),
            manual in proptest::option::of(any_command()),
            silence_ms in 1001u64..10_000,
        ) {
            let t0 = Instant::now();
            let view = view_at(
                t0,
                automatic.map(|c| (c, 0)),
                manual.map(|c| (c, 0)),
                silence_ms,
            );
            let result = resolve(&view, &ArbitrationWindows::default());
            prop_assert_eq!(result.command, Command::Stop);
            prop_assert_eq!(result.state, ArbiterState::Halted);
        }
    }
}
