//! Command Store
//!
//! Holds the latest automatic and manual commands and the time of the last
//! arrival of either kind. One lock guards all three fields so a snapshot is
//! never torn.

use parking_lot::Mutex;
use rover_shared::state_machine::{CommandView, TimestampedCommand};
use rover_shared::{Command, Source};
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
struct Slots {
    automatic: Option<TimestampedCommand>,
    manual: Option<TimestampedCommand>,
    last_any_received_at: Option<Instant>,
}

impl Slots {
    fn slot_mut(&mut self, source: Source) -> &mut Option<TimestampedCommand> {
        match source {
            Source::Automatic => &mut self.automatic,
            Source::Manual => &mut self.manual,
        }
    }
}

/// Shared latest-command store
#[derive(Debug, Default)]
pub struct CommandStore {
    slots: Mutex<Slots>,
}

impl CommandStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot for `source` and mark an arrival at `now`
    pub fn record(&self, source: Source, command: Command, now: Instant) {
        let entry = TimestampedCommand::new(command, now);
        let mut slots = self.slots.lock();
        *slots.slot_mut(source) = Some(entry);
        // A racing writer may hold an older timestamp; never move backwards
        slots.last_any_received_at = Some(match slots.last_any_received_at {
            Some(previous) => previous.max(now),
            None => now,
        });
    }

    /// Consistent view of the store as of `now`
    pub fn snapshot(&self, now: Instant) -> CommandView {
        let slots = *self.slots.lock();
        CommandView {
            automatic: slots.automatic,
            manual: slots.manual,
            last_any_received_at: slots.last_any_received_at,
            taken_at: now,
        }
    }

    /// Clear a slot only if it still holds the entry received at `received_at`
    ///
    /// Returns `true` if the slot was cleared. The last-arrival marker is left
    /// untouched so the watchdog still measures real silence.
    pub fn clear_if_unchanged(&self, source: Source, received_at: Instant) -> bool {
        let mut slots = self.slots.lock();
        let slot = slots.slot_mut(source);
        if slot.map(|entry| entry.received_at) == Some(received_at) {
            *slot = None;
            true
        } else {
            false
        }
    }
}
