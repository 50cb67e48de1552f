//! Command router - maps inbound messages onto command store slots

use crate::arbiter::CommandStore;
use crate::config::TopicConfig;
use rover_shared::{Command, Source};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What happened to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Stored in the slot for `source`
    Recorded { source: Source, command: Command },
    /// Not a command topic
    IgnoredTopic,
}

/// Arrival handler feeding the command store
pub struct CommandRouter {
    automatic_topic: String,
    manual_topic: String,
    store: Arc<CommandStore>,
}

impl CommandRouter {
    /// Create a router for the configured topics
    pub fn new(topics: &TopicConfig, store: Arc<CommandStore>) -> Self {
        Self {
            automatic_topic: topics.automatic.clone(),
            manual_topic: topics.manual.clone(),
            store,
        }
    }

    /// Source carried by a topic, if it is one of ours
    pub fn source_for(&self, topic: &str) -> Option<Source> {
        if topic == self.automatic_topic {
            Some(Source::Automatic)
        } else if topic == self.manual_topic {
            Some(Source::Manual)
        } else {
            None
        }
    }

    /// Handle one message. Never fails: bad payloads are stored as `Unknown`.
    pub fn route(&self, topic: &str, payload: &[u8], arrival: Instant) -> RouteOutcome {
        let Some(source) = self.source_for(topic) else {
            debug!("[ROUTER] Ignoring message on topic '{}'", topic);
            return RouteOutcome::IgnoredTopic;
        };

        let command = Command::from_payload(payload);
        if command == Command::Unknown {
            warn!(
                "[ROUTER] Unrecognized {} payload on '{}': {:?}",
                source,
                topic,
                String::from_utf8_lossy(payload)
            );
        } else {
            debug!("[ROUTER] Received {} command: {}", source, command);
        }

        self.store.record(source, command, arrival);
        RouteOutcome::Recorded { source, command }
    }
}
