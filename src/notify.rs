//! Transient notification queue.

use crate::model::{Notification, Severity};
use std::time::Duration;
use tokio::time::Instant;

/// Ordered notifications, oldest first. Nothing is coalesced: pushing the same
/// message twice shows it twice.
pub struct NotificationQueue {
    next_id: u64,
    default_lifetime: Duration,
    entries: Vec<(Notification, Instant)>,
}

impl NotificationQueue {
    pub fn new(default_lifetime: Duration) -> Self {
        Self {
            next_id: 1,
            default_lifetime,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, message: impl Into<String>, severity: Severity) -> Notification {
        self.push_with_lifetime(message, severity, self.default_lifetime)
    }

    pub fn push_with_lifetime(
        &mut self,
        message: impl Into<String>,
        severity: Severity,
        lifetime: Duration,
    ) -> Notification {
        let n = Notification {
            id: self.next_id,
            message: message.into(),
            severity,
            lifetime,
        };
        self.next_id += 1;
        self.entries.push((n.clone(), Instant::now() + lifetime));
        n
    }

    /// Remove one notification. Returns false if it was already gone.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n.id != id);
        self.entries.len() != before
    }

    /// Drop everything whose lifetime has elapsed at `now`; returns the removed ids.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let mut removed = Vec::new();
        self.entries.retain(|(n, deadline)| {
            if *deadline <= now {
                removed.push(n.id);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter().map(|(n, _)| n)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
