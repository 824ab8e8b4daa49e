//! Presence table
//!
//! Keeps one status per username out of a stream of status-change events
//! that may arrive in any order across users and may repeat. Reconciliation
//! is a pure function of the current table and one event; whoever renders
//! the notices is somebody else's business.

use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::message::Status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub user: String,
    pub status: Status,
}

impl StatusEvent {
    pub fn new(user: impl Into<String>, status: Status) -> Self {
        Self {
            user: user.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceNotice {
    Appeared { user: String, status: Status },
    Changed { user: String, from: Status, to: Status },
    WentOffline { user: String },
}

impl fmt::Display for PresenceNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceNotice::Appeared { user, status } => write!(f, "{user} is {status}"),
            PresenceNotice::Changed { user, to, .. } => {
                write!(f, "{user} has changed their status to {to}")
            }
            PresenceNotice::WentOffline { user } => write!(f, "{user} has gone offline"),
        }
    }
}

/// Username → status, at most one entry per user, never `Offline`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceTable {
    entries: BTreeMap<String, Status>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &str) -> Option<Status> {
        self.entries.get(user).copied()
    }

    pub fn contains(&self, user: &str) -> bool {
        self.entries.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by username.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Status)> {
        self.entries.iter().map(|(user, status)| (user.as_str(), *status))
    }
}

/// Applies one status event to `table`.
///
/// - unknown user: inserted, `Appeared`
/// - same status as recorded: nothing
/// - different status: updated, `Changed`
/// - `Offline`: removed, `WentOffline` (nothing if the user was unknown)
pub fn reconcile(
    mut table: PresenceTable,
    event: &StatusEvent,
) -> (PresenceTable, Vec<PresenceNotice>) {
    let current = table.get(&event.user);
    let user = event.user.clone();

    let notice = match (current, event.status) {
        (None, Status::Offline) => None,
        (Some(_), Status::Offline) => {
            table.entries.remove(&event.user);
            Some(PresenceNotice::WentOffline { user })
        }
        (None, status) => {
            table.entries.insert(user.clone(), status);
            Some(PresenceNotice::Appeared { user, status })
        }
        (Some(from), to) if from == to => None,
        (Some(from), to) => {
            table.entries.insert(user.clone(), to);
            Some(PresenceNotice::Changed { user, from, to })
        }
    };

    (table, notice.into_iter().collect())
}
