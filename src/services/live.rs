//! Change fan-out for WebSocket clients.
//!
//! Announcement changes are a bare signal (clients re-list). Access changes
//! carry the new status of one user. Emails with at least one connected
//! socket are "watched" and re-checked by [`spawn_access_poller`], so edits
//! made directly in the database still force a logout and end the user's
//! sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::user::{normalize_email, AccessStatus};
use crate::services::profiles::ProfileService;
use crate::services::session::SessionEpochs;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct AccessChange {
    pub email: String,
    pub status: AccessStatus,
}

#[derive(Debug, Default)]
struct Watch {
    subscribers: usize,
    last: Option<AccessStatus>,
}

#[derive(Clone)]
pub struct LiveHub {
    announcements: broadcast::Sender<()>,
    access: broadcast::Sender<AccessChange>,
    watched: Arc<Mutex<HashMap<String, Watch>>>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        let (announcements, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (access, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            announcements,
            access,
            watched: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn announcements_changed(&self) {
        // No receivers is fine.
        let _ = self.announcements.send(());
    }

    pub fn subscribe_announcements(&self) -> broadcast::Receiver<()> {
        self.announcements.subscribe()
    }

    pub fn subscribe_access(&self) -> broadcast::Receiver<AccessChange> {
        self.access.subscribe()
    }

    /// Record `status` for `email` and broadcast it if it differs from the
    /// last known status. Returns whether a change was sent.
    pub fn publish_access(&self, email: &str, status: AccessStatus) -> bool {
        let email = normalize_email(email);
        {
            let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(watch) = watched.get_mut(&email) {
                if watch.last == Some(status) {
                    return false;
                }
                watch.last = Some(status);
            }
        }
        debug!("access change for {email}: {status:?}");
        let _ = self.access.send(AccessChange { email, status });
        true
    }

    /// Register interest in `email` until the guard is dropped.
    pub fn watch(&self, email: &str, current: AccessStatus) -> WatchGuard {
        let email = normalize_email(email);
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        let watch = watched.entry(email.clone()).or_default();
        watch.subscribers += 1;
        // Later sockets keep the status the poller last published.
        watch.last.get_or_insert(current);
        WatchGuard {
            hub: self.clone(),
            email,
        }
    }

    pub fn watched_emails(&self) -> Vec<String> {
        let watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        watched.keys().cloned().collect()
    }

    fn unwatch(&self, email: &str) {
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(watch) = watched.get_mut(email) {
            watch.subscribers = watch.subscribers.saturating_sub(1);
            if watch.subscribers == 0 {
                watched.remove(email);
            }
        }
    }
}

pub struct WatchGuard {
    hub: LiveHub,
    email: String,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.hub.unwatch(&self.email);
    }
}

/// Re-read the access status of every watched user once. Users who lost
/// access are told so and their sessions are ended. Returns how many were
/// revoked.
pub async fn poll_access(
    hub: &LiveHub,
    profiles: &ProfileService,
    epochs: &dyn SessionEpochs,
) -> usize {
    let mut revoked = 0;
    for email in hub.watched_emails() {
        let status = match profiles.access_status(&email).await {
            Ok(status) => status,
            Err(e) => {
                warn!("access poll for {email} failed: {e}");
                continue;
            }
        };
        if hub.publish_access(&email, status) && !status.has_access {
            match epochs.bump(&email).await {
                Ok(_) => revoked += 1,
                Err(e) => warn!("could not end sessions of {email}: {e}"),
            }
        }
    }
    revoked
}

/// Run [`poll_access`] on an interval.
pub fn spawn_access_poller(
    hub: LiveHub,
    profiles: ProfileService,
    epochs: Arc<dyn SessionEpochs>,
    every: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let revoked = poll_access(&hub, &profiles, epochs.as_ref()).await;
            if revoked > 0 {
                debug!("access poll revoked {revoked} user(s)");
            }
        }
    });
}
