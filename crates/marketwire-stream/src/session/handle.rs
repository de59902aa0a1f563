/*
[INPUT]:  Registrations made through ConnectionSession
[OUTPUT]: Idempotent release capability returned to callers
[POS]:    Session layer - subscription handles
[UPDATE]: When adding new kinds of releasable registrations
*/

use std::sync::Weak;
use tracing::debug;

use crate::session::{Command, Shared, lock};
use crate::ws::SubscriptionId;

enum Registration {
    Streams(Vec<(String, SubscriptionId)>),
    MetricsListener(u64),
}

/// Capability returned by `subscribe`, `connect_to_streams` and
/// `add_metrics_listener`. Released by `unsubscribe()` or on drop; release is
/// idempotent and a no-op once the session is gone.
#[must_use = "dropping a SubscriptionHandle releases the subscription"]
pub struct SubscriptionHandle {
    shared: Weak<Shared>,
    registration: Option<Registration>,
}

impl SubscriptionHandle {
    pub(crate) fn for_streams(shared: Weak<Shared>, entries: Vec<(String, SubscriptionId)>) -> Self {
        Self {
            shared,
            registration: Some(Registration::Streams(entries)),
        }
    }

    pub(crate) fn metrics_listener(shared: Weak<Shared>, id: u64) -> Self {
        Self {
            shared,
            registration: Some(Registration::MetricsListener(id)),
        }
    }

    /// Handle that owns nothing, returned for rejected subscriptions.
    pub fn inert() -> Self {
        Self {
            shared: Weak::new(),
            registration: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.registration.is_some() && self.shared.strong_count() > 0
    }

    /// Streams this handle keeps registered.
    pub fn streams(&self) -> Vec<String> {
        match &self.registration {
            Some(Registration::Streams(entries)) => {
                entries.iter().map(|(stream, _)| stream.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn unsubscribe(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        let Some(shared) = self.shared.upgrade() else {
            debug!("subscription released after session teardown");
            return;
        };

        match registration {
            Registration::Streams(entries) => {
                let emptied: Vec<String> = {
                    let mut registry = lock(&shared.registry);
                    entries
                        .into_iter()
                        .filter(|(stream, id)| registry.unregister(stream, *id) == Some(true))
                        .map(|(stream, _)| stream)
                        .collect()
                };
                for stream in emptied {
                    let _ = shared.commands.send(Command::StreamRemoved(stream));
                }
            }
            Registration::MetricsListener(id) => {
                lock(&shared.listeners).remove(id);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .field("streams", &self.streams())
            .finish()
    }
}
