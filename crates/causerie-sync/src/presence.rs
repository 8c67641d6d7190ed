//! Presence Tracker: per-user online flag, persisted on the user record and
//! observable through the hub's latest-value channels.

use tokio::sync::watch;
use tracing::info;

use causerie_shared::{ChatError, UserId};

use crate::handle::DbHandle;
use crate::hub::SubscriptionHub;

#[derive(Clone)]
pub struct PresenceTracker {
    db: DbHandle,
    hub: SubscriptionHub,
}

impl PresenceTracker {
    pub(crate) fn new(db: DbHandle, hub: SubscriptionHub) -> Self {
        Self { db, hub }
    }

    /// Persist the flag and publish it to watchers.
    pub fn set_online(&self, user: &UserId, online: bool) -> Result<(), ChatError> {
        self.db.with(|db| {
            if !db.set_user_online(user, online)? {
                return Err(unknown(user));
            }
            self.hub.publish_presence(user, online);
            Ok(())
        })?;

        info!(user = %user, online, "Presence updated");
        Ok(())
    }

    pub fn is_online(&self, user: &UserId) -> Result<bool, ChatError> {
        self.db
            .with(|db| Ok(db.is_user_online(user)?))
            .map_err(|e| match e {
                ChatError::NotFound(_) => unknown(user),
                other => other,
            })
    }

    /// Latest-value channel for the user's presence, seeded with the stored
    /// flag.
    pub fn watch(&self, user: &UserId) -> Result<watch::Receiver<bool>, ChatError> {
        self.db.with(|db| {
            let online = db.is_user_online(user)?;
            Ok(self.hub.watch_presence(user, online))
        })
        .map_err(|e| match e {
            ChatError::NotFound(_) => unknown(user),
            other => other,
        })
    }
}

fn unknown(user: &UserId) -> ChatError {
    ChatError::NotFound(format!("user {user}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use causerie_store::{Database, ProfileUpdate};

    use super::*;
    use crate::hub::HubSettings;

    fn tracker() -> PresenceTracker {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(
            &UserId::parse("u1").unwrap(),
            &ProfileUpdate {
                display_name: "Ravi".into(),
                profile_image: None,
                status_text: None,
            },
        )
        .unwrap();
        let hub = SubscriptionHub::new(HubSettings {
            subscriber_buffer: 8,
            resync_max_attempts: 1,
            resync_base_delay: Duration::from_millis(1),
        });
        PresenceTracker::new(DbHandle::new(db), hub)
    }

    #[test]
    fn unknown_user_is_not_found() {
        let tracker = tracker();
        let ghost = UserId::parse("ghost").unwrap();
        assert!(matches!(
            tracker.set_online(&ghost, true),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(tracker.is_online(&ghost), Err(ChatError::NotFound(_))));
        assert!(matches!(tracker.watch(&ghost), Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn watcher_is_seeded_and_sees_latest_value() {
        let tracker = tracker();
        let u1 = UserId::parse("u1").unwrap();

        let mut rx = tracker.watch(&u1).unwrap();
        assert!(!*rx.borrow());

        tracker.set_online(&u1, true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(tracker.is_online(&u1).unwrap());

        // A late watcher starts from the stored value.
        let late = tracker.watch(&u1).unwrap();
        assert!(*late.borrow());
    }
}
