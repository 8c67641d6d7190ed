//! Subscription Hub: per-conversation fan-out and per-user presence channels.
//!
//! Each conversation with at least one listener has a [`Topic`]: a bounded
//! `tokio::sync::broadcast` channel plus a sequence counter.  Writers publish
//! with a non-blocking `send`; a listener that falls more than
//! `subscriber_buffer` updates behind gets `Lagged` from the channel and is
//! resynchronised from a fresh snapshot instead of holding anyone up.
//!
//! Every published update carries the topic sequence number it was assigned.
//! A snapshot records the sequence number it reflects, so updates already
//! folded into a snapshot are skipped rather than replayed on top of it.
//!
//! Presence uses one `tokio::sync::watch` channel per user: listeners only
//! ever see the latest value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use causerie_shared::{ChatError, ConversationId, MessageId, UserId};
use causerie_store::Message;

use crate::backoff::resync_delay;
use crate::config::SyncConfig;

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// What a conversation listener observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// Full ordered replay.  Sent first, and again after a resync.
    Snapshot { messages: Vec<Message> },
    /// A newly committed message.
    Appended { message: Message },
    /// A message was soft-deleted.
    Retracted { message_id: MessageId },
    /// Every message of the conversation was soft-deleted.
    Cleared,
    /// Resync failed; the subscription has ended.
    Disconnected { code: String, reason: String },
}

/// Updates published by the Message Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HubEvent {
    Appended(Message),
    Retracted(MessageId),
    Cleared,
}

impl From<HubEvent> for StreamUpdate {
    fn from(event: HubEvent) -> Self {
        match event {
            HubEvent::Appended(message) => StreamUpdate::Appended { message },
            HubEvent::Retracted(message_id) => StreamUpdate::Retracted { message_id },
            HubEvent::Cleared => StreamUpdate::Cleared,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    seq: u64,
    event: HubEvent,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    seq: u64,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Ordered replay of a conversation together with the topic sequence number
/// it reflects.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub seq: u64,
}

/// Provides snapshots for (re)synchronising listeners.
///
/// Implementations must read the messages and [`SubscriptionHub::current_seq`]
/// atomically with respect to publication.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self, conversation_id: &ConversationId) -> Result<Snapshot, ChatError>;
}

/// Callback-style listener driven by a task spawned in
/// [`SubscriptionHub::subscribe`].
pub trait StreamHandler: Send + 'static {
    fn on_update(&mut self, update: StreamUpdate);
}

impl<F> StreamHandler for F
where
    F: FnMut(StreamUpdate) + Send + 'static,
{
    fn on_update(&mut self, update: StreamUpdate) {
        self(update)
    }
}

/// Returned by [`SubscriptionHub::subscribe`]; pass to
/// [`SubscriptionHub::unsubscribe`] to tear the listener down.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub conversation_id: ConversationId,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub subscriber_buffer: usize,
    pub resync_max_attempts: u32,
    pub resync_base_delay: Duration,
}

impl From<&SyncConfig> for HubSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            subscriber_buffer: config.subscriber_buffer.max(1),
            resync_max_attempts: config.resync_max_attempts.max(1),
            resync_base_delay: config.resync_base_delay,
        }
    }
}

struct Listener {
    conversation_id: ConversationId,
    task: JoinHandle<()>,
}

struct HubInner {
    topics: Mutex<HashMap<ConversationId, Topic>>,
    presence: Mutex<HashMap<UserId, watch::Sender<bool>>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    settings: HubSettings,
}

/// Registry of `(conversation -> listeners)` and `(user -> presence channel)`.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl SubscriptionHub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                presence: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                settings,
            }),
        }
    }

    /// Queue an update for every listener of the conversation.  Never blocks
    /// on listeners; a no-op when nobody is listening.
    pub(crate) fn publish(&self, conversation_id: &ConversationId, event: HubEvent) {
        let Ok(mut topics) = self.inner.topics.lock() else {
            warn!(conversation = %conversation_id, "topic registry poisoned, dropping update");
            return;
        };
        if let Some(topic) = topics.get_mut(conversation_id) {
            topic.seq += 1;
            let delivered = topic
                .tx
                .send(Envelope {
                    seq: topic.seq,
                    event,
                })
                .unwrap_or(0);
            debug!(
                conversation = %conversation_id,
                seq = topic.seq,
                listeners = delivered,
                "Published conversation update"
            );
        }
    }

    /// Sequence number of the last update published for the conversation.
    pub fn current_seq(&self, conversation_id: &ConversationId) -> u64 {
        self.inner
            .topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(conversation_id).map(|t| t.seq))
            .unwrap_or(0)
    }

    /// Open a pull-based subscription.  The first update is always a
    /// snapshot.
    pub fn stream(
        &self,
        conversation_id: ConversationId,
        source: Arc<dyn SnapshotSource>,
    ) -> Subscription {
        let rx = {
            let mut topics = self
                .inner
                .topics
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let buffer = self.inner.settings.subscriber_buffer;
            topics
                .entry(conversation_id.clone())
                .or_insert_with(|| Topic {
                    tx: broadcast::channel(buffer).0,
                    seq: 0,
                })
                .tx
                .subscribe()
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(conversation = %conversation_id, subscription = id, "Listener attached");

        Subscription {
            id,
            conversation_id,
            rx,
            source,
            hub: self.clone(),
            last_seq: 0,
            needs_snapshot: true,
            closed: false,
        }
    }

    /// Register a callback listener.  A task drives `handler` until the
    /// subscription ends or [`unsubscribe`](Self::unsubscribe) is called.
    /// Must be called from within a tokio runtime.
    pub fn subscribe<H: StreamHandler>(
        &self,
        conversation_id: ConversationId,
        source: Arc<dyn SnapshotSource>,
        mut handler: H,
    ) -> SubscriptionHandle {
        let mut subscription = self.stream(conversation_id.clone(), source);
        let id = subscription.id();

        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let hub = self.clone();
        let task = tokio::spawn(async move {
            while let Some(update) = subscription.recv().await {
                handler.on_update(update);
            }
            drop(subscription);
            hub.forget_listener(id);
        });

        listeners.insert(
            id,
            Listener {
                conversation_id: conversation_id.clone(),
                task,
            },
        );

        info!(conversation = %conversation_id, subscription = id, "Subscribed");

        SubscriptionHandle {
            id,
            conversation_id,
        }
    }

    /// Tear a callback listener down.  Returns `false` if it had already
    /// ended.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let listener = self
            .inner
            .listeners
            .lock()
            .ok()
            .and_then(|mut listeners| listeners.remove(&handle.id));

        match listener {
            Some(listener) => {
                listener.task.abort();
                info!(
                    conversation = %listener.conversation_id,
                    subscription = handle.id,
                    "Unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    /// Number of listeners currently attached to the conversation.
    pub fn listener_count(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(conversation_id).map(|t| t.tx.receiver_count()))
            .unwrap_or(0)
    }

    fn forget_listener(&self, id: u64) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.remove(&id);
        }
    }

    /// Drop the topic once its last receiver (the caller's) goes away.
    fn release_topic(&self, conversation_id: &ConversationId) {
        if let Ok(mut topics) = self.inner.topics.lock() {
            if topics
                .get(conversation_id)
                .is_some_and(|t| t.tx.receiver_count() <= 1)
            {
                topics.remove(conversation_id);
                debug!(conversation = %conversation_id, "Removed idle topic");
            }
        }
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Watch a user's presence.  `current` seeds the channel when nobody is
    /// watching yet.
    pub(crate) fn watch_presence(&self, user: &UserId, current: bool) -> watch::Receiver<bool> {
        let mut presence = self
            .inner
            .presence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        presence
            .entry(user.clone())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Replace the user's presence value.  Watchers only see the latest one.
    pub(crate) fn publish_presence(&self, user: &UserId, online: bool) {
        let Ok(mut presence) = self.inner.presence.lock() else {
            return;
        };
        if let Some(tx) = presence.get(user) {
            if tx.receiver_count() == 0 {
                presence.remove(user);
            } else {
                tx.send_replace(online);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Pull-based listener for one conversation.
pub struct Subscription {
    id: u64,
    conversation_id: ConversationId,
    rx: broadcast::Receiver<Envelope>,
    source: Arc<dyn SnapshotSource>,
    hub: SubscriptionHub,
    last_seq: u64,
    needs_snapshot: bool,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Next update, `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<StreamUpdate> {
        if self.closed {
            return None;
        }

        loop {
            if self.needs_snapshot {
                return Some(self.resync().await);
            }

            match self.rx.recv().await {
                Ok(envelope) => {
                    if envelope.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = envelope.seq;
                    return Some(envelope.event.into());
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        conversation = %self.conversation_id,
                        subscription = self.id,
                        skipped,
                        "Listener lagged, resynchronising"
                    );
                    // Jump to the tail before the snapshot; the seq filter
                    // drops anything the snapshot already covers.
                    self.rx = self.rx.resubscribe();
                    self.needs_snapshot = true;
                }
                Err(RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn resync(&mut self) -> StreamUpdate {
        let settings = &self.hub.inner.settings;
        let mut attempt = 0;

        loop {
            match self.source.snapshot(&self.conversation_id) {
                Ok(snapshot) => {
                    self.last_seq = self.last_seq.max(snapshot.seq);
                    self.needs_snapshot = false;
                    return StreamUpdate::Snapshot {
                        messages: snapshot.messages,
                    };
                }
                Err(e) if e.is_retryable() && attempt + 1 < settings.resync_max_attempts => {
                    let delay = resync_delay(settings.resync_base_delay, attempt);
                    warn!(
                        conversation = %self.conversation_id,
                        attempt = attempt + 1,
                        max_attempts = settings.resync_max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Snapshot failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        conversation = %self.conversation_id,
                        error = %e,
                        "Giving up on listener resync"
                    );
                    self.closed = true;
                    return StreamUpdate::Disconnected {
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    };
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release_topic(&self.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use chrono::Utc;
    use tokio::sync::mpsc;

    use causerie_shared::Content;

    use super::*;

    fn settings(buffer: usize) -> HubSettings {
        HubSettings {
            subscriber_buffer: buffer,
            resync_max_attempts: 3,
            resync_base_delay: Duration::from_millis(1),
        }
    }

    fn conv() -> ConversationId {
        ConversationId::from_raw("u1_u2")
    }

    fn message(id: i64, text: &str) -> Message {
        Message {
            id: MessageId(id),
            conversation_id: conv(),
            sender_id: UserId::parse("u1").unwrap(),
            content: Content::Text(text.into()),
            sent_at: Utc::now(),
            deleted: false,
        }
    }

    /// In-memory log that publishes like the real Message Store does.
    struct FakeLog {
        hub: SubscriptionHub,
        messages: Mutex<Vec<Message>>,
    }

    impl FakeLog {
        fn append(&self, m: Message) {
            let mut messages = self.messages.lock().unwrap();
            messages.push(m.clone());
            self.hub.publish(&conv(), HubEvent::Appended(m));
        }

        fn clear(&self) {
            let mut messages = self.messages.lock().unwrap();
            messages.clear();
            self.hub.publish(&conv(), HubEvent::Cleared);
        }
    }

    impl SnapshotSource for FakeLog {
        fn snapshot(&self, conversation_id: &ConversationId) -> Result<Snapshot, ChatError> {
            let messages = self.messages.lock().unwrap();
            Ok(Snapshot {
                messages: messages.clone(),
                seq: self.hub.current_seq(conversation_id),
            })
        }
    }

    /// Fails with a transient error a fixed number of times.
    struct FlakySource {
        failures_left: AtomicU32,
    }

    impl SnapshotSource for FlakySource {
        fn snapshot(&self, _: &ConversationId) -> Result<Snapshot, ChatError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ChatError::TransientUnavailable("store offline".into()));
            }
            Ok(Snapshot {
                messages: vec![message(1, "back")],
                seq: 0,
            })
        }
    }

    fn log(hub: &SubscriptionHub) -> Arc<FakeLog> {
        Arc::new(FakeLog {
            hub: hub.clone(),
            messages: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn snapshot_then_ordered_updates() {
        let hub = SubscriptionHub::new(settings(16));
        let log = log(&hub);
        log.append(message(1, "hi"));

        let mut sub = hub.stream(conv(), log.clone());
        log.append(message(2, "yo"));
        log.append(message(3, "sup"));

        // Both appends happened before the snapshot was taken, so they are
        // in it and not delivered again.
        let expected = log.messages.lock().unwrap().clone();
        assert_eq!(
            sub.recv().await,
            Some(StreamUpdate::Snapshot { messages: expected })
        );

        log.append(message(4, "later"));
        match sub.recv().await {
            Some(StreamUpdate::Appended { message }) => assert_eq!(message.id, MessageId(4)),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn updates_folded_into_snapshot_are_not_replayed() {
        let hub = SubscriptionHub::new(settings(16));
        let log = log(&hub);

        let mut sub = hub.stream(conv(), log.clone());
        log.append(message(1, "gone"));
        log.clear();
        log.append(message(2, "kept"));

        // The snapshot already reflects the clear; replaying `Cleared` after
        // it would wipe "kept".
        match sub.recv().await {
            Some(StreamUpdate::Snapshot { messages }) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].id, MessageId(2));
            }
            other => panic!("unexpected update: {other:?}"),
        }

        log.append(message(3, "next"));
        match sub.recv().await {
            Some(StreamUpdate::Appended { message }) => assert_eq!(message.id, MessageId(3)),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_listener_resyncs_without_blocking_writers() {
        let hub = SubscriptionHub::new(settings(2));
        let log = log(&hub);

        let mut sub = hub.stream(conv(), log.clone());
        assert!(matches!(sub.recv().await, Some(StreamUpdate::Snapshot { .. })));

        for i in 1..=10 {
            log.append(message(i, "burst"));
        }

        match sub.recv().await {
            Some(StreamUpdate::Snapshot { messages }) => assert_eq!(messages.len(), 10),
            other => panic!("expected resync snapshot, got {other:?}"),
        }

        // Back on deltas, even past the buffer size.
        for i in 11..=14 {
            log.append(message(i, "after"));
            match sub.recv().await {
                Some(StreamUpdate::Appended { message }) => assert_eq!(message.id, MessageId(i)),
                other => panic!("unexpected update: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn transient_snapshot_failures_are_retried() {
        let hub = SubscriptionHub::new(settings(4));
        let source = Arc::new(FlakySource {
            failures_left: AtomicU32::new(2),
        });

        let mut sub = hub.stream(conv(), source);
        match sub.recv().await {
            Some(StreamUpdate::Snapshot { messages }) => assert_eq!(messages.len(), 1),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_resync_disconnects() {
        let hub = SubscriptionHub::new(settings(4));
        let source = Arc::new(FlakySource {
            failures_left: AtomicU32::new(100),
        });

        let mut sub = hub.stream(conv(), source);
        match sub.recv().await {
            Some(StreamUpdate::Disconnected { code, .. }) => {
                assert_eq!(code, "transient_unavailable")
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn callback_listener_lifecycle() {
        let hub = SubscriptionHub::new(settings(16));
        let log = log(&hub);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = hub.subscribe(conv(), log.clone(), move |update: StreamUpdate| {
            let _ = tx.send(update);
        });
        assert_eq!(hub.listener_count(&conv()), 1);

        assert!(matches!(rx.recv().await, Some(StreamUpdate::Snapshot { .. })));
        log.append(message(1, "hello"));
        assert!(matches!(rx.recv().await, Some(StreamUpdate::Appended { .. })));

        assert!(hub.unsubscribe(&handle));
        assert!(!hub.unsubscribe(&handle));

        // The aborted task drops its sender, closing the channel.
        assert_eq!(rx.recv().await, None);
        assert_eq!(hub.listener_count(&conv()), 0);
        assert_eq!(hub.current_seq(&conv()), 0);
    }

    #[tokio::test]
    async fn presence_watchers_see_latest_value() {
        let hub = SubscriptionHub::new(settings(4));
        let user = UserId::parse("u1").unwrap();

        let mut rx = hub.watch_presence(&user, false);
        assert!(!*rx.borrow());

        hub.publish_presence(&user, true);
        hub.publish_presence(&user, false);
        hub.publish_presence(&user, true);

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
    }
}
