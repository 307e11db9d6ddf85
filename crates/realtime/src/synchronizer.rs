//! Cache synchronizer
//!
//! Folds realtime events into the message and conversation caches. Every
//! handler is idempotent: redelivery after a reconnect is expected, so
//! applying an event twice must leave the cache exactly as applying it once.

use fitsync_protocol::{EventEnvelope, MessageRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CachePort;
use crate::query_store::QueryKey;

/// What applying one event did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New message added to the first page.
    Prepended,
    /// Message id already cached; nothing changed.
    Duplicate,
    Replaced,
    Removed,
    /// The target message is outside the cached window; nothing changed.
    NotCached,
    /// Only stale marks were set.
    MarkedStale,
    /// The event carries nothing to apply.
    Ignored,
}

pub struct CacheSynchronizer<C> {
    port: C,
}

impl<C: CachePort> CacheSynchronizer<C> {
    pub fn new(port: C) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &C {
        &self.port
    }

    pub fn apply(&self, event: &EventEnvelope) -> Applied {
        match event {
            EventEnvelope::NewMessage {
                conversation_id,
                message,
                timestamp,
            } => self.apply_new_message(*conversation_id, message, timestamp.as_deref()),

            EventEnvelope::MessageEdited {
                conversation_id,
                message,
                ..
            } => {
                if self.port.replace_message(*conversation_id, message.clone()) {
                    Applied::Replaced
                } else if self.is_cached(*conversation_id, message.message_id) {
                    // Same content already in place.
                    Applied::Replaced
                } else {
                    Applied::NotCached
                }
            }

            EventEnvelope::MessageDeleted {
                conversation_id,
                message_id,
                ..
            } => {
                if self.port.remove_message(*conversation_id, *message_id) {
                    Applied::Removed
                } else {
                    Applied::NotCached
                }
            }

            // Read receipts are not applied optimistically; the server
            // owns the unread count.
            EventEnvelope::MessageRead {
                conversation_id, ..
            } => {
                self.port.mark_stale(QueryKey::UnreadCount(*conversation_id));
                Applied::MarkedStale
            }

            EventEnvelope::Error { .. } => Applied::Ignored,
        }
    }

    fn apply_new_message(
        &self,
        conversation_id: i64,
        message: &MessageRecord,
        timestamp: Option<&str>,
    ) -> Applied {
        if !self
            .port
            .prepend_to_first_page(conversation_id, message.clone())
        {
            return Applied::Duplicate;
        }

        let at = timestamp.unwrap_or(&message.sent_at);
        self.port.record_last_message(conversation_id, message, at);
        self.port.mark_stale(QueryKey::ConversationList);
        Applied::Prepended
    }

    fn is_cached(&self, conversation_id: i64, message_id: i64) -> bool {
        self.port
            .pages(conversation_id)
            .is_some_and(|pages| pages.contains(message_id))
    }
}

/// Spawn the single consumer that applies events in channel order.
pub fn spawn_synchronizer<C: CachePort>(
    synchronizer: CacheSynchronizer<C>,
    mut event_rx: mpsc::Receiver<EventEnvelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let applied = synchronizer.apply(&event);
            debug!(
                component = "synchronizer",
                event = "synchronizer.event.applied",
                kind = event.kind().as_str(),
                conversation_id = ?event.conversation_id(),
                outcome = ?applied,
                "Applied realtime event"
            );
        }
        info!(
            component = "synchronizer",
            event = "synchronizer.stopped",
            "Event channel closed, synchronizer stopped"
        );
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cache::QueryCacheAdapter;
    use crate::query_store::PageSet;
    use fitsync_protocol::{decode_frame, Decoded};

    fn msg(id: i64, text: &str) -> MessageRecord {
        MessageRecord {
            message_id: id,
            conversation_id: 7,
            sender_id: 3,
            text: text.to_string(),
            sent_at: format!("2026-03-01T10:00:{:02}Z", id),
            edited_at: None,
            is_deleted: false,
            read_by: Vec::new(),
        }
    }

    fn new_message(id: i64, text: &str) -> EventEnvelope {
        EventEnvelope::NewMessage {
            conversation_id: 7,
            message: msg(id, text),
            timestamp: Some(format!("2026-03-01T10:00:{:02}Z", id)),
        }
    }

    fn synchronizer() -> CacheSynchronizer<QueryCacheAdapter> {
        CacheSynchronizer::new(QueryCacheAdapter::default())
    }

    fn seed(sync: &CacheSynchronizer<QueryCacheAdapter>, pages: Vec<Vec<MessageRecord>>) {
        let store = sync.port().store();
        store.store_fetched_pages(7, pages, store.begin_fetch());
    }

    fn first_page_ids(sync: &CacheSynchronizer<QueryCacheAdapter>) -> Vec<i64> {
        sync.port()
            .pages(7)
            .unwrap_or_default()
            .first_page()
            .iter()
            .map(|m| m.message_id)
            .collect()
    }

    fn snapshot(sync: &CacheSynchronizer<QueryCacheAdapter>) -> (Option<PageSet>, bool) {
        let store = sync.port().store();
        (store.pages(7), store.summary(7).is_some())
    }

    #[test]
    fn new_message_into_empty_cache() {
        let sync = synchronizer();
        assert_eq!(sync.apply(&new_message(1, "hi")), Applied::Prepended);

        assert_eq!(first_page_ids(&sync), vec![1]);
        let summary = sync.port().store().summary(7).unwrap();
        assert_eq!(summary.last_message.unwrap().text, "hi");
        assert_eq!(
            summary.last_message_at.as_deref(),
            Some("2026-03-01T10:00:01Z")
        );
        assert!(sync.port().store().is_stale(QueryKey::ConversationList));
    }

    #[test]
    fn redelivered_new_message_is_deduplicated() {
        let sync = synchronizer();
        sync.apply(&new_message(1, "hi"));
        let before = snapshot(&sync);
        let revision = sync.port().store().revision();

        assert_eq!(sync.apply(&new_message(1, "hi")), Applied::Duplicate);
        assert_eq!(snapshot(&sync), before);
        assert_eq!(first_page_ids(&sync), vec![1]);
        assert_eq!(sync.port().store().revision(), revision);
    }

    #[test]
    fn duplicate_of_message_42_keeps_length_and_order() {
        let sync = synchronizer();
        for id in [40, 41, 42, 43] {
            sync.apply(&new_message(id, "x"));
        }
        let before = first_page_ids(&sync);
        sync.apply(&new_message(42, "x"));
        assert_eq!(first_page_ids(&sync), before);
    }

    #[test]
    fn delete_after_new_message_empties_page() {
        let sync = synchronizer();
        sync.apply(&new_message(1, "hi"));

        let delete = EventEnvelope::MessageDeleted {
            conversation_id: 7,
            message_id: 1,
            timestamp: None,
        };
        assert_eq!(sync.apply(&delete), Applied::Removed);
        assert!(first_page_ids(&sync).is_empty());
        assert_eq!(sync.apply(&delete), Applied::NotCached);
        assert!(first_page_ids(&sync).is_empty());
    }

    #[test]
    fn increasing_timestamps_yield_newest_first() {
        let sync = synchronizer();
        for id in 1..=5 {
            sync.apply(&new_message(id, "x"));
        }
        assert_eq!(first_page_ids(&sync), vec![5, 4, 3, 2, 1]);
        let summary = sync.port().store().summary(7).unwrap();
        assert_eq!(summary.last_message.unwrap().message_id, 5);
    }

    #[test]
    fn late_new_message_does_not_rewind_last_message_at() {
        let sync = synchronizer();
        sync.apply(&new_message(5, "newer"));
        sync.apply(&new_message(4, "late"));

        let summary = sync.port().store().summary(7).unwrap();
        assert_eq!(summary.last_message.unwrap().message_id, 5);
        assert_eq!(
            summary.last_message_at.as_deref(),
            Some("2026-03-01T10:00:05Z")
        );
    }

    #[test]
    fn new_message_without_timestamp_uses_sent_at() {
        let sync = synchronizer();
        sync.apply(&EventEnvelope::NewMessage {
            conversation_id: 7,
            message: msg(3, "x"),
            timestamp: None,
        });
        assert_eq!(
            sync.port().store().summary(7).unwrap().last_message_at.as_deref(),
            Some("2026-03-01T10:00:03Z")
        );
    }

    #[test]
    fn edit_replaces_in_place_and_is_idempotent() {
        let sync = synchronizer();
        seed(&sync, vec![vec![msg(3, "c")], vec![msg(2, "b"), msg(1, "a")]]);

        let mut edited = msg(2, "b, edited");
        edited.edited_at = Some("2026-03-01T11:00:00Z".into());
        let event = EventEnvelope::MessageEdited {
            conversation_id: 7,
            message: edited.clone(),
            timestamp: None,
        };

        assert_eq!(sync.apply(&event), Applied::Replaced);
        let once = sync.port().pages(7);
        assert_eq!(sync.apply(&event), Applied::Replaced);
        assert_eq!(sync.port().pages(7), once);

        let pages = once.unwrap();
        assert_eq!(pages.position(2), Some((1, 0)));
        assert_eq!(pages.pages[1][0], edited);
    }

    #[test]
    fn edit_outside_cached_window_is_discarded() {
        let sync = synchronizer();
        sync.apply(&new_message(1, "hi"));
        let before = snapshot(&sync);

        let event = EventEnvelope::MessageEdited {
            conversation_id: 7,
            message: msg(99, "ghost"),
            timestamp: None,
        };
        assert_eq!(sync.apply(&event), Applied::NotCached);
        assert_eq!(snapshot(&sync), before);
    }

    #[test]
    fn message_read_only_marks_unread_stale() {
        let sync = synchronizer();
        sync.apply(&new_message(1, "hi"));
        let before = snapshot(&sync);
        let summary_before = sync.port().store().summary(7);

        let event = EventEnvelope::MessageRead {
            conversation_id: 7,
            timestamp: None,
        };
        assert_eq!(sync.apply(&event), Applied::MarkedStale);
        assert_eq!(snapshot(&sync), before);
        assert_eq!(sync.port().store().summary(7), summary_before);
        assert!(sync.port().store().is_stale(QueryKey::UnreadCount(7)));
    }

    #[test]
    fn error_event_changes_nothing() {
        let sync = synchronizer();
        let event = EventEnvelope::Error {
            conversation_id: Some(7),
            detail: None,
            timestamp: None,
        };
        assert_eq!(sync.apply(&event), Applied::Ignored);
        assert_eq!(sync.port().store().revision(), 0);
    }

    #[test]
    fn every_kind_is_idempotent() {
        let frames = [
            r#"{"type":"new_message","conversation_id":7,"message":{"id":10,"sender":1,"content":"a","created_at":"2026-03-01T10:00:10Z"},"timestamp":"2026-03-01T10:00:10Z"}"#,
            r#"{"type":"message_edited","conversation_id":7,"message":{"id":10,"sender":1,"content":"b","created_at":"2026-03-01T10:00:10Z"}}"#,
            r#"{"type":"message_deleted","conversation_id":7,"message_id":10}"#,
            r#"{"type":"message_read","conversation_id":7}"#,
            r#"{"type":"error"}"#,
        ];

        for raw in frames {
            let Decoded::Event(event) = decode_frame(raw) else {
                panic!("frame should decode: {raw}");
            };

            let once = synchronizer();
            seed(&once, vec![vec![msg(10, "seed")]]);
            once.apply(&event);

            let twice = synchronizer();
            seed(&twice, vec![vec![msg(10, "seed")]]);
            twice.apply(&event);
            twice.apply(&event);

            assert_eq!(once.port().pages(7), twice.port().pages(7), "{raw}");
            assert_eq!(
                once.port().store().summary(7),
                twice.port().store().summary(7),
                "{raw}"
            );
        }
    }

    /// Records calls without holding any cache state.
    #[derive(Default)]
    struct RecordingPort {
        calls: Mutex<Vec<String>>,
    }

    impl CachePort for RecordingPort {
        fn pages(&self, _: i64) -> Option<PageSet> {
            None
        }
        fn prepend_to_first_page(&self, id: i64, m: MessageRecord) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("prepend {id} {}", m.message_id));
            true
        }
        fn replace_message(&self, id: i64, m: MessageRecord) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("replace {id} {}", m.message_id));
            false
        }
        fn remove_message(&self, id: i64, message_id: i64) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remove {id} {message_id}"));
            false
        }
        fn record_last_message(&self, id: i64, m: &MessageRecord, at: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("last {id} {} {at}", m.message_id));
            true
        }
        fn mark_stale(&self, key: QueryKey) {
            self.calls.lock().unwrap().push(format!("stale {key:?}"));
        }
    }

    #[test]
    fn new_message_call_order() {
        let sync = CacheSynchronizer::new(RecordingPort::default());
        sync.apply(&new_message(1, "hi"));
        assert_eq!(
            *sync.port().calls.lock().unwrap(),
            vec![
                "prepend 7 1".to_string(),
                "last 7 1 2026-03-01T10:00:01Z".to_string(),
                "stale ConversationList".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn consumer_applies_in_channel_order() {
        let adapter = QueryCacheAdapter::default();
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_synchronizer(CacheSynchronizer::new(adapter.clone()), rx);

        for id in 1..=3 {
            tx.send(new_message(id, "x")).await.unwrap();
        }
        tx.send(new_message(2, "x")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let ids: Vec<i64> = adapter
            .pages(7)
            .unwrap()
            .first_page()
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
