//! Cache port
//!
//! The operations the synchronizer needs from the app's query cache, and the
//! adapter that maps them onto [`QueryStore`]. Every operation is
//! synchronous and atomic for its conversation.

use std::sync::Arc;

use fitsync_protocol::{ConversationId, MessageId, MessageRecord};

use crate::query_store::{compare_timestamps, PageSet, QueryKey, QueryStore};

pub trait CachePort: Send + Sync + 'static {
    /// Current pages for a conversation, if any are cached.
    fn pages(&self, conversation_id: ConversationId) -> Option<PageSet>;

    /// Prepend to the newest page unless a message with the same id is
    /// already cached anywhere in the conversation. Returns whether the
    /// message was inserted.
    fn prepend_to_first_page(&self, conversation_id: ConversationId, message: MessageRecord)
        -> bool;

    /// Replace a cached message in place. Returns false when not cached.
    fn replace_message(&self, conversation_id: ConversationId, message: MessageRecord) -> bool;

    /// Remove a cached message. Returns false when not cached.
    fn remove_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool;

    /// Point the conversation summary at `message`, unless the summary
    /// already holds a later `last_message_at`.
    fn record_last_message(
        &self,
        conversation_id: ConversationId,
        message: &MessageRecord,
        at: &str,
    ) -> bool;

    /// Flag a key for refetch.
    fn mark_stale(&self, key: QueryKey);
}

/// [`CachePort`] over the shared [`QueryStore`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct QueryCacheAdapter {
    store: Arc<QueryStore>,
}

impl QueryCacheAdapter {
    pub fn new(store: Arc<QueryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }
}

impl CachePort for QueryCacheAdapter {
    fn pages(&self, conversation_id: ConversationId) -> Option<PageSet> {
        self.store.pages(conversation_id)
    }

    fn prepend_to_first_page(
        &self,
        conversation_id: ConversationId,
        message: MessageRecord,
    ) -> bool {
        self.store.prepend_message(conversation_id, message)
    }

    fn replace_message(&self, conversation_id: ConversationId, message: MessageRecord) -> bool {
        self.store.replace_message(conversation_id, message)
    }

    fn remove_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.store.remove_message(conversation_id, message_id)
    }

    fn record_last_message(
        &self,
        conversation_id: ConversationId,
        message: &MessageRecord,
        at: &str,
    ) -> bool {
        self.store
            .update_summary_or_default(conversation_id, |summary| {
                let newer = summary
                    .last_message_at
                    .as_deref()
                    .map_or(true, |current| compare_timestamps(at, current).is_ge());
                if !newer || summary.last_message.as_ref() == Some(message) {
                    return false;
                }
                summary.last_message = Some(message.clone());
                summary.last_message_at = Some(at.to_string());
                true
            })
    }

    fn mark_stale(&self, key: QueryKey) {
        self.store.mark_stale(key);
    }
}
