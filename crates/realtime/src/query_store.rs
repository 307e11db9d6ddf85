//! In-process query cache
//!
//! Holds paginated message lists and conversation summaries keyed by
//! conversation, plus a stale set for aggregates the app refetches over
//! REST. Both the realtime path and REST fetches write here; every write
//! to a key runs under that key's shard lock, so a page fetch and a
//! realtime event for the same conversation never interleave.
//!
//! A REST fetch takes a [`FetchTicket`] before it is issued. When the
//! response lands, realtime edits made after the ticket are replayed on top
//! of it and stale marks set after the ticket survive, so a slow response
//! cannot undo an event the socket already delivered.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use fitsync_protocol::{ConversationId, ConversationSummary, MessageId, MessageRecord};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;
/// Realtime page edits kept per conversation for replay over late fetches.
const MAX_PENDING_EDITS: usize = 256;

/// Logical resource identifiers, mirroring the app's query keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "conversation_id", rename_all = "snake_case")]
pub enum QueryKey {
    Messages(ConversationId),
    ConversationList,
    Conversation(ConversationId),
    UnreadCount(ConversationId),
}

/// One page of messages, newest first.
pub type Page = Vec<MessageRecord>;

/// Pages for one conversation, newest page first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSet {
    pub pages: Vec<Page>,
}

impl PageSet {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// (page index, position) of a message.
    pub fn position(&self, message_id: MessageId) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(page_idx, page)| {
            page.iter()
                .position(|m| m.message_id == message_id)
                .map(|pos| (page_idx, pos))
        })
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.position(message_id).is_some()
    }

    pub fn first_page(&self) -> &[MessageRecord] {
        self.pages.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn message_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }
}

/// Store revision observed when a REST fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

/// A realtime change to a conversation's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageEdit {
    Prepend(MessageRecord),
    Replace(MessageRecord),
    Remove(MessageId),
}

impl PageEdit {
    /// Apply to `set`; false when it changes nothing.
    fn apply(&self, set: &mut PageSet) -> bool {
        match self {
            PageEdit::Prepend(message) => {
                if set.contains(message.message_id) {
                    return false;
                }
                match set.pages.first_mut() {
                    Some(first) => first.insert(0, message.clone()),
                    None => set.pages.push(vec![message.clone()]),
                }
                true
            }
            PageEdit::Replace(message) => match set.position(message.message_id) {
                Some((page, pos)) if set.pages[page][pos] != *message => {
                    set.pages[page][pos] = message.clone();
                    true
                }
                _ => false,
            },
            PageEdit::Remove(message_id) => match set.position(*message_id) {
                Some((page, pos)) => {
                    set.pages[page].remove(pos);
                    true
                }
                None => false,
            },
        }
    }
}

/// First and latest revision at which a key was marked stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StaleMark {
    first: u64,
    last: u64,
}

/// A change notification for observers (the UI layer re-reads the key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheChange {
    pub key: QueryKey,
    pub revision: u64,
    pub stale: bool,
}

pub struct QueryStore {
    pages: DashMap<ConversationId, PageSet>,
    summaries: DashMap<ConversationId, ConversationSummary>,
    stale: DashMap<QueryKey, StaleMark>,
    edits: DashMap<ConversationId, Vec<(u64, PageEdit)>>,
    revision: AtomicU64,
    changes: broadcast::Sender<CacheChange>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            pages: DashMap::new(),
            summaries: DashMap::new(),
            stale: DashMap::new(),
            edits: DashMap::new(),
            revision: AtomicU64::new(0),
            changes,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn notify(&self, key: QueryKey, revision: u64, stale: bool) {
        // No receivers is fine; observers come and go with screens.
        let _ = self.changes.send(CacheChange {
            key,
            revision,
            stale,
        });
    }

    fn bump(&self, key: QueryKey, stale: bool) {
        let revision = self.next_revision();
        self.notify(key, revision, stale);
    }

    /// Take before issuing a REST fetch; hand it back with the response.
    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket(self.revision())
    }

    /// Drop a stale mark unless it was set after `ticket`.
    fn clear_stale(&self, key: QueryKey, ticket: FetchTicket) {
        self.stale.remove_if(&key, |_, mark| mark.last <= ticket.0);
    }

    // -- Reads ----------------------------------------------------------------

    pub fn pages(&self, conversation_id: ConversationId) -> Option<PageSet> {
        self.pages.get(&conversation_id).map(|p| p.clone())
    }

    pub fn summary(&self, conversation_id: ConversationId) -> Option<ConversationSummary> {
        self.summaries.get(&conversation_id).map(|s| s.clone())
    }

    pub fn is_stale(&self, key: QueryKey) -> bool {
        self.stale.contains_key(&key)
    }

    /// Drain keys that need a refetch, oldest mark first.
    pub fn take_stale(&self) -> Vec<QueryKey> {
        let mut keys: Vec<(u64, QueryKey)> = self
            .stale
            .iter()
            .map(|e| (e.value().first, *e.key()))
            .collect();
        keys.sort();
        for (_, key) in &keys {
            self.stale.remove(key);
        }
        keys.into_iter().map(|(_, key)| key).collect()
    }

    // -- Point mutations (realtime path) --------------------------------------

    /// Prepend to the newest page unless the id is cached anywhere in the
    /// conversation. Creates the first page when none is cached.
    pub fn prepend_message(&self, conversation_id: ConversationId, message: MessageRecord) -> bool {
        self.edit_pages(conversation_id, PageEdit::Prepend(message))
    }

    /// Replace a cached message in place. False when not cached or unchanged.
    pub fn replace_message(&self, conversation_id: ConversationId, message: MessageRecord) -> bool {
        self.edit_pages(conversation_id, PageEdit::Replace(message))
    }

    /// Remove a cached message. False when not cached.
    pub fn remove_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.edit_pages(conversation_id, PageEdit::Remove(message_id))
    }

    fn edit_pages(&self, conversation_id: ConversationId, edit: PageEdit) -> bool {
        let (revision, overflowed) = {
            let entry = match &edit {
                PageEdit::Prepend(_) => Some(self.pages.entry(conversation_id).or_default()),
                _ => self.pages.get_mut(&conversation_id),
            };
            let Some(mut set) = entry else {
                return false;
            };
            if !edit.apply(set.value_mut()) {
                return false;
            }
            // Logged under the page lock so a landing fetch sees either both
            // the edit and its log entry or neither.
            let revision = self.next_revision();
            let mut log = self.edits.entry(conversation_id).or_default();
            log.push((revision, edit));
            let overflow = log.len().saturating_sub(MAX_PENDING_EDITS);
            log.drain(..overflow);
            (revision, overflow > 0)
        };
        self.notify(QueryKey::Messages(conversation_id), revision, false);
        if overflowed {
            // A fetch in flight can no longer be repaired by replay alone.
            self.mark_stale(QueryKey::Messages(conversation_id));
        }
        true
    }

    pub fn update_summary_or_default(
        &self,
        conversation_id: ConversationId,
        f: impl FnOnce(&mut ConversationSummary) -> bool,
    ) -> bool {
        let changed = {
            let mut entry = self
                .summaries
                .entry(conversation_id)
                .or_insert_with(|| ConversationSummary::new(conversation_id));
            f(entry.value_mut())
        };
        if changed {
            self.bump(QueryKey::Conversation(conversation_id), false);
        }
        changed
    }

    pub fn mark_stale(&self, key: QueryKey) {
        let revision = self.next_revision();
        self.stale
            .entry(key)
            .and_modify(|mark| mark.last = revision)
            .or_insert(StaleMark {
                first: revision,
                last: revision,
            });
        self.notify(key, revision, true);
    }

    // -- REST write path ------------------------------------------------------

    /// Store pages from a REST fetch issued at `ticket`.
    ///
    /// Realtime edits made after the ticket are replayed over the fetched
    /// pages in the order they were applied; older edits are assumed to be
    /// in the response and are dropped from the log.
    pub fn store_fetched_pages(
        &self,
        conversation_id: ConversationId,
        fetched: Vec<Page>,
        ticket: FetchTicket,
    ) {
        let mut fetched = PageSet::new(fetched);
        {
            let mut entry = self.pages.entry(conversation_id).or_default();
            if let Some(mut log) = self.edits.get_mut(&conversation_id) {
                log.retain(|(revision, _)| *revision > ticket.0);
                let mut replayed = 0;
                for (_, edit) in log.iter() {
                    if edit.apply(&mut fetched) {
                        replayed += 1;
                    }
                }
                if replayed > 0 {
                    debug!(
                        component = "query_store",
                        event = "query_store.fetch.merged",
                        conversation_id,
                        replayed,
                        "Replayed realtime edits over fetched pages"
                    );
                }
            }
            *entry.value_mut() = fetched;
        }
        self.clear_stale(QueryKey::Messages(conversation_id), ticket);
        self.bump(QueryKey::Messages(conversation_id), false);
    }

    /// Store a summary from a REST fetch issued at `ticket`. The later
    /// `last_message_at` wins and the unread count comes from the server.
    /// Stale marks set after the ticket are kept, so the app refetches again.
    pub fn store_fetched_summary(&self, fetched: ConversationSummary, ticket: FetchTicket) {
        let conversation_id = fetched.conversation_id;
        {
            let mut entry = self
                .summaries
                .entry(conversation_id)
                .or_insert_with(|| ConversationSummary::new(conversation_id));
            let cached = entry.value_mut();
            let keep_cached_last = match (&cached.last_message_at, &fetched.last_message_at) {
                (Some(cached_at), Some(fetched_at)) => {
                    compare_timestamps(cached_at, fetched_at) == CmpOrdering::Greater
                }
                (Some(_), None) => true,
                _ => false,
            };
            if !keep_cached_last {
                cached.last_message = fetched.last_message;
                cached.last_message_at = fetched.last_message_at;
            }
            cached.unread_count = fetched.unread_count;
        }
        self.clear_stale(QueryKey::Conversation(conversation_id), ticket);
        self.clear_stale(QueryKey::UnreadCount(conversation_id), ticket);
        self.bump(QueryKey::Conversation(conversation_id), false);
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).ok()
}

/// Order two ISO-8601 timestamps. Falls back to lexical order when either
/// side does not parse.
pub fn compare_timestamps(a: &str, b: &str) -> CmpOrdering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: MessageId, text: &str) -> MessageRecord {
        MessageRecord {
            message_id: id,
            conversation_id: 7,
            sender_id: 1,
            text: text.to_string(),
            sent_at: format!("2026-03-01T10:00:{:02}Z", id),
            edited_at: None,
            is_deleted: false,
            read_by: Vec::new(),
        }
    }

    fn ids(pages: &PageSet) -> Vec<Vec<MessageId>> {
        pages
            .pages
            .iter()
            .map(|p| p.iter().map(|m| m.message_id).collect())
            .collect()
    }

    fn seeded(pages: Vec<Page>) -> QueryStore {
        let store = QueryStore::new();
        store.store_fetched_pages(7, pages, store.begin_fetch());
        store
    }

    fn texts(pages: &PageSet) -> Vec<(MessageId, String)> {
        pages
            .pages
            .iter()
            .flatten()
            .map(|m| (m.message_id, m.text.clone()))
            .collect()
    }

    #[test]
    fn fetch_keeps_newer_realtime_messages() {
        let store = seeded(vec![vec![msg(10, "old")]]);

        let ticket = store.begin_fetch();
        assert!(store.prepend_message(7, msg(12, "live")));
        store.store_fetched_pages(
            7,
            vec![vec![msg(11, "b"), msg(10, "a")], vec![msg(9, "c")]],
            ticket,
        );

        let pages = store.pages(7).unwrap();
        assert_eq!(ids(&pages), vec![vec![12, 11, 10], vec![9]]);
    }

    #[test]
    fn fetch_keeps_edit_and_delete_made_while_in_flight() {
        let store = seeded(vec![vec![msg(10, "a"), msg(9, "b")]]);

        let ticket = store.begin_fetch();
        assert!(store.replace_message(7, msg(10, "a edited")));
        assert!(store.remove_message(7, 9));
        // The response was built before either event.
        store.store_fetched_pages(7, vec![vec![msg(10, "a"), msg(9, "b")]], ticket);

        let pages = store.pages(7).unwrap();
        assert_eq!(texts(&pages), vec![(10, "a edited".to_string())]);
    }

    #[test]
    fn fetch_issued_after_edits_replaces_cache() {
        let store = seeded(vec![vec![msg(10, "a")]]);
        assert!(store.replace_message(7, msg(10, "stale text")));
        assert!(store.prepend_message(7, msg(11, "gone on server")));

        let ticket = store.begin_fetch();
        store.store_fetched_pages(7, vec![vec![msg(10, "fresh text")]], ticket);

        let pages = store.pages(7).unwrap();
        assert_eq!(texts(&pages), vec![(10, "fresh text".to_string())]);

        // The replayed log was consumed; a second fetch is taken as is.
        store.store_fetched_pages(7, vec![vec![msg(10, "again")]], store.begin_fetch());
        assert_eq!(store.pages(7).unwrap().message_count(), 1);
    }

    #[test]
    fn edit_log_is_bounded() {
        let store = seeded(vec![]);
        let ticket = store.begin_fetch();
        for id in 0..(MAX_PENDING_EDITS as i64 + 10) {
            store.prepend_message(7, msg(id, "m"));
        }
        assert_eq!(store.edits.get(&7).unwrap().len(), MAX_PENDING_EDITS);

        store.store_fetched_pages(7, vec![], ticket);
        assert_eq!(store.pages(7).unwrap().message_count(), MAX_PENDING_EDITS);
        assert!(store.is_stale(QueryKey::Messages(7)));
    }

    #[test]
    fn fetch_clears_stale_mark() {
        let store = QueryStore::new();
        store.mark_stale(QueryKey::Messages(7));
        assert!(store.is_stale(QueryKey::Messages(7)));
        store.store_fetched_pages(7, vec![], store.begin_fetch());
        assert!(!store.is_stale(QueryKey::Messages(7)));
    }

    #[test]
    fn read_during_summary_fetch_stays_stale() {
        let store = QueryStore::new();
        let ticket = store.begin_fetch();
        store.mark_stale(QueryKey::UnreadCount(7));

        store.store_fetched_summary(
            ConversationSummary {
                conversation_id: 7,
                unread_count: 3,
                ..Default::default()
            },
            ticket,
        );
        assert!(store.is_stale(QueryKey::UnreadCount(7)));
        assert_eq!(store.summary(7).unwrap().unread_count, 3);

        // The refetch issued after the read clears it.
        store.store_fetched_summary(
            ConversationSummary {
                conversation_id: 7,
                unread_count: 0,
                ..Default::default()
            },
            store.begin_fetch(),
        );
        assert!(!store.is_stale(QueryKey::UnreadCount(7)));
        assert_eq!(store.summary(7).unwrap().unread_count, 0);
    }

    #[test]
    fn remark_after_ticket_keeps_earlier_mark_alive() {
        let store = QueryStore::new();
        store.mark_stale(QueryKey::UnreadCount(7));
        let ticket = store.begin_fetch();
        store.mark_stale(QueryKey::UnreadCount(7));

        store.store_fetched_summary(ConversationSummary::new(7), ticket);
        assert!(store.is_stale(QueryKey::UnreadCount(7)));
    }

    #[test]
    fn older_fetched_summary_does_not_regress_last_message() {
        let store = QueryStore::new();
        store.update_summary_or_default(7, |s| {
            s.last_message = Some(msg(12, "live"));
            s.last_message_at = Some("2026-03-01T10:00:12Z".into());
            true
        });

        store.store_fetched_summary(
            ConversationSummary {
                conversation_id: 7,
                last_message: Some(msg(11, "older")),
                last_message_at: Some("2026-03-01T10:00:11Z".into()),
                unread_count: 3,
            },
            store.begin_fetch(),
        );

        let summary = store.summary(7).unwrap();
        assert_eq!(summary.last_message.unwrap().message_id, 12);
        assert_eq!(summary.unread_count, 3);
    }

    #[test]
    fn newer_fetched_summary_wins() {
        let store = QueryStore::new();
        store.update_summary_or_default(7, |s| {
            s.last_message_at = Some("2026-03-01T10:00:12Z".into());
            true
        });
        store.store_fetched_summary(
            ConversationSummary {
                conversation_id: 7,
                last_message: Some(msg(13, "newer")),
                last_message_at: Some("2026-03-01T11:00:00+01:00".into()),
                unread_count: 0,
            },
            store.begin_fetch(),
        );
        // 11:00+01:00 is 10:00Z, which is older than 10:00:12Z.
        assert_eq!(
            store.summary(7).unwrap().last_message_at.as_deref(),
            Some("2026-03-01T10:00:12Z")
        );

        store.store_fetched_summary(
            ConversationSummary {
                conversation_id: 7,
                last_message: Some(msg(14, "newest")),
                last_message_at: Some("2026-03-01T10:05:00Z".into()),
                unread_count: 0,
            },
            store.begin_fetch(),
        );
        assert_eq!(
            store.summary(7).unwrap().last_message.unwrap().message_id,
            14
        );
    }

    #[test]
    fn take_stale_drains_in_mark_order() {
        let store = QueryStore::new();
        store.mark_stale(QueryKey::UnreadCount(3));
        store.mark_stale(QueryKey::ConversationList);
        store.mark_stale(QueryKey::UnreadCount(3));

        assert_eq!(
            store.take_stale(),
            vec![QueryKey::UnreadCount(3), QueryKey::ConversationList]
        );
        assert!(store.take_stale().is_empty());
    }

    #[test]
    fn changes_are_broadcast() {
        let store = QueryStore::new();
        let mut rx = store.subscribe();
        store.mark_stale(QueryKey::ConversationList);
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, QueryKey::ConversationList);
        assert!(change.stale);
        assert_eq!(change.revision, store.revision());
    }

    #[test]
    fn edits_without_cached_pages_are_noops() {
        let store = QueryStore::new();
        assert!(!store.replace_message(7, msg(1, "x")));
        assert!(!store.remove_message(7, 1));
        assert!(store.pages(7).is_none());
        assert!(store.edits.get(&7).is_none());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn timestamps_compare_across_offsets() {
        assert_eq!(
            compare_timestamps("2026-03-01T10:00:00Z", "2026-03-01T11:00:00+01:00"),
            CmpOrdering::Equal
        );
        assert_eq!(
            compare_timestamps("not-a-date-b", "not-a-date-a"),
            CmpOrdering::Greater
        );
    }
}
