//! Listener registries owned by the dispatcher.
//!
//! Dispatch iterates a snapshot of each list, so a callback may register or
//! remove listeners (itself included) while an update is being dispatched.
//! Removal also flips a shared `active` flag, which keeps an entry removed
//! mid-dispatch from firing later in the same pass.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use regex::{Captures, Regex};

use crate::{
    domain::{ChatId, ListenerId, MessageId},
    events::{Event, EventKind},
    types::Message,
};

pub type EventCallback = Arc<dyn Fn(&Event<'_>) + Send + Sync>;
pub type TextCallback = Arc<dyn Fn(&Message, &Captures<'_>) + Send + Sync>;
pub type ReplyCallback = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Clone)]
pub struct EventListener {
    pub id: ListenerId,
    pub kind: EventKind,
    pub callback: EventCallback,
    active: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct TextListener {
    pub id: ListenerId,
    pub regex: Regex,
    pub callback: TextCallback,
    active: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct ReplyListener {
    pub id: ListenerId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub callback: ReplyCallback,
    active: Arc<AtomicBool>,
}

impl EventListener {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl TextListener {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl ReplyListener {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn matches(&self, msg: &Message) -> bool {
        let Some(reply) = msg.reply_to_message.as_deref() else {
            return false;
        };
        self.chat_id == msg.chat.id && self.message_id == reply.message_id
    }
}

#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    events: Mutex<Vec<EventListener>>,
    text: Mutex<Vec<TextListener>>,
    replies: Mutex<Vec<ReplyListener>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Callbacks never run under these locks, so a poisoned guard still holds a
    // consistent list.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn take_where<T>(
    list: &mut Vec<T>,
    pred: impl Fn(&T) -> bool,
    flag: impl Fn(&T) -> &AtomicBool,
) -> usize {
    let before = list.len();
    list.retain(|l| {
        if pred(l) {
            flag(l).store(false, Ordering::Release);
            false
        } else {
            true
        }
    });
    before - list.len()
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn add_event(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        let id = self.next_id();
        lock(&self.events).push(EventListener {
            id,
            kind,
            callback,
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    pub fn remove_event(&self, id: ListenerId) -> bool {
        take_where(&mut *lock(&self.events), |l| l.id == id, |l| &l.active) > 0
    }

    pub fn has_event_listeners(&self, kind: EventKind) -> bool {
        lock(&self.events).iter().any(|l| l.kind == kind)
    }

    pub fn event_snapshot(&self, kind: EventKind) -> Vec<EventListener> {
        lock(&self.events)
            .iter()
            .filter(|l| l.kind == kind)
            .cloned()
            .collect()
    }

    pub fn add_text(&self, regex: Regex, callback: TextCallback) -> ListenerId {
        let id = self.next_id();
        lock(&self.text).push(TextListener {
            id,
            regex,
            callback,
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    pub fn remove_text(&self, id: ListenerId) -> bool {
        take_where(&mut *lock(&self.text), |l| l.id == id, |l| &l.active) > 0
    }

    /// Remove every text listener registered with exactly this pattern source.
    pub fn remove_text_pattern(&self, pattern: &str) -> usize {
        take_where(
            &mut *lock(&self.text),
            |l| l.regex.as_str() == pattern,
            |l| &l.active,
        )
    }

    pub fn clear_text(&self) -> usize {
        take_where(&mut *lock(&self.text), |_| true, |l| &l.active)
    }

    pub fn text_snapshot(&self) -> Vec<TextListener> {
        lock(&self.text).clone()
    }

    pub fn add_reply(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        callback: ReplyCallback,
    ) -> ListenerId {
        let id = self.next_id();
        lock(&self.replies).push(ReplyListener {
            id,
            chat_id,
            message_id,
            callback,
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    pub fn remove_reply(&self, id: ListenerId) -> bool {
        take_where(&mut *lock(&self.replies), |l| l.id == id, |l| &l.active) > 0
    }

    pub fn clear_replies(&self) -> usize {
        take_where(&mut *lock(&self.replies), |_| true, |l| &l.active)
    }

    pub fn reply_snapshot(&self) -> Vec<ReplyListener> {
        lock(&self.replies).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_text() -> TextCallback {
        Arc::new(|_, _| {})
    }

    #[test]
    fn ids_are_unique_across_registries() {
        let l = Listeners::new();
        let a = l.add_event(EventKind::Message, Arc::new(|_| {}));
        let b = l.add_text(Regex::new("x").unwrap(), noop_text());
        let c = l.add_reply(ChatId(1), MessageId(2), Arc::new(|_| {}));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(l.has_event_listeners(EventKind::Message));
        assert!(!l.has_event_listeners(EventKind::PollingError));
    }

    #[test]
    fn removal_deactivates_snapshotted_entries() {
        let l = Listeners::new();
        let id = l.add_text(Regex::new("^/start").unwrap(), noop_text());
        let snap = l.text_snapshot();
        assert!(snap[0].is_active());
        assert!(l.remove_text(id));
        assert!(!snap[0].is_active());
        assert!(!l.remove_text(id));
        assert!(l.text_snapshot().is_empty());
    }

    #[test]
    fn remove_by_pattern_and_clear() {
        let l = Listeners::new();
        l.add_text(Regex::new("a").unwrap(), noop_text());
        l.add_text(Regex::new("a").unwrap(), noop_text());
        l.add_text(Regex::new("b").unwrap(), noop_text());
        assert_eq!(l.remove_text_pattern("a"), 2);
        assert_eq!(l.clear_text(), 1);

        l.add_reply(ChatId(1), MessageId(1), Arc::new(|_| {}));
        l.add_reply(ChatId(1), MessageId(2), Arc::new(|_| {}));
        assert_eq!(l.clear_replies(), 2);
        assert!(l.reply_snapshot().is_empty());
    }
}
