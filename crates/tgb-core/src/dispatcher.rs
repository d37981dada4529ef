//! Update Dispatcher: turns one decoded update into listener invocations.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::{
    events::{Event, EventKind, EventPayload},
    listeners::Listeners,
    types::{Message, Update, UpdateKind},
    Error, Result,
};

pub struct Dispatcher {
    listeners: Listeners,
    only_first_match: bool,
}

impl Dispatcher {
    pub fn new(only_first_match: bool) -> Self {
        Self {
            listeners: Listeners::new(),
            only_first_match,
        }
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Dispatch an update. Never fails; a panicking listener propagates its panic.
    pub fn process_update(&self, update: &Update) {
        debug!(update_id = update.update_id, "processing update");
        match &update.kind {
            UpdateKind::Message(msg) => self.process_message(msg),
            UpdateKind::EditedMessage(msg) => self.process_edit(
                msg,
                EventKind::EditedMessage,
                EventKind::EditedMessageText,
                EventKind::EditedMessageCaption,
            ),
            UpdateKind::ChannelPost(msg) => {
                self.emit(EventKind::ChannelPost, EventPayload::Message(msg, msg.kind()))
            }
            UpdateKind::EditedChannelPost(msg) => self.process_edit(
                msg,
                EventKind::EditedChannelPost,
                EventKind::EditedChannelPostText,
                EventKind::EditedChannelPostCaption,
            ),
            UpdateKind::InlineQuery(q) => {
                self.emit(EventKind::InlineQuery, EventPayload::InlineQuery(q))
            }
            UpdateKind::CallbackQuery(q) => {
                self.emit(EventKind::CallbackQuery, EventPayload::CallbackQuery(q))
            }
            UpdateKind::ChosenInlineResult(v) => {
                self.emit(EventKind::ChosenInlineResult, EventPayload::Raw(v))
            }
            UpdateKind::ShippingQuery(v) => self.emit(EventKind::ShippingQuery, EventPayload::Raw(v)),
            UpdateKind::PreCheckoutQuery(v) => {
                self.emit(EventKind::PreCheckoutQuery, EventPayload::Raw(v))
            }
            UpdateKind::Poll(v) => self.emit(EventKind::Poll, EventPayload::Raw(v)),
            UpdateKind::PollAnswer(v) => self.emit(EventKind::PollAnswer, EventPayload::Raw(v)),
            UpdateKind::MyChatMember(v) => self.emit(EventKind::MyChatMember, EventPayload::Raw(v)),
            UpdateKind::ChatMember(v) => self.emit(EventKind::ChatMember, EventPayload::Raw(v)),
            UpdateKind::ChatJoinRequest(v) => {
                self.emit(EventKind::ChatJoinRequest, EventPayload::Raw(v))
            }
            UpdateKind::Unknown(_) => {
                debug!(update_id = update.update_id, "update has no recognized payload");
            }
        }
    }

    /// Like [`Dispatcher::process_update`], but a panic inside a listener is
    /// caught and returned as [`Error::Listener`].
    pub fn try_process_update(&self, update: &Update) -> Result<()> {
        catch_unwind(AssertUnwindSafe(|| self.process_update(update))).map_err(|panic| {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Error::Listener(msg)
        })
    }

    /// Emit an event to every active listener registered for `kind`.
    pub fn emit(&self, kind: EventKind, payload: EventPayload<'_>) {
        let event = Event { kind, payload };
        for listener in self.listeners.event_snapshot(kind) {
            if listener.is_active() {
                (listener.callback)(&event);
            }
        }
    }

    /// Surface a transport error: emitted when someone listens for `kind`,
    /// logged otherwise.
    pub fn report_error(&self, kind: EventKind, err: &Error) {
        if self.listeners.has_event_listeners(kind) {
            self.emit(kind, EventPayload::Error(err));
        } else {
            error!("[{kind}] {err}");
        }
    }

    fn process_message(&self, msg: &Message) {
        let kind = msg.kind();
        self.emit(EventKind::Message, EventPayload::Message(msg, kind));
        if let Some(kind) = kind {
            debug!(%kind, "emitting content event");
            self.emit(EventKind::Content(kind), EventPayload::Message(msg, Some(kind)));
        }

        if let Some(text) = msg.text.as_deref() {
            for listener in self.listeners.text_snapshot() {
                if !listener.is_active() {
                    continue;
                }
                // `Regex` keeps no cursor between calls, so each message is
                // matched from the start.
                let Some(caps) = listener.regex.captures(text) else {
                    continue;
                };
                debug!(pattern = listener.regex.as_str(), "text listener matched");
                (listener.callback)(msg, &caps);
                if self.only_first_match {
                    break;
                }
            }
        }

        if msg.reply_to_message.is_some() {
            for listener in self.listeners.reply_snapshot() {
                if listener.is_active() && listener.matches(msg) {
                    (listener.callback)(msg);
                }
            }
        }
    }

    fn process_edit(&self, msg: &Message, event: EventKind, text: EventKind, caption: EventKind) {
        let kind = msg.kind();
        self.emit(event, EventPayload::Message(msg, kind));
        if msg.text.is_some() {
            self.emit(text, EventPayload::Message(msg, kind));
        }
        if msg.caption.is_some() {
            self.emit(caption, EventPayload::Message(msg, kind));
        }
    }
}
