use std::fmt;

use serde_json::Value;

use crate::{
    types::{CallbackQuery, InlineQuery, Message, MessageKind},
    Error,
};

/// Named events a listener can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    /// Content-kind event for messages (`text`, `photo`, ...).
    Content(MessageKind),
    EditedMessage,
    EditedMessageText,
    EditedMessageCaption,
    ChannelPost,
    EditedChannelPost,
    EditedChannelPostText,
    EditedChannelPostCaption,
    InlineQuery,
    ChosenInlineResult,
    CallbackQuery,
    ShippingQuery,
    PreCheckoutQuery,
    Poll,
    PollAnswer,
    MyChatMember,
    ChatMember,
    ChatJoinRequest,
    PollingError,
    WebhookError,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Content(kind) => kind.field(),
            EventKind::EditedMessage => "edited_message",
            EventKind::EditedMessageText => "edited_message_text",
            EventKind::EditedMessageCaption => "edited_message_caption",
            EventKind::ChannelPost => "channel_post",
            EventKind::EditedChannelPost => "edited_channel_post",
            EventKind::EditedChannelPostText => "edited_channel_post_text",
            EventKind::EditedChannelPostCaption => "edited_channel_post_caption",
            EventKind::InlineQuery => "inline_query",
            EventKind::ChosenInlineResult => "chosen_inline_result",
            EventKind::CallbackQuery => "callback_query",
            EventKind::ShippingQuery => "shipping_query",
            EventKind::PreCheckoutQuery => "pre_checkout_query",
            EventKind::Poll => "poll",
            EventKind::PollAnswer => "poll_answer",
            EventKind::MyChatMember => "my_chat_member",
            EventKind::ChatMember => "chat_member",
            EventKind::ChatJoinRequest => "chat_join_request",
            EventKind::PollingError => "polling_error",
            EventKind::WebhookError => "webhook_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Borrowed payload handed to event listeners.
#[derive(Clone, Copy, Debug)]
pub enum EventPayload<'a> {
    /// A message plus its detected content kind.
    Message(&'a Message, Option<MessageKind>),
    CallbackQuery(&'a CallbackQuery),
    InlineQuery(&'a InlineQuery),
    Raw(&'a Value),
    Error(&'a Error),
}

#[derive(Clone, Copy, Debug)]
pub struct Event<'a> {
    pub kind: EventKind,
    pub payload: EventPayload<'a>,
}

impl<'a> Event<'a> {
    pub fn message(&self) -> Option<&'a Message> {
        match self.payload {
            EventPayload::Message(m, _) => Some(m),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&'a Error> {
        match self.payload {
            EventPayload::Error(e) => Some(e),
            _ => None,
        }
    }
}
