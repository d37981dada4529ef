use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{Message, User};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_message_id: Option<String>,
    #[serde(default)]
    pub chat_instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_short_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The single payload carried by an update.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    InlineQuery(InlineQuery),
    ChosenInlineResult(Value),
    CallbackQuery(CallbackQuery),
    ShippingQuery(Value),
    PreCheckoutQuery(Value),
    Poll(Value),
    PollAnswer(Value),
    MyChatMember(Value),
    ChatMember(Value),
    ChatJoinRequest(Value),
    /// No recognized payload field; the whole envelope is kept.
    Unknown(Value),
}

/// An update envelope, decoded once into a tagged variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<Message>,
    edited_message: Option<Message>,
    channel_post: Option<Message>,
    edited_channel_post: Option<Message>,
    inline_query: Option<InlineQuery>,
    chosen_inline_result: Option<Value>,
    callback_query: Option<CallbackQuery>,
    shipping_query: Option<Value>,
    pre_checkout_query: Option<Value>,
    poll: Option<Value>,
    poll_answer: Option<Value>,
    my_chat_member: Option<Value>,
    chat_member: Option<Value>,
    chat_join_request: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let RawUpdate {
            update_id,
            message,
            edited_message,
            channel_post,
            edited_channel_post,
            inline_query,
            chosen_inline_result,
            callback_query,
            shipping_query,
            pre_checkout_query,
            poll,
            poll_answer,
            my_chat_member,
            chat_member,
            chat_join_request,
            mut rest,
        } = raw;

        // First populated field wins, in protocol order.
        let kind = message
            .map(UpdateKind::Message)
            .or_else(|| edited_message.map(UpdateKind::EditedMessage))
            .or_else(|| channel_post.map(UpdateKind::ChannelPost))
            .or_else(|| edited_channel_post.map(UpdateKind::EditedChannelPost))
            .or_else(|| inline_query.map(UpdateKind::InlineQuery))
            .or_else(|| chosen_inline_result.map(UpdateKind::ChosenInlineResult))
            .or_else(|| callback_query.map(UpdateKind::CallbackQuery))
            .or_else(|| shipping_query.map(UpdateKind::ShippingQuery))
            .or_else(|| pre_checkout_query.map(UpdateKind::PreCheckoutQuery))
            .or_else(|| poll.map(UpdateKind::Poll))
            .or_else(|| poll_answer.map(UpdateKind::PollAnswer))
            .or_else(|| my_chat_member.map(UpdateKind::MyChatMember))
            .or_else(|| chat_member.map(UpdateKind::ChatMember))
            .or_else(|| chat_join_request.map(UpdateKind::ChatJoinRequest))
            .unwrap_or_else(|| {
                rest.insert("update_id".to_string(), Value::from(update_id));
                UpdateKind::Unknown(Value::Object(rest))
            });

        Update { update_id, kind }
    }
}

impl<'de> Deserialize<'de> for Update {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawUpdate::deserialize(deserializer).map(Update::from)
    }
}

impl Update {
    pub fn from_value(v: Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(v)?)
    }

    /// The message-like payload, if this update carries one.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            UpdateKind::CallbackQuery(q) => q.message.as_ref(),
            _ => None,
        }
    }
}
