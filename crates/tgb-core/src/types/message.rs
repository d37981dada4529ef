use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ChatId, MessageId, MessageRef, UserId};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub id: ChatId,
    /// `private`, `group`, `supergroup` or `channel`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A message as delivered in an update.
///
/// Decoding is lenient: id, chat and date fall back to zero values when the
/// sender omits them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: MessageId,
    #[serde(default)]
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Snapshot of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }

    /// Content kind of the message: the first field of [`MESSAGE_KINDS`] present.
    ///
    /// The remote protocol populates one content field per message; the fixed
    /// order only matters if it ever sends more than one.
    pub fn kind(&self) -> Option<MessageKind> {
        MESSAGE_KINDS.iter().copied().find(|k| self.has_field(k.field()))
    }

    fn has_field(&self, field: &str) -> bool {
        match field {
            "text" => self.text.is_some(),
            _ => match self.extra.get(field) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => false,
                Some(_) => true,
            },
        }
    }
}

macro_rules! message_kinds {
    ($($variant:ident => $field:literal,)*) => {
        /// Content kinds recognized on a message, named after their wire field.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $($variant,)*
        }

        /// Detection priority: `text` first, then alphabetical.
        pub const MESSAGE_KINDS: &[MessageKind] = &[$(MessageKind::$variant,)*];

        impl MessageKind {
            pub fn field(self) -> &'static str {
                match self {
                    $(MessageKind::$variant => $field,)*
                }
            }
        }
    };
}

message_kinds! {
    Text => "text",
    Animation => "animation",
    Audio => "audio",
    ChannelChatCreated => "channel_chat_created",
    Contact => "contact",
    DeleteChatPhoto => "delete_chat_photo",
    Dice => "dice",
    Document => "document",
    ForumTopicClosed => "forum_topic_closed",
    ForumTopicCreated => "forum_topic_created",
    ForumTopicEdited => "forum_topic_edited",
    ForumTopicReopened => "forum_topic_reopened",
    Game => "game",
    GroupChatCreated => "group_chat_created",
    Invoice => "invoice",
    LeftChatMember => "left_chat_member",
    Location => "location",
    MessageAutoDeleteTimerChanged => "message_auto_delete_timer_changed",
    MigrateFromChatId => "migrate_from_chat_id",
    MigrateToChatId => "migrate_to_chat_id",
    NewChatMembers => "new_chat_members",
    NewChatPhoto => "new_chat_photo",
    NewChatTitle => "new_chat_title",
    PassportData => "passport_data",
    Photo => "photo",
    PinnedMessage => "pinned_message",
    Poll => "poll",
    Sticker => "sticker",
    Story => "story",
    SuccessfulPayment => "successful_payment",
    SupergroupChatCreated => "supergroup_chat_created",
    Video => "video",
    VideoChatEnded => "video_chat_ended",
    VideoChatParticipantsInvited => "video_chat_participants_invited",
    VideoChatScheduled => "video_chat_scheduled",
    VideoChatStarted => "video_chat_started",
    VideoNote => "video_note",
    Voice => "voice",
    WebAppData => "web_app_data",
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}
