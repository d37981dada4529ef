//! Endpoint wrappers: parameter marshaling over [`BotApi::call`].
//!
//! Every method is a thin mapping of its arguments into [`Params`]. Optional
//! arguments of the remote method go through the trailing `params`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::Error,
    ports::{ApiRequest, BotApi, InputFile, Params},
    types::{Message, User},
    Result,
};

/// File metadata returned by `getFile`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn decode<T: DeserializeOwned>(method: &str, v: Value) -> Result<T> {
    T::deserialize(&v).map_err(|e| Error::Parse {
        message: format!("unexpected {method} result: {e}"),
        body: v.to_string(),
    })
}

async fn invoke<A, T>(api: &A, method: &str, params: Params) -> Result<T>
where
    A: BotApi + ?Sized,
    T: DeserializeOwned,
{
    let v = api.call(ApiRequest::new(method).params(params)).await?;
    decode(method, v)
}

#[async_trait]
pub trait Endpoints: BotApi {
    async fn get_me(&self) -> Result<User> {
        invoke(self, "getMe", Params::new()).await
    }

    async fn log_out(&self) -> Result<bool> {
        invoke(self, "logOut", Params::new()).await
    }

    async fn close(&self) -> Result<bool> {
        invoke(self, "close", Params::new()).await
    }

    /// Raw update objects; decoding is left to the caller so one malformed
    /// update does not poison the batch.
    async fn get_updates(&self, params: Params, timeout: Option<Duration>) -> Result<Vec<Value>> {
        let mut req = ApiRequest::new("getUpdates").params(params);
        req.timeout = timeout;
        let v = self.call(req).await?;
        decode("getUpdates", v)
    }

    async fn set_web_hook(&self, url: &str, params: Params) -> Result<bool> {
        invoke(self, "setWebhook", params.with("url", url)).await
    }

    async fn delete_web_hook(&self, params: Params) -> Result<bool> {
        invoke(self, "deleteWebhook", params).await
    }

    async fn get_web_hook_info(&self) -> Result<Value> {
        invoke(self, "getWebhookInfo", Params::new()).await
    }

    async fn send_message<C>(&self, chat_id: C, text: &str, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        let params = params.with("chat_id", chat_id).with("text", text);
        invoke(self, "sendMessage", params).await
    }

    async fn forward_message<C, F>(
        &self,
        chat_id: C,
        from_chat_id: F,
        message_id: i32,
        params: Params,
    ) -> Result<Message>
    where
        C: Into<Value> + Send,
        F: Into<Value> + Send,
    {
        let params = params
            .with("chat_id", chat_id)
            .with("from_chat_id", from_chat_id)
            .with("message_id", message_id);
        invoke(self, "forwardMessage", params).await
    }

    async fn copy_message<C, F>(
        &self,
        chat_id: C,
        from_chat_id: F,
        message_id: i32,
        params: Params,
    ) -> Result<Value>
    where
        C: Into<Value> + Send,
        F: Into<Value> + Send,
    {
        let params = params
            .with("chat_id", chat_id)
            .with("from_chat_id", from_chat_id)
            .with("message_id", message_id);
        invoke(self, "copyMessage", params).await
    }

    async fn send_photo<C>(&self, chat_id: C, photo: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendPhoto", "photo", chat_id.into(), photo, params).await
    }

    async fn send_audio<C>(&self, chat_id: C, audio: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendAudio", "audio", chat_id.into(), audio, params).await
    }

    async fn send_document<C>(&self, chat_id: C, doc: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendDocument", "document", chat_id.into(), doc, params).await
    }

    async fn send_video<C>(&self, chat_id: C, video: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendVideo", "video", chat_id.into(), video, params).await
    }

    async fn send_voice<C>(&self, chat_id: C, voice: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendVoice", "voice", chat_id.into(), voice, params).await
    }

    async fn send_sticker<C>(&self, chat_id: C, sticker: InputFile, params: Params) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        send_file(self, "sendSticker", "sticker", chat_id.into(), sticker, params).await
    }

    async fn send_location<C>(
        &self,
        chat_id: C,
        latitude: f64,
        longitude: f64,
        params: Params,
    ) -> Result<Message>
    where
        C: Into<Value> + Send,
    {
        let params = params
            .with("chat_id", chat_id)
            .with("latitude", latitude)
            .with("longitude", longitude);
        invoke(self, "sendLocation", params).await
    }

    /// `action` is the wire name: `typing`, `upload_photo`, ...
    async fn send_chat_action<C>(&self, chat_id: C, action: &str) -> Result<bool>
    where
        C: Into<Value> + Send,
    {
        let params = Params::new().with("chat_id", chat_id).with("action", action);
        invoke(self, "sendChatAction", params).await
    }

    /// Returns the edited message, or `true` for inline messages.
    async fn edit_message_text(&self, text: &str, params: Params) -> Result<Value> {
        invoke(self, "editMessageText", params.with("text", text)).await
    }

    async fn edit_message_reply_markup(&self, params: Params) -> Result<Value> {
        invoke(self, "editMessageReplyMarkup", params).await
    }

    async fn delete_message<C>(&self, chat_id: C, message_id: i32) -> Result<bool>
    where
        C: Into<Value> + Send,
    {
        let params = Params::new()
            .with("chat_id", chat_id)
            .with("message_id", message_id);
        invoke(self, "deleteMessage", params).await
    }

    async fn answer_callback_query(&self, callback_query_id: &str, params: Params) -> Result<bool> {
        let params = params.with("callback_query_id", callback_query_id);
        invoke(self, "answerCallbackQuery", params).await
    }

    async fn answer_inline_query(
        &self,
        inline_query_id: &str,
        results: Value,
        params: Params,
    ) -> Result<bool> {
        let params = params
            .with("inline_query_id", inline_query_id)
            .with("results", results);
        invoke(self, "answerInlineQuery", params).await
    }

    async fn get_chat<C>(&self, chat_id: C) -> Result<Value>
    where
        C: Into<Value> + Send,
    {
        invoke(self, "getChat", Params::new().with("chat_id", chat_id)).await
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        invoke(self, "getFile", Params::new().with("file_id", file_id)).await
    }
}

impl<T: BotApi + ?Sized> Endpoints for T {}

async fn send_file<A>(
    api: &A,
    method: &str,
    field: &str,
    chat_id: Value,
    file: InputFile,
    params: Params,
) -> Result<Message>
where
    A: BotApi + ?Sized,
{
    let params = params.with("chat_id", chat_id).with_file(field, file);
    invoke(api, method, params).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::domain::ChatId;
    use crate::ports::ParamValue;

    /// Records the last request and answers with a canned result.
    struct Recording {
        last: Mutex<Option<(String, Vec<(String, String)>)>>,
        result: Value,
    }

    #[async_trait]
    impl BotApi for Recording {
        async fn call(&self, request: ApiRequest) -> Result<Value> {
            let params = request
                .params
                .into_inner()
                .into_iter()
                .map(|(k, v)| match v {
                    ParamValue::Value(v) => (k, crate::ports::encode_param(&v).unwrap_or_default()),
                    ParamValue::File(f) => (k, format!("{f:?}")),
                })
                .collect();
            *self.last.lock().unwrap() = Some((request.method, params));
            Ok(self.result.clone())
        }
    }

    #[tokio::test]
    async fn send_message_marshals_and_decodes() {
        let api = Recording {
            last: Mutex::new(None),
            result: json!({"message_id": 5, "chat": {"id": 9, "type": "private"}, "text": "hi"}),
        };
        let markup = json!({"inline_keyboard": [[{"text": "ok", "callback_data": "ok"}]]});
        let msg = api
            .send_message(ChatId(9), "hi", Params::new().with("reply_markup", markup))
            .await
            .unwrap();
        assert_eq!(msg.text.as_deref(), Some("hi"));

        let (method, params) = api.last.lock().unwrap().take().unwrap();
        assert_eq!(method, "sendMessage");
        assert!(params.contains(&("chat_id".to_string(), "9".to_string())));
        assert!(params.contains(&("text".to_string(), "hi".to_string())));
        assert!(params
            .iter()
            .any(|(k, v)| k == "reply_markup" && v.starts_with("{\"inline_keyboard\"")));
    }

    #[tokio::test]
    async fn unexpected_result_shape_is_a_parse_error() {
        let api = Recording {
            last: Mutex::new(None),
            result: json!("not a user"),
        };
        let err = api.get_me().await.unwrap_err();
        assert!(matches!(err, Error::Parse { ref body, .. } if body == "\"not a user\""));
    }

    #[tokio::test]
    async fn send_photo_attaches_file_param() {
        let api = Recording {
            last: Mutex::new(None),
            result: json!({"message_id": 1, "chat": {"id": 1}}),
        };
        api.send_photo(1, InputFile::id("AgAD"), Params::new().with("caption", "c"))
            .await
            .unwrap();
        let (method, params) = api.last.lock().unwrap().take().unwrap();
        assert_eq!(method, "sendPhoto");
        assert!(params.iter().any(|(k, v)| k == "photo" && v.contains("AgAD")));
    }

    #[test]
    fn decode_reads_result_in_place() {
        let v = json!({"file_id": "f1", "file_path": "a/b.jpg", "extra": true});
        let file: RemoteFile = decode("getFile", v).unwrap();
        assert_eq!(file.file_path.as_deref(), Some("a/b.jpg"));
        assert_eq!(file.file_unique_id, "");

        let err = decode::<RemoteFile>("getFile", json!({"file_id": 7})).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse { ref message, ref body } if message.contains("getFile") && body == r#"{"file_id":7}"#
        ));
    }
}
