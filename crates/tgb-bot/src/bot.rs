use std::{net::SocketAddr, sync::Arc};

use regex::{Captures, Regex};
use tokio::sync::Mutex;
use tracing::info;

use tgb_core::{
    config::BotOptions,
    dispatcher::Dispatcher,
    domain::{ChatId, ListenerId, MessageId},
    events::{Event, EventKind},
    types::{Message, Update},
    Error, Result,
};
use tgb_http::ApiClient;

use crate::{polling::Poller, webhook::WebhookServer};

/// Entry point: one API client, one dispatcher and at most one active
/// update transport.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

struct BotInner {
    token: String,
    options: BotOptions,
    api: Arc<ApiClient>,
    dispatcher: Arc<Dispatcher>,
    poller: Poller,
    web_hook: WebhookServer,
    transport: Mutex<Transport>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Inactive,
    Polling,
    WebHook,
}

impl Bot {
    /// Build a bot without touching the network. Call [`Bot::auto_start`]
    /// once listeners are registered.
    pub fn new(token: impl Into<String>, options: BotOptions) -> Result<Self> {
        let token = token.into();
        let api = Arc::new(ApiClient::new(token.clone(), &options)?);
        let dispatcher = Arc::new(Dispatcher::new(options.only_first_match));
        let poller = Poller::new(
            api.clone(),
            dispatcher.clone(),
            options.polling.clone().unwrap_or_default(),
            options.bad_rejection,
        );
        let web_hook = WebhookServer::new(
            token.clone(),
            dispatcher.clone(),
            options.web_hook.clone().unwrap_or_default(),
        );

        Ok(Self {
            inner: Arc::new(BotInner {
                token,
                options,
                api,
                dispatcher,
                poller,
                web_hook,
                transport: Mutex::new(Transport::Inactive),
            }),
        })
    }

    /// [`Bot::new`] followed by [`Bot::auto_start`].
    pub async fn launch(token: impl Into<String>, options: BotOptions) -> Result<Self> {
        let bot = Self::new(token, options)?;
        bot.auto_start().await?;
        Ok(bot)
    }

    /// Start whichever transports are configured to start on their own.
    pub async fn auto_start(&self) -> Result<()> {
        let opts = &self.inner.options;
        if opts.polling.as_ref().is_some_and(|p| p.auto_start) {
            self.start_polling().await?;
        }
        if opts.web_hook.as_ref().is_some_and(|w| w.auto_open) {
            self.open_web_hook().await?;
        }
        Ok(())
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn options(&self) -> &BotOptions {
        &self.inner.options
    }

    // ---- polling ----

    /// Start long polling. No-op if already polling; fails while a webhook
    /// is open.
    pub async fn start_polling(&self) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if *transport == Transport::WebHook {
            return Err(Error::MutuallyExclusive(
                "polling and webhook are mutually exclusive; close the webhook first".to_string(),
            ));
        }
        if self.inner.poller.start() {
            info!("polling transport active");
        }
        *transport = Transport::Polling;
        Ok(())
    }

    /// Hard-stop the current loop (if any) and start a fresh one. The offset
    /// carries over.
    pub async fn restart_polling(&self) -> Result<()> {
        {
            let transport = self.inner.transport.lock().await;
            if *transport == Transport::WebHook {
                return Err(Error::MutuallyExclusive(
                    "polling and webhook are mutually exclusive; close the webhook first"
                        .to_string(),
                ));
            }
            self.inner.poller.stop(true).await;
        }
        self.start_polling().await
    }

    /// Stop polling. `cancel` drops the in-flight request instead of waiting
    /// for the current cycle. Safe to call when not polling.
    pub async fn stop_polling(&self, cancel: bool) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if *transport == Transport::Polling {
            self.inner.poller.stop(cancel).await;
            *transport = Transport::Inactive;
        }
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_running()
    }

    /// Next `update_id` the long-poll engine will request.
    pub fn polling_offset(&self) -> i64 {
        self.inner.poller.offset()
    }

    // ---- webhook ----

    /// Open the webhook server and return its bound address. Fails while
    /// polling.
    pub async fn open_web_hook(&self) -> Result<SocketAddr> {
        let mut transport = self.inner.transport.lock().await;
        if *transport == Transport::Polling && self.inner.poller.is_running() {
            return Err(Error::MutuallyExclusive(
                "polling and webhook are mutually exclusive; stop polling first".to_string(),
            ));
        }

        let addr = self.inner.web_hook.open().await?;
        *transport = Transport::WebHook;
        Ok(addr)
    }

    /// Close the webhook server; a no-op when none is open.
    pub async fn close_web_hook(&self) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if *transport == Transport::WebHook {
            self.inner.web_hook.close().await;
            *transport = Transport::Inactive;
        }
        Ok(())
    }

    pub async fn has_open_web_hook(&self) -> bool {
        *self.inner.transport.lock().await == Transport::WebHook && self.inner.web_hook.is_open()
    }

    pub async fn web_hook_addr(&self) -> Option<SocketAddr> {
        self.inner.web_hook.local_addr()
    }

    // ---- listeners ----

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .listeners()
            .add_event(kind, Arc::new(callback))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.listeners().remove_event(id)
    }

    /// Register a callback for incoming message text matching `pattern`.
    pub fn on_text<F>(&self, pattern: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&Message, &Captures<'_>) + Send + Sync + 'static,
    {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid text pattern {pattern:?}: {e}")))?;
        Ok(self
            .inner
            .dispatcher
            .listeners()
            .add_text(regex, Arc::new(callback)))
    }

    pub fn remove_text_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.listeners().remove_text(id)
    }

    /// Remove every text listener registered with exactly this pattern.
    pub fn remove_text_pattern(&self, pattern: &str) -> usize {
        self.inner.dispatcher.listeners().remove_text_pattern(pattern)
    }

    pub fn clear_text_listeners(&self) -> usize {
        self.inner.dispatcher.listeners().clear_text()
    }

    /// Fires for every reply to `(chat_id, message_id)` until removed.
    pub fn on_reply_to_message<F>(&self, chat_id: ChatId, message_id: MessageId, callback: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .listeners()
            .add_reply(chat_id, message_id, Arc::new(callback))
    }

    pub fn remove_reply_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.listeners().remove_reply(id)
    }

    pub fn clear_reply_listeners(&self) -> usize {
        self.inner.dispatcher.listeners().clear_replies()
    }

    /// Dispatch an update obtained out of band.
    pub fn process_update(&self, update: &Update) {
        self.inner.dispatcher.process_update(update);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use serde_json::json;
    use tgb_core::config::{PollingOptions, WebHookOptions};

    use super::*;

    const TOKEN: &str = "123:abc";

    fn offline_options() -> BotOptions {
        BotOptions {
            // Nothing listens here; polling requests fail fast.
            base_api_url: "http://127.0.0.1:9".to_string(),
            web_hook: Some(WebHookOptions {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..WebHookOptions::default()
            }),
            ..BotOptions::default()
        }
    }

    fn reply(id: i64, to: i32) -> Update {
        Update::from_value(json!({
            "update_id": id,
            "message": {
                "message_id": 100 + id,
                "chat": {"id": 5, "type": "private"},
                "date": 0,
                "text": "answer",
                "reply_to_message": {"message_id": to, "chat": {"id": 5, "type": "private"}, "date": 0}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn new_does_not_start_transports() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        assert!(!bot.is_polling());
        assert!(!bot.has_open_web_hook().await);
    }

    #[tokio::test]
    async fn stop_polling_twice_is_fine() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        bot.start_polling().await.unwrap();
        assert!(bot.is_polling());

        bot.stop_polling(true).await.unwrap();
        bot.stop_polling(true).await.unwrap();
        bot.stop_polling(false).await.unwrap();
        assert!(!bot.is_polling());
    }

    #[tokio::test]
    async fn polling_is_rejected_while_webhook_is_open() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        let addr = bot.open_web_hook().await.unwrap();

        let err = bot.start_polling().await.unwrap_err();
        assert!(matches!(err, Error::MutuallyExclusive(_)));
        assert!(bot.has_open_web_hook().await);
        assert_eq!(bot.web_hook_addr().await, Some(addr));
        assert!(!bot.is_polling());

        bot.close_web_hook().await.unwrap();
        assert!(!bot.has_open_web_hook().await);
        bot.close_web_hook().await.unwrap();
    }

    #[tokio::test]
    async fn webhook_is_rejected_while_polling() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        bot.start_polling().await.unwrap();

        let err = bot.open_web_hook().await.unwrap_err();
        assert!(matches!(err, Error::MutuallyExclusive(_)));

        bot.stop_polling(true).await.unwrap();
        bot.open_web_hook().await.unwrap();
        bot.close_web_hook().await.unwrap();
    }

    #[tokio::test]
    async fn auto_start_opens_configured_webhook() {
        let bot = Bot::launch(TOKEN, offline_options()).await.unwrap();
        assert!(bot.has_open_web_hook().await);
        bot.close_web_hook().await.unwrap();
    }

    #[tokio::test]
    async fn auto_start_respects_disabled_polling() {
        let options = BotOptions {
            polling: Some(PollingOptions {
                auto_start: false,
                ..PollingOptions::default()
            }),
            web_hook: None,
            ..offline_options()
        };
        let bot = Bot::launch(TOKEN, options).await.unwrap();
        assert!(!bot.is_polling());
    }

    #[tokio::test]
    async fn reply_listener_fires_on_every_matching_reply() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        let hits = Arc::new(StdMutex::new(0));
        let id = {
            let hits = hits.clone();
            bot.on_reply_to_message(ChatId(5), MessageId(42), move |_| {
                *hits.lock().unwrap() += 1;
            })
        };

        bot.process_update(&reply(1, 42));
        bot.process_update(&reply(2, 42));
        bot.process_update(&reply(3, 7));
        assert_eq!(*hits.lock().unwrap(), 2);

        assert!(bot.remove_reply_listener(id));
        bot.process_update(&reply(4, 42));
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn text_listeners_register_and_remove() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let id = {
            let captured = captured.clone();
            bot.on_text(r"^/echo (.+)$", move |_, caps| {
                captured.lock().unwrap().push(caps[1].to_string());
            })
            .unwrap()
        };
        assert!(matches!(bot.on_text("(", |_, _| {}), Err(Error::Config(_))));

        let update = Update::from_value(json!({
            "update_id": 1,
            "message": {"message_id": 1, "chat": {"id": 5}, "date": 0, "text": "/echo hi there"}
        }))
        .unwrap();
        bot.process_update(&update);
        assert_eq!(*captured.lock().unwrap(), vec!["hi there"]);

        assert!(bot.remove_text_listener(id));
        assert!(!bot.remove_text_listener(id));
        bot.process_update(&update);
        assert_eq!(captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn on_and_off() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        let hits = Arc::new(StdMutex::new(0));
        let id = {
            let hits = hits.clone();
            bot.on(EventKind::Message, move |_| *hits.lock().unwrap() += 1)
        };
        bot.process_update(&reply(1, 1));
        assert!(bot.off(id));
        bot.process_update(&reply(2, 1));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn webhook_server_is_reused_across_open_close_cycles() {
        let bot = Bot::new(TOKEN, offline_options()).unwrap();
        let server: *const WebhookServer = &bot.inner.web_hook;

        bot.open_web_hook().await.unwrap();
        assert!(bot.inner.web_hook.is_open());
        bot.close_web_hook().await.unwrap();
        assert!(!bot.inner.web_hook.is_open());

        let addr = bot.open_web_hook().await.unwrap();
        assert_eq!(bot.inner.web_hook.local_addr(), Some(addr));
        assert!(std::ptr::eq(server, &bot.inner.web_hook));
        bot.close_web_hook().await.unwrap();
    }
}
