use anyhow::Context;
use tgb_bot::Bot;
use tgb_core::{
    api::Endpoints,
    config::{Config, Mode},
    events::EventKind,
    ports::Params,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgb_core::logging::init("tgb")?;

    let cfg = Config::load()?;
    let bot = Bot::new(cfg.token.clone(), cfg.options.clone())?;

    let me = bot.api().get_me().await.context("getMe failed; check TGB_TOKEN")?;
    info!(
        username = me.username.as_deref().unwrap_or("?"),
        mode = ?cfg.mode,
        "bot authorized"
    );

    register_handlers(&bot)?;

    if cfg.mode == Mode::WebHook {
        match &cfg.web_hook_url {
            Some(url) => {
                let url = format!("{}/bot{}", url.trim_end_matches('/'), cfg.token);
                let secret = cfg
                    .options
                    .web_hook
                    .as_ref()
                    .and_then(|w| w.secret_token.clone());
                bot.api()
                    .set_web_hook(&url, Params::new().with_opt("secret_token", secret))
                    .await
                    .context("setWebhook failed")?;
            }
            None => warn!("TGB_WEBHOOK_URL not set; assuming the webhook is registered already"),
        }
    }

    bot.auto_start().await?;
    if let Some(addr) = bot.web_hook_addr().await {
        info!(%addr, "receiving updates by webhook");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    bot.stop_polling(false).await?;
    bot.close_web_hook().await?;
    Ok(())
}

fn register_handlers(bot: &Bot) -> anyhow::Result<()> {
    let echo = bot.api().clone();
    bot.on_text(r"^/echo(?:@\w+)?\s+(.+)$", move |msg, caps| {
        let api = echo.clone();
        let chat_id = msg.chat.id;
        let text = caps[1].to_string();
        tokio::spawn(async move {
            if let Err(e) = api.send_message(chat_id, &text, Params::new()).await {
                error!("echo reply failed: {e}");
            }
        });
    })?;

    let greeter = bot.api().clone();
    bot.on_text(r"^/start\b", move |msg, _| {
        let api = greeter.clone();
        let chat_id = msg.chat.id;
        tokio::spawn(async move {
            let text = "Send /echo <text> and I will repeat it.";
            if let Err(e) = api.send_message(chat_id, text, Params::new()).await {
                error!("start reply failed: {e}");
            }
        });
    })?;

    bot.on(EventKind::PollingError, |ev| {
        if let Some(err) = ev.error() {
            warn!("polling: {err}");
        }
    });
    bot.on(EventKind::WebhookError, |ev| {
        if let Some(err) = ev.error() {
            warn!("webhook: {err}");
        }
    });
    Ok(())
}
