use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{errors::Error, Result};

pub const DEFAULT_BASE_API_URL: &str = "https://api.telegram.org";

/// Options recognized by the bot facade.
///
/// `polling` and `web_hook` accept either a boolean or an options object when
/// deserialized; `None` means the transport is not configured.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BotOptions {
    #[serde(deserialize_with = "toggle")]
    pub polling: Option<PollingOptions>,
    #[serde(alias = "webHook", deserialize_with = "toggle")]
    pub web_hook: Option<WebHookOptions>,
    #[serde(alias = "baseApiUrl")]
    pub base_api_url: String,
    /// Resolve string file arguments that name an existing local file as uploads.
    pub filepath: bool,
    #[serde(alias = "badRejection")]
    pub bad_rejection: bool,
    #[serde(alias = "testEnvironment")]
    pub test_environment: bool,
    #[serde(alias = "onlyFirstMatch")]
    pub only_first_match: bool,
    pub request: RequestOptions,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            polling: None,
            web_hook: None,
            base_api_url: DEFAULT_BASE_API_URL.to_string(),
            filepath: true,
            bad_rejection: false,
            test_environment: false,
            only_first_match: false,
            request: RequestOptions::default(),
        }
    }
}

impl BotOptions {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PollingOptions {
    /// Server-side long-poll timeout, in seconds.
    pub timeout: u64,
    /// Delay between two poll cycles.
    #[serde(deserialize_with = "millis")]
    pub interval: Duration,
    pub limit: Option<u32>,
    pub allowed_updates: Option<Vec<String>>,
    #[serde(alias = "autoStart")]
    pub auto_start: bool,
    /// Extra `getUpdates` parameters, merged under the ones above.
    pub params: Map<String, Value>,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            timeout: 10,
            interval: Duration::from_millis(300),
            limit: None,
            allowed_updates: None,
            auto_start: true,
            params: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebHookOptions {
    pub host: String,
    pub port: u16,
    /// PEM private key file.
    pub key: Option<PathBuf>,
    /// PEM certificate chain file.
    pub cert: Option<PathBuf>,
    /// PKCS#12 bundle holding the key and certificate chain.
    pub pfx: Option<PathBuf>,
    /// Password of the `pfx` bundle.
    pub passphrase: Option<String>,
    /// In-memory PEM material, used when `key`/`cert` are not set.
    pub https: Option<TlsPem>,
    #[serde(alias = "healthEndpoint")]
    pub health_endpoint: String,
    #[serde(alias = "autoOpen")]
    pub auto_open: bool,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value.
    #[serde(alias = "secretToken")]
    pub secret_token: Option<String>,
}

impl Default for WebHookOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            key: None,
            cert: None,
            pfx: None,
            passphrase: None,
            https: None,
            health_endpoint: "/healthz".to_string(),
            auto_open: true,
            secret_token: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TlsPem {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Pass-through transport options applied to every outbound call.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(deserialize_with = "opt_millis")]
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

fn toggle<'de, D, T>(d: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Toggle<T> {
        Flag(bool),
        Options(T),
    }

    Ok(match Option::<Toggle<T>>::deserialize(d)? {
        None | Some(Toggle::Flag(false)) => None,
        Some(Toggle::Flag(true)) => Some(T::default()),
        Some(Toggle::Options(o)) => Some(o),
    })
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

fn opt_millis<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
}

/// Which transport a process started from the environment should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Polling,
    WebHook,
}

/// Process configuration loaded from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub mode: Mode,
    /// Public URL registered with `setWebhook` in webhook mode.
    pub web_hook_url: Option<String>,
    pub options: BotOptions,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let token = env_str("TGB_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("TGB_TOKEN environment variable is required".to_string())
        })?;

        let mode = match env_str("TGB_MODE")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("polling") => Mode::Polling,
            Some("webhook") => Mode::WebHook,
            Some(other) => {
                return Err(Error::Config(format!(
                    "TGB_MODE must be `polling` or `webhook`, got `{other}`"
                )))
            }
        };

        let mut options = BotOptions::default();
        if let Some(url) = env_str("TGB_BASE_API_URL").and_then(non_empty) {
            options.base_api_url = url;
        }
        options.only_first_match = env_bool("TGB_ONLY_FIRST_MATCH").unwrap_or(false);
        options.bad_rejection = env_bool("TGB_BAD_REJECTION").unwrap_or(false);
        options.test_environment = env_bool("TGB_TEST_ENVIRONMENT").unwrap_or(false);
        options.filepath = env_bool("TGB_FILEPATH").unwrap_or(true);
        options.request.timeout = env_u64("TGB_REQUEST_TIMEOUT_MS").map(Duration::from_millis);
        options.request.proxy = env_str("TGB_PROXY").and_then(non_empty);

        match mode {
            Mode::Polling => {
                let mut polling = PollingOptions::default();
                if let Some(t) = env_u64("TGB_POLL_TIMEOUT") {
                    polling.timeout = t;
                }
                if let Some(ms) = env_u64("TGB_POLL_INTERVAL_MS") {
                    polling.interval = Duration::from_millis(ms);
                }
                polling.limit = env_u64("TGB_POLL_LIMIT").and_then(|v| u32::try_from(v).ok());
                let allowed = parse_csv_lower(env_str("TGB_ALLOWED_UPDATES"));
                if !allowed.is_empty() {
                    polling.allowed_updates = Some(allowed);
                }
                options.polling = Some(polling);
            }
            Mode::WebHook => {
                let mut hook = WebHookOptions::default();
                if let Some(host) = env_str("TGB_WEBHOOK_HOST").and_then(non_empty) {
                    hook.host = host;
                }
                if let Some(port) = env_str("TGB_WEBHOOK_PORT") {
                    hook.port = port.trim().parse().map_err(|_| {
                        Error::Config(format!("TGB_WEBHOOK_PORT is not a port: {port}"))
                    })?;
                }
                hook.cert = env_path("TGB_WEBHOOK_CERT");
                hook.key = env_path("TGB_WEBHOOK_KEY");
                hook.pfx = env_path("TGB_WEBHOOK_PFX");
                hook.passphrase = env_str("TGB_WEBHOOK_PASSPHRASE");
                hook.secret_token = env_str("TGB_WEBHOOK_SECRET").and_then(non_empty);
                options.web_hook = Some(hook);
            }
        }

        Ok(Self {
            token,
            mode,
            web_hook_url: env_str("TGB_WEBHOOK_URL").and_then(non_empty),
            options,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = BotOptions::default();
        assert!(o.polling.is_none());
        assert!(o.web_hook.is_none());
        assert_eq!(o.base_api_url, DEFAULT_BASE_API_URL);
        assert!(o.filepath);
        assert!(!o.only_first_match);

        let p = PollingOptions::default();
        assert_eq!(p.timeout, 10);
        assert_eq!(p.interval, Duration::from_millis(300));
        assert!(p.auto_start);

        let w = WebHookOptions::default();
        assert_eq!(w.port, 8443);
        assert_eq!(w.health_endpoint, "/healthz");
        assert!(w.auto_open);
    }

    #[test]
    fn transports_accept_bool_or_object() {
        let o = BotOptions::from_json(r#"{"polling": true, "webHook": false}"#).unwrap();
        assert_eq!(o.polling.unwrap().timeout, 10);
        assert!(o.web_hook.is_none());

        let o = BotOptions::from_json(
            r#"{
                "polling": {"interval": 50, "autoStart": false, "params": {"limit": 5}},
                "baseApiUrl": "http://localhost:8081",
                "onlyFirstMatch": true,
                "request": {"timeout": 2500}
            }"#,
        )
        .unwrap();
        let p = o.polling.unwrap();
        assert_eq!(p.interval, Duration::from_millis(50));
        assert!(!p.auto_start);
        assert_eq!(p.params["limit"], 5);
        assert_eq!(o.base_api_url, "http://localhost:8081");
        assert!(o.only_first_match);
        assert_eq!(o.request.timeout, Some(Duration::from_millis(2500)));

        let o = BotOptions::from_json(r#"{"web_hook": {"port": 0, "secret_token": "s"}}"#).unwrap();
        let w = o.web_hook.unwrap();
        assert_eq!(w.port, 0);
        assert_eq!(w.host, "0.0.0.0");
        assert_eq!(w.secret_token.as_deref(), Some("s"));
    }

    #[test]
    fn csv_parsing_skips_blanks() {
        assert_eq!(
            parse_csv_lower(Some(" Message, ,callback_query".to_string())),
            vec!["message", "callback_query"]
        );
        assert!(parse_csv_lower(None).is_empty());
    }
}
