//! Webhook Server: inbound push delivery over HTTP or HTTPS.

use std::{
    net::{SocketAddr, TcpListener},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use p12_keystore::KeyStore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tgb_core::{
    config::WebHookOptions, dispatcher::Dispatcher, events::EventKind, types::Update, Error,
    Result,
};

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct WebhookServer {
    token: String,
    dispatcher: Arc<Dispatcher>,
    options: WebHookOptions,
    running: Mutex<Option<Running>>,
}

struct Running {
    addr: SocketAddr,
    handle: Handle,
    task: JoinHandle<()>,
}

struct HookState {
    token: String,
    health_endpoint: String,
    secret_token: Option<String>,
    dispatcher: Arc<Dispatcher>,
}

impl WebhookServer {
    pub fn new(token: impl Into<String>, dispatcher: Arc<Dispatcher>, options: WebHookOptions) -> Self {
        Self {
            token: token.into(),
            dispatcher,
            options,
            running: Mutex::new(None),
        }
    }

    /// Bind and start serving. Returns the bound address; opening an
    /// already open server returns the existing address.
    pub async fn open(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let tls = self.tls_config().await?;
        let listener = TcpListener::bind((self.options.host.as_str(), self.options.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(HookState {
            token: self.token.clone(),
            health_endpoint: self.options.health_endpoint.clone(),
            secret_token: self.options.secret_token.clone(),
            dispatcher: self.dispatcher.clone(),
        });
        let app = Router::new().fallback(handle_request).with_state(state);

        let handle = Handle::new();
        let task = match tls {
            Some(config) => {
                let server = axum_server::from_tcp_rustls(listener, config).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app.into_make_service()).await {
                        error!("webhook server failed: {e}");
                    }
                })
            }
            None => {
                let server = axum_server::from_tcp(listener).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app.into_make_service()).await {
                        error!("webhook server failed: {e}");
                    }
                })
            }
        };

        info!(%addr, https = self.has_tls(), "webhook server listening");
        let mut running = lock(&self.running);
        *running = Some(Running { addr, handle, task });
        Ok(addr)
    }

    /// Graceful shutdown; a no-op when closed.
    pub async fn close(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };

        running.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        if let Err(e) = running.task.await {
            warn!("webhook server task ended abnormally: {e}");
        }
        info!(addr = %running.addr, "webhook server closed");
    }

    pub fn is_open(&self) -> bool {
        lock(&self.running).is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|r| r.addr)
    }

    fn has_tls(&self) -> bool {
        let o = &self.options;
        o.pfx.is_some() || (o.key.is_some() && o.cert.is_some()) || o.https.is_some()
    }

    /// HTTPS material, in order of preference: PKCS#12 bundle, PEM files,
    /// in-memory PEM.
    async fn tls_config(&self) -> Result<Option<RustlsConfig>> {
        let o = &self.options;
        if let Some(pfx) = &o.pfx {
            let bundle = tokio::fs::read(pfx).await?;
            let (chain, key) = decode_pkcs12(&bundle, o.passphrase.as_deref().unwrap_or(""))?;
            let config = RustlsConfig::from_der(chain, key).await?;
            return Ok(Some(config));
        }
        if let (Some(cert), Some(key)) = (&o.cert, &o.key) {
            let config = RustlsConfig::from_pem_file(cert, key).await?;
            return Ok(Some(config));
        }
        if let Some(pem) = &o.https {
            let config = RustlsConfig::from_pem(
                pem.cert_pem.clone().into_bytes(),
                pem.key_pem.clone().into_bytes(),
            )
            .await?;
            return Ok(Some(config));
        }
        Ok(None)
    }
}

/// Split a PKCS#12 bundle into its DER certificate chain and PKCS#8 key.
fn decode_pkcs12(bundle: &[u8], passphrase: &str) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
    let store = KeyStore::from_pkcs12(bundle, passphrase)
        .map_err(|e| Error::Config(format!("invalid pfx bundle: {e}")))?;
    let Some((alias, entry)) = store.private_key_chain() else {
        return Err(Error::Config("pfx bundle holds no private key".to_string()));
    };
    let chain: Vec<Vec<u8>> = entry.chain().iter().map(|c| c.as_der().to_vec()).collect();
    if chain.is_empty() {
        return Err(Error::Config(format!("pfx entry {alias} has no certificate")));
    }
    debug!(alias, certs = chain.len(), "loaded pfx bundle");
    Ok((chain, entry.key().to_vec()))
}

async fn handle_request(
    State(state): State<Arc<HookState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    if !target.contains(&state.token) {
        if uri.path() == state.health_endpoint {
            return (StatusCode::OK, "OK").into_response();
        }
        debug!(path = uri.path(), "unauthorized webhook request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if let Some(expected) = &state.secret_token {
        let given = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            warn!("webhook request with missing or wrong secret token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    if method != Method::POST {
        return StatusCode::IM_A_TEAPOT.into_response();
    }

    let update = serde_json::from_slice::<serde_json::Value>(&body)
        .and_then(serde_json::from_value::<Update>)
        .map_err(|e| Error::Parse {
            message: format!("invalid webhook update: {e}"),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    let result = update.and_then(|u| state.dispatcher.try_process_update(&u));
    if let Err(err) = result {
        state.dispatcher.report_error(EventKind::WebhookError, &err);
    }

    (StatusCode::OK, "OK").into_response()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
