//! Long-Poll Engine.
//!
//! One spawned task runs fetch → dispatch → wait cycles. The offset is
//! advanced before each update is dispatched, so a crash mid-dispatch loses
//! that update instead of redelivering it (at-most-once).

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tgb_core::{
    api::Endpoints,
    config::PollingOptions,
    dispatcher::Dispatcher,
    events::EventKind,
    ports::{BotApi, Params},
    types::Update,
    Error,
};

/// Added to the server-side long-poll timeout for the client-side one.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

pub struct Poller {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

struct Shared {
    api: Arc<dyn BotApi>,
    dispatcher: Arc<Dispatcher>,
    options: PollingOptions,
    bad_rejection: bool,
    offset: AtomicI64,
}

struct Running {
    /// Hard stop: interrupts the in-flight request.
    cancel: CancellationToken,
    /// Graceful stop: no new cycle is scheduled.
    abort: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn new(
        api: Arc<dyn BotApi>,
        dispatcher: Arc<Dispatcher>,
        options: PollingOptions,
        bad_rejection: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                dispatcher,
                options,
                bad_rejection,
                offset: AtomicI64::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the poll loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let abort = CancellationToken::new();
        let handle = tokio::spawn(run(self.shared.clone(), cancel.clone(), abort.clone()));
        *running = Some(Running {
            cancel,
            abort,
            handle,
        });
        true
    }

    /// Stop the loop. With `cancel` the in-flight request is dropped and the
    /// undispatched rest of the batch is discarded; otherwise the current
    /// cycle is allowed to finish. Stopping an idle poller is a no-op.
    pub async fn stop(&self, cancel: bool) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };

        if cancel {
            running.cancel.cancel();
            running.handle.abort();
        } else {
            running.abort.cancel();
        }

        // A listener may be running on another worker; wait for it so no
        // callback fires after this returns.
        if let Err(e) = running.handle.await {
            if !e.is_cancelled() {
                warn!("polling task ended abnormally: {e}");
            }
        }
        info!(cancel, "polling stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Next `update_id` the engine will ask for.
    pub fn offset(&self) -> i64 {
        self.shared.offset.load(Ordering::SeqCst)
    }

    /// Run a single fetch-and-dispatch cycle. Returns `false` when the engine
    /// hit an unrecoverable error and must not continue.
    pub async fn poll_once(&self) -> bool {
        self.shared
            .cycle(&CancellationToken::new())
            .await
            .is_continue()
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken, abort: CancellationToken) {
    info!(
        timeout = shared.options.timeout,
        interval_ms = shared.options.interval.as_millis() as u64,
        "polling started"
    );

    loop {
        let flow = tokio::select! {
            _ = cancel.cancelled() => break,
            flow = shared.cycle(&cancel) => flow,
        };
        if flow.is_break() || abort.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = abort.cancelled() => break,
            _ = tokio::time::sleep(shared.options.interval) => {}
        }
    }

    debug!("poll loop exited");
}

impl Shared {
    async fn cycle(&self, cancel: &CancellationToken) -> ControlFlow<()> {
        match self.fetch().await {
            Ok(batch) => self.dispatch_batch(batch, cancel).await,
            Err(err) => self.handle_error(err).await,
        }
    }

    fn params(&self) -> Params {
        let opts = &self.options;
        Params::new()
            .with("offset", self.offset.load(Ordering::SeqCst))
            .with("timeout", opts.timeout)
            .with_opt("limit", opts.limit)
            .with_opt("allowed_updates", opts.allowed_updates.clone())
            .merge_missing(&opts.params)
    }

    async fn fetch(&self) -> tgb_core::Result<Vec<Value>> {
        let timeout = Duration::from_secs(self.options.timeout) + CLIENT_TIMEOUT_MARGIN;
        match self.api.get_updates(self.params(), Some(timeout)).await {
            Err(e) if e.is_conflict() => {
                warn!("getUpdates conflicts with a registered webhook; deleting it");
                self.api.delete_web_hook(Params::new()).await?;
                self.api.get_updates(self.params(), Some(timeout)).await
            }
            other => other,
        }
    }

    async fn dispatch_batch(
        &self,
        mut batch: Vec<Value>,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        if batch.is_empty() {
            return ControlFlow::Continue(());
        }
        debug!(count = batch.len(), "received updates");
        batch.sort_by_key(update_id);

        for raw in batch {
            if cancel.is_cancelled() {
                debug!("polling cancelled; dropping rest of batch");
                return ControlFlow::Break(());
            }
            if let Some(id) = update_id(&raw) {
                self.offset.fetch_max(id + 1, Ordering::SeqCst);
            }
            let result = Update::from_value(raw)
                .and_then(|update| self.dispatcher.try_process_update(&update));
            if let Err(err) = result {
                if self.handle_error(err).await.is_break() {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Surface a fetch or dispatch error. With bad-rejection recovery the
    /// current offset is re-acknowledged first; failing that is fatal.
    async fn handle_error(&self, err: Error) -> ControlFlow<()> {
        if self.bad_rejection {
            let offset = self.offset.load(Ordering::SeqCst);
            let params = Params::new()
                .with("offset", offset - 1)
                .with("limit", 1)
                .with("timeout", 0);
            if let Err(recovery) = self.api.get_updates(params, None).await {
                warn!("re-acknowledging offset {offset} failed: {recovery}");
                let fatal = Error::fatal_with(
                    format!("polling cannot continue after: {err}"),
                    recovery,
                );
                self.dispatcher.report_error(EventKind::PollingError, &fatal);
                return ControlFlow::Break(());
            }
        }

        self.dispatcher.report_error(EventKind::PollingError, &err);
        ControlFlow::Continue(())
    }
}

fn update_id(raw: &Value) -> Option<i64> {
    raw.get("update_id").and_then(Value::as_i64)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
