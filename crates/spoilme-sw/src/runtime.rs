//! Worker runtime: one task per worker context.
//!
//! Events are queued and handled strictly one at a time. An event is done
//! when its handler has returned and every effect it produced has been
//! applied to the host, including lifetime-extending ones, so the next
//! event (or shutdown) never overtakes a pending focus/open.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bridge::{Bridge, Effect, NotificationId, WorkerEvent, WorkerState};
use crate::clients::{Client, ClientMatchOptions, Clients};
use crate::push::NotificationOptions;
use crate::ServiceWorkerError;

/// Operations the hosting environment provides to a worker.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Base URL relative click targets resolve against.
    fn scope(&self) -> &Url;

    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<NotificationId, ServiceWorkerError>;

    async fn close_notification(&self, id: NotificationId) -> Result<(), ServiceWorkerError>;

    /// Currently open window clients.
    async fn window_clients(&self) -> Result<Vec<Client>, ServiceWorkerError>;

    async fn focus(&self, client_id: &str) -> Result<Client, ServiceWorkerError>;

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;
}

// ==================== Local Host ====================

/// A notification shown through [`LocalHost`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedNotification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

/// In-process host backed by a shared client list.
#[derive(Debug, Clone)]
pub struct LocalHost {
    scope: Url,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<Vec<DisplayedNotification>>>,
}

impl LocalHost {
    pub fn new(clients: Arc<RwLock<Clients>>, scope: Url) -> Self {
        Self {
            scope,
            clients,
            notifications: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Notifications currently on screen, oldest first.
    pub async fn notifications(&self) -> Vec<DisplayedNotification> {
        self.notifications.read().await.clone()
    }

    /// Look up one notification.
    pub async fn notification(&self, id: NotificationId) -> Option<DisplayedNotification> {
        self.notifications
            .read()
            .await
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }
}

#[async_trait]
impl WorkerHost for LocalHost {
    fn scope(&self) -> &Url {
        &self.scope
    }

    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<NotificationId, ServiceWorkerError> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = NotificationId(COUNTER.fetch_add(1, Ordering::Relaxed));

        self.notifications.write().await.push(DisplayedNotification {
            id,
            title: title.to_string(),
            options: options.clone(),
        });
        Ok(id)
    }

    async fn close_notification(&self, id: NotificationId) -> Result<(), ServiceWorkerError> {
        let mut notifications = self.notifications.write().await;
        let index = notifications
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {}", id.0)))?;
        notifications.remove(index);
        Ok(())
    }

    async fn window_clients(&self) -> Result<Vec<Client>, ServiceWorkerError> {
        Ok(self
            .clients
            .read()
            .await
            .match_all(&ClientMatchOptions::windows()))
    }

    async fn focus(&self, client_id: &str) -> Result<Client, ServiceWorkerError> {
        self.clients.write().await.focus(client_id)
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        self.clients.write().await.open_window(url.as_str())
    }
}

// ==================== Runtime ====================

/// Outcome of a processed event, as seen by a waiting sender.
pub type EventResult = Result<(), ServiceWorkerError>;

struct Envelope {
    event: WorkerEvent,
    done: Option<oneshot::Sender<EventResult>>,
}

/// Sending side of a worker context.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("event", &self.event.kind())
            .finish()
    }
}

impl WorkerHandle {
    /// Queue an event without waiting for it.
    pub fn post(&self, event: WorkerEvent) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(Envelope { event, done: None })
            .map_err(|_| ServiceWorkerError::Terminated)
    }

    /// Queue an event and wait until it and its effects are complete.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventResult {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                event,
                done: Some(done_tx),
            })
            .map_err(|_| ServiceWorkerError::Terminated)?;
        done_rx.await.map_err(|_| ServiceWorkerError::Terminated)?
    }

    /// Whether the worker task is still accepting events.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A running worker context.
pub struct WorkerRuntime {
    handle: WorkerHandle,
    task: JoinHandle<WorkerState>,
}

impl WorkerRuntime {
    /// Spawn a worker context on the current tokio runtime.
    pub fn spawn<H>(bridge: Bridge, host: H) -> Self
    where
        H: WorkerHost + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(bridge, host, rx));
        info!("Worker context started");

        Self {
            handle: WorkerHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop accepting events, finish everything queued, and return the
    /// final worker state.
    ///
    /// Clones of the handle keep the context alive; shutdown completes once
    /// all of them are dropped.
    pub async fn shutdown(self) -> Result<WorkerState, ServiceWorkerError> {
        drop(self.handle);
        self.task
            .await
            .map_err(|e| ServiceWorkerError::StateError(format!("worker task failed: {e}")))
    }
}

async fn run<H: WorkerHost>(
    bridge: Bridge,
    host: H,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) -> WorkerState {
    let mut state = WorkerState::default();

    while let Some(Envelope { event, done }) = rx.recv().await {
        let kind = event.kind();
        let result = match bridge.dispatch(&state, &event) {
            Ok(transition) => {
                state = transition.state;
                apply_effects(&host, transition.effects).await
            }
            Err(e) => {
                error!(event = kind, error = %e, "Worker handler failed");
                Err(ServiceWorkerError::ScriptError(e.to_string()))
            }
        };

        if let Some(done) = done {
            let _ = done.send(result);
        }
    }

    debug!("Worker context stopped");
    state
}

/// Apply effects in order. A failed effect does not cancel the ones after
/// it; the first failure is reported.
async fn apply_effects<H: WorkerHost>(host: &H, effects: Vec<Effect>) -> EventResult {
    let mut first_error = None;
    for effect in effects {
        let extended = effect.extends_lifetime();
        if let Err(e) = apply_effect(host, effect).await {
            warn!(extended, error = %e, "Worker effect failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn apply_effect<H: WorkerHost>(host: &H, effect: Effect) -> EventResult {
    match effect {
        Effect::ShowNotification { title, options } => {
            let id = host.show_notification(&title, &options).await?;
            debug!(id = id.0, %title, "Notification shown");
            Ok(())
        }
        Effect::CloseNotification(id) => host.close_notification(id).await,
        Effect::FocusOrOpen { url } => {
            let target = host
                .scope()
                .join(&url)
                .map_err(|e| ServiceWorkerError::NetworkError(format!("{url}: {e}")))?;
            focus_or_open(host, &target).await
        }
    }
}

async fn focus_or_open<H: WorkerHost>(host: &H, target: &Url) -> EventResult {
    let windows = host.window_clients().await?;
    match windows.iter().find(|c| c.url == *target) {
        Some(client) => {
            host.focus(&client.id).await?;
            debug!(client = %client.id, url = %target, "Focused existing window");
        }
        None => {
            let client = host.open_window(target).await?;
            debug!(client = %client.id, url = %target, "Opened new window");
        }
    }
    Ok(())
}
