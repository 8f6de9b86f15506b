//! Service-worker registrations and the container that owns them.
//!
//! Registering a script produces one of two lifecycle signals: a first
//! install activates immediately and reports [`LifecycleSignal::OfflineReady`];
//! a new script registered over an active worker waits and reports
//! [`LifecycleSignal::NeedRefresh`].

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spoilme_core::config::WorkerConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::bridge::{Bridge, NotificationId, WorkerEvent};
use crate::clients::{Client, Clients};
use crate::messages::WorkerMessage;
use crate::push::NotificationOptions;
use crate::runtime::{
    DisplayedNotification, LocalHost, WorkerHandle, WorkerHost, WorkerRuntime,
};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or unregistered).
    Redundant,
}

/// Lifecycle signal reported to the page after a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleSignal {
    /// Fresh install; the app now works offline.
    OfflineReady,
    /// A newer worker is installed and waiting.
    NeedRefresh,
}

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,

    /// Event queue of the running context, once activated.
    handle: Option<WorkerHandle>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            handle: None,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
        if state == ServiceWorkerState::Redundant {
            self.handle = None;
        }
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// Queue to the worker's context.
    pub fn handle(&self) -> Result<&WorkerHandle, ServiceWorkerError> {
        if self.is_redundant() {
            return Err(ServiceWorkerError::StateError(
                "Cannot reach a redundant worker".to_string(),
            ));
        }
        self.handle.as_ref().ok_or_else(|| {
            ServiceWorkerError::StateError("Worker context is not running".to_string())
        })
    }

    /// Post message to worker.
    pub fn post_message(&self, message: Value) -> Result<(), ServiceWorkerError> {
        self.handle()?.post(WorkerEvent::Message(message))
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last update check time.
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Start installing a new worker for `script_url`.
    pub fn update(&mut self, script_url: Url) {
        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(ServiceWorkerState::Installing);
        if let Some(mut superseded) = self.installing.replace(worker) {
            superseded.set_state(ServiceWorkerState::Redundant);
        }
        self.last_update_check = Some(Instant::now());
    }

    /// Transition installing to waiting. A previously waiting worker is
    /// superseded.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut superseded) = self.waiting.replace(worker) {
                superseded.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Activate the waiting worker, retiring the old active one.
    ///
    /// Returns the newly active worker, or `None` if nothing was waiting.
    pub fn activate(&mut self) -> Option<&mut ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }

        worker.set_state(ServiceWorkerState::Activated);
        self.active = Some(worker);
        self.active.as_mut()
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }
}

// ==================== Service Worker Container ====================

/// Events emitted by the container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    /// Result of a registration.
    Lifecycle {
        scope: String,
        signal: LifecycleSignal,
    },
    /// A waiting worker took over; the page should reload.
    ControllerChange { scope: String },
}

/// Per-scope bookkeeping.
struct ScopeEntry {
    registration: ServiceWorkerRegistration,
    clients: Arc<RwLock<Clients>>,
    host: LocalHost,
}

/// Service worker container (navigator.serviceWorker).
#[derive(Clone)]
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    scopes: Arc<RwLock<HashMap<String, ScopeEntry>>>,

    config: WorkerConfig,

    /// Event sender for lifecycle changes.
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(config: WorkerConfig) -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scopes: Arc::new(RwLock::new(HashMap::new())),
                config,
                event_tx,
            },
            event_rx,
        )
    }

    fn bridge(&self) -> Bridge {
        Bridge::new(
            self.config.default_display_name.clone(),
            self.config.fallback_icon.clone(),
        )
    }

    fn emit(&self, event: ContainerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    /// Register a service worker script. Returns the registration scope.
    ///
    /// Must be called from within a tokio runtime; activation starts the
    /// worker's context.
    pub async fn register(
        &self,
        script_url: &str,
        scope: Option<&str>,
    ) -> Result<String, ServiceWorkerError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let scope = match scope {
            Some(s) => script_url
                .join(s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
            None => script_url
                .join("./")
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        };
        if scope.origin() != script_url.origin() {
            return Err(ServiceWorkerError::RegistrationFailed(format!(
                "scope {scope} is not same-origin with {script_url}"
            )));
        }

        let scope_str = scope.to_string();
        let mut scopes = self.scopes.write().await;
        let entry = scopes.entry(scope_str.clone()).or_insert_with(|| {
            let clients = Arc::new(RwLock::new(Clients::new(scope.clone())));
            ScopeEntry {
                registration: ServiceWorkerRegistration::new(scope.clone()),
                host: LocalHost::new(Arc::clone(&clients), scope.clone()),
                clients,
            }
        });

        let registration = &mut entry.registration;
        let had_active = registration.active.is_some();
        registration.update(script_url);
        registration.install_complete();

        let signal = if had_active {
            info!(scope = %scope_str, "New worker installed and waiting");
            LifecycleSignal::NeedRefresh
        } else {
            let bridge = self.bridge();
            let host = entry.host.clone();
            if let Some(worker) = entry.registration.activate() {
                worker.handle = Some(WorkerRuntime::spawn(bridge, host).handle());
            }
            info!(scope = %scope_str, "Worker installed and active");
            LifecycleSignal::OfflineReady
        };

        self.emit(ContainerEvent::Lifecycle {
            scope: scope_str.clone(),
            signal,
        });
        Ok(scope_str)
    }

    /// Activate the waiting worker when `force_activate` is set.
    ///
    /// Without the flag, or with nothing waiting, this does nothing.
    pub async fn update_service_worker(
        &self,
        scope: &str,
        force_activate: bool,
    ) -> Result<(), ServiceWorkerError> {
        let mut scopes = self.scopes.write().await;
        let entry = scopes
            .get_mut(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;

        if !force_activate {
            debug!(scope, "Update requested without skip-waiting; nothing to do");
            return Ok(());
        }
        if entry.registration.waiting.is_none() {
            debug!(scope, "No waiting worker to activate");
            return Ok(());
        }

        let bridge = self.bridge();
        let host = entry.host.clone();
        if let Some(worker) = entry.registration.activate() {
            worker.handle = Some(WorkerRuntime::spawn(bridge, host).handle());
            info!(scope, worker = worker.id.0, "Waiting worker activated");
        }

        self.emit(ContainerEvent::ControllerChange {
            scope: scope.to_string(),
        });
        Ok(())
    }

    /// Send the personalization message to the active worker.
    ///
    /// `None` sends the default display name.
    pub async fn post_user_data(
        &self,
        scope: &str,
        name: Option<&str>,
    ) -> Result<(), ServiceWorkerError> {
        let name = name.unwrap_or(&self.config.default_display_name);
        let handle = self.active_handle(scope).await?;
        handle.post(WorkerEvent::Message(WorkerMessage::user_data(name).to_value()))
    }

    /// Deliver a raw background push to the active worker and wait for it.
    pub async fn deliver_push(&self, scope: &str, payload: Value) -> Result<(), ServiceWorkerError> {
        let handle = self.active_handle(scope).await?;
        handle.dispatch(WorkerEvent::Push(payload)).await
    }

    /// Simulate the user clicking a shown notification.
    pub async fn click_notification(
        &self,
        scope: &str,
        id: NotificationId,
    ) -> Result<(), ServiceWorkerError> {
        let host = self.host(scope).await?;
        let shown = host
            .notification(id)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {}", id.0)))?;

        let handle = self.active_handle(scope).await?;
        handle
            .dispatch(WorkerEvent::NotificationClick {
                notification: id,
                data: shown.options.data,
            })
            .await
    }

    /// Show a notification from the page itself, bypassing the worker.
    pub async fn show_page_notification(
        &self,
        scope: &str,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<NotificationId, ServiceWorkerError> {
        self.host(scope).await?.show_notification(title, options).await
    }

    /// Notifications shown under `scope`.
    pub async fn notifications(
        &self,
        scope: &str,
    ) -> Result<Vec<DisplayedNotification>, ServiceWorkerError> {
        Ok(self.host(scope).await?.notifications().await)
    }

    /// Add an open page (window client) at `url` under `scope`.
    pub async fn open_page(&self, scope: &str, url: &str) -> Result<Client, ServiceWorkerError> {
        let clients = self.clients(scope).await?;
        let mut clients = clients.write().await;
        let client = Client::window(clients.resolve(url)?);
        clients.add(client.clone());
        Ok(client)
    }

    /// Client list for `scope`.
    pub async fn clients(&self, scope: &str) -> Result<Arc<RwLock<Clients>>, ServiceWorkerError> {
        let scopes = self.scopes.read().await;
        let entry = scopes
            .get(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
        Ok(Arc::clone(&entry.clients))
    }

    /// Find the registration scope controlling `url` (longest match).
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let scopes = self.scopes.read().await;

        scopes
            .keys()
            .filter(|scope| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    /// Get all registration scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        self.scopes.read().await.keys().cloned().collect()
    }

    /// State of the worker in each slot: (installing, waiting, active).
    pub async fn worker_states(
        &self,
        scope: &str,
    ) -> Result<[Option<ServiceWorkerState>; 3], ServiceWorkerError> {
        let scopes = self.scopes.read().await;
        let registration = &scopes
            .get(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?
            .registration;
        Ok([
            registration.installing.as_ref().map(|w| w.state),
            registration.waiting.as_ref().map(|w| w.state),
            registration.active.as_ref().map(|w| w.state),
        ])
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &str) -> bool {
        let mut scopes = self.scopes.write().await;
        match scopes.remove(scope) {
            Some(mut entry) => {
                entry.registration.unregister();
                info!(scope, "Registration removed");
                true
            }
            None => false,
        }
    }

    async fn active_handle(&self, scope: &str) -> Result<WorkerHandle, ServiceWorkerError> {
        let scopes = self.scopes.read().await;
        let entry = scopes
            .get(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
        let worker = entry
            .registration
            .active
            .as_ref()
            .ok_or_else(|| ServiceWorkerError::StateError("No active worker".to_string()))?;
        worker.handle().cloned()
    }

    async fn host(&self, scope: &str) -> Result<LocalHost, ServiceWorkerError> {
        let scopes = self.scopes.read().await;
        scopes
            .get(scope)
            .map(|entry| entry.host.clone())
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "https://spoilme.example/firebase-messaging-sw.js";

    fn container() -> (ServiceWorkerContainer, mpsc::UnboundedReceiver<ContainerEvent>) {
        ServiceWorkerContainer::new(WorkerConfig::default())
    }

    #[test]
    fn test_registration_lifecycle() {
        let scope = Url::parse("https://spoilme.example/").unwrap();
        let mut registration = ServiceWorkerRegistration::new(scope);

        registration.update(Url::parse(SCRIPT).unwrap());
        assert_eq!(
            registration.installing.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Installing)
        );

        registration.install_complete();
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Installed)
        );

        assert!(registration.activate().is_some());
        assert!(registration.waiting.is_none());
        assert!(registration.active.as_ref().unwrap().is_active());

        assert!(registration.activate().is_none());
    }

    #[test]
    fn test_redundant_worker_rejects_messages() {
        let mut worker = ServiceWorker::new(Url::parse(SCRIPT).unwrap());
        assert!(worker.post_message(Value::Null).is_err());

        worker.set_state(ServiceWorkerState::Redundant);
        assert!(worker.is_redundant());
        assert!(matches!(
            worker.post_message(Value::Null),
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_first_register_is_offline_ready() {
        let (container, mut events) = container();

        let scope = container.register(SCRIPT, None).await.unwrap();
        assert_eq!(scope, "https://spoilme.example/");
        assert_eq!(
            events.recv().await,
            Some(ContainerEvent::Lifecycle {
                scope: scope.clone(),
                signal: LifecycleSignal::OfflineReady
            })
        );
        assert_eq!(
            container.worker_states(&scope).await.unwrap(),
            [None, None, Some(ServiceWorkerState::Activated)]
        );
    }

    #[tokio::test]
    async fn test_second_register_needs_refresh() {
        let (container, mut events) = container();
        let scope = container.register(SCRIPT, None).await.unwrap();
        events.recv().await;

        container.register(SCRIPT, None).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ContainerEvent::Lifecycle {
                scope: scope.clone(),
                signal: LifecycleSignal::NeedRefresh
            })
        );
        assert_eq!(
            container.worker_states(&scope).await.unwrap(),
            [
                None,
                Some(ServiceWorkerState::Installed),
                Some(ServiceWorkerState::Activated)
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_and_changes_controller() {
        let (container, mut events) = container();
        let scope = container.register(SCRIPT, None).await.unwrap();
        container.register(SCRIPT, None).await.unwrap();
        events.recv().await;
        events.recv().await;

        container.update_service_worker(&scope, false).await.unwrap();
        assert!(events.try_recv().is_err());

        container.update_service_worker(&scope, true).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ContainerEvent::ControllerChange {
                scope: scope.clone()
            })
        );
        assert_eq!(
            container.worker_states(&scope).await.unwrap(),
            [None, None, Some(ServiceWorkerState::Activated)]
        );
    }

    #[tokio::test]
    async fn test_update_unknown_scope() {
        let (container, _events) = container();
        assert!(matches!(
            container
                .update_service_worker("https://nowhere.example/", true)
                .await,
            Err(ServiceWorkerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_scope_and_lookup() {
        let (container, _events) = container();
        container.register(SCRIPT, None).await.unwrap();
        let admin = container
            .register("https://spoilme.example/admin/sw.js", Some("/admin/"))
            .await
            .unwrap();
        assert_eq!(admin, "https://spoilme.example/admin/");

        assert_eq!(
            container
                .get_registration("https://spoilme.example/admin/artists")
                .await,
            Some(admin)
        );
        assert_eq!(
            container
                .get_registration("https://spoilme.example/shop")
                .await
                .as_deref(),
            Some("https://spoilme.example/")
        );
        assert_eq!(container.get_registrations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cross_origin_scope_rejected() {
        let (container, _events) = container();
        let result = container
            .register(SCRIPT, Some("https://evil.example/"))
            .await;
        assert!(matches!(
            result,
            Err(ServiceWorkerError::RegistrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister() {
        let (container, _events) = container();
        let scope = container.register(SCRIPT, None).await.unwrap();

        assert!(container.unregister(&scope).await);
        assert!(!container.unregister(&scope).await);
        assert!(container.get_registrations().await.is_empty());
        assert!(container.post_user_data(&scope, None).await.is_err());
    }
}
