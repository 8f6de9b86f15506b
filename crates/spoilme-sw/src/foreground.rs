//! Page-side push setup.
//!
//! [`PushRegistrar`] walks a signed-in page through getting a device token:
//! capability checks, permission, the messaging worker, `USER_DATA`, and
//! saving the token when it changed. Once set up, pushes arriving while the
//! page is in front go through [`PushRegistrar::on_foreground_message`].

use async_trait::async_trait;
use serde_json::Value;
use spoilme_core::config::WorkerConfig;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::NotificationId;
use crate::push::NotificationOptions;
use crate::registration::ServiceWorkerContainer;
use crate::ServiceWorkerError;

/// Why push setup stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushSetupError {
    #[error("not running in a browser")]
    NotInBrowser,

    #[error("no user id")]
    MissingUserId,

    #[error("notifications are not supported")]
    NotificationsUnsupported,

    #[error("service workers are not supported")]
    ServiceWorkerUnsupported,

    #[error("Firebase messaging is not configured")]
    MessagingNotConfigured,

    #[error("no VAPID key configured")]
    MissingVapidKey,

    #[error("notification permission not granted")]
    PermissionNotGranted,

    #[error("messaging returned no token")]
    NoToken,

    #[error("{0}")]
    Failed(String),
}

impl PushSetupError {
    /// Short code reported back to the page.
    pub fn reason(&self) -> &str {
        match self {
            Self::NotInBrowser => "not_in_browser",
            Self::MissingUserId => "missing_userId",
            Self::NotificationsUnsupported => "notifications_unsupported",
            Self::ServiceWorkerUnsupported => "sw_unsupported",
            Self::MessagingNotConfigured => "firebase_messaging_not_configured",
            Self::MissingVapidKey => "missing_vapid_key",
            Self::PermissionNotGranted => "permission_not_granted",
            Self::NoToken => "no_token",
            Self::Failed(message) => message.as_str(),
        }
    }
}

impl From<ServiceWorkerError> for PushSetupError {
    fn from(e: ServiceWorkerError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Notification permission as reported by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionState {
    #[default]
    Default,
    Granted,
    Denied,
}

/// What the page can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEnvironment {
    pub in_browser: bool,
    pub notifications: bool,
    pub service_worker: bool,
}

impl Default for PageEnvironment {
    fn default() -> Self {
        Self {
            in_browser: true,
            notifications: true,
            service_worker: true,
        }
    }
}

/// The messaging SDK as seen from the page.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    async fn request_permission(&self) -> PermissionState;

    /// Device token for the worker at `scope`; `None` when none was issued.
    async fn get_token(
        &self,
        vapid_key: &str,
        scope: &str,
    ) -> Result<Option<String>, PushSetupError>;
}

/// Where device tokens are recorded against users.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_token(&self, user_id: &str, token: &str) -> Result<(), PushSetupError>;
}

/// Token store that keeps every save in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    saved: Mutex<Vec<(String, String)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(user_id, token)` saved so far, in order.
    pub async fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_token(&self, user_id: &str, token: &str) -> Result<(), PushSetupError> {
        self.saved
            .lock()
            .await
            .push((user_id.to_string(), token.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegistrarState {
    permission: PermissionState,
    /// Last token saved, standing in for the page's local cache.
    cached_token: Option<String>,
    /// Set once setup succeeds; foreground messages are ignored before that.
    listening_scope: Option<String>,
}

pub struct PushRegistrar<M, S> {
    container: ServiceWorkerContainer,
    config: WorkerConfig,
    origin: Url,
    environment: PageEnvironment,
    messaging: Option<M>,
    store: S,
    state: Mutex<RegistrarState>,
}

impl<M: MessagingBackend, S: TokenStore> PushRegistrar<M, S> {
    /// `messaging` is `None` when the SDK could not be initialized.
    pub fn new(
        container: ServiceWorkerContainer,
        config: WorkerConfig,
        origin: Url,
        messaging: Option<M>,
        store: S,
    ) -> Self {
        Self {
            container,
            config,
            origin,
            environment: PageEnvironment::default(),
            messaging,
            store,
            state: Mutex::new(RegistrarState::default()),
        }
    }

    pub fn with_environment(mut self, environment: PageEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Make sure this device can receive pushes for `user_id`, returning its
    /// token.
    ///
    /// The messaging worker is registered only if nothing controls its URL
    /// yet. The token is saved only when it differs from the last one saved.
    pub async fn ensure_push_registered(
        &self,
        user_id: &str,
        user_name: Option<&str>,
    ) -> Result<String, PushSetupError> {
        if !self.environment.in_browser {
            return Err(PushSetupError::NotInBrowser);
        }
        if user_id.is_empty() {
            return Err(PushSetupError::MissingUserId);
        }
        if !self.environment.notifications {
            return Err(PushSetupError::NotificationsUnsupported);
        }
        if !self.environment.service_worker {
            return Err(PushSetupError::ServiceWorkerUnsupported);
        }
        let messaging = self
            .messaging
            .as_ref()
            .ok_or(PushSetupError::MessagingNotConfigured)?;
        let vapid_key = self
            .config
            .vapid_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(PushSetupError::MissingVapidKey)?;

        let permission = messaging.request_permission().await;
        self.state.lock().await.permission = permission;
        if permission != PermissionState::Granted {
            return Err(PushSetupError::PermissionNotGranted);
        }

        let scope = self.messaging_scope().await?;

        if let Err(e) = self.container.post_user_data(&scope, user_name).await {
            warn!(scope = %scope, error = %e, "Could not post USER_DATA");
        }

        let token = messaging
            .get_token(vapid_key, &scope)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or(PushSetupError::NoToken)?;

        let mut state = self.state.lock().await;
        if state.cached_token.as_deref() != Some(token.as_str()) {
            self.store.save_token(user_id, &token).await?;
            state.cached_token = Some(token.clone());
            info!(user_id, "Device token saved");
        } else {
            debug!(user_id, "Device token unchanged");
        }
        state.listening_scope = Some(scope);

        Ok(token)
    }

    /// Handle a push that arrived while the page is in front.
    ///
    /// Shows a plain notification only when the payload has both a title and
    /// a body and permission is granted. Returns the shown notification.
    pub async fn on_foreground_message(
        &self,
        payload: &Value,
    ) -> Result<Option<NotificationId>, ServiceWorkerError> {
        let (scope, permission) = {
            let state = self.state.lock().await;
            match &state.listening_scope {
                Some(scope) => (scope.clone(), state.permission),
                None => return Ok(None),
            }
        };

        let text = |field: &str| {
            payload
                .pointer(&format!("/notification/{field}"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        };
        let (Some(title), Some(body)) = (text("title"), text("body")) else {
            debug!("Foreground message without title and body");
            return Ok(None);
        };
        if permission != PermissionState::Granted {
            return Ok(None);
        }

        let id = self
            .container
            .show_page_notification(&scope, title, &NotificationOptions::plain(body))
            .await?;
        Ok(Some(id))
    }

    /// Scope of the messaging worker, registering it if needed.
    async fn messaging_scope(&self) -> Result<String, PushSetupError> {
        let script = self
            .origin
            .join(&self.config.messaging_script)
            .map_err(|e| PushSetupError::Failed(e.to_string()))?;

        if let Some(scope) = self.container.get_registration(script.as_str()).await {
            return Ok(scope);
        }
        Ok(self.container.register(script.as_str(), Some("/")).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const ORIGIN: &str = "https://spoilme.example/";

    struct FakeMessaging {
        permission: PermissionState,
        tokens: StdMutex<Vec<Option<String>>>,
        token_calls: AtomicUsize,
    }

    impl FakeMessaging {
        fn granted(tokens: &[Option<&str>]) -> Self {
            Self {
                permission: PermissionState::Granted,
                tokens: StdMutex::new(tokens.iter().map(|t| t.map(str::to_string)).collect()),
                token_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessagingBackend for FakeMessaging {
        async fn request_permission(&self) -> PermissionState {
            self.permission
        }

        async fn get_token(
            &self,
            vapid_key: &str,
            _scope: &str,
        ) -> Result<Option<String>, PushSetupError> {
            assert_eq!(vapid_key, "vapid");
            let call = self.token_calls.fetch_add(1, Ordering::SeqCst);
            let tokens = self.tokens.lock().unwrap();
            Ok(tokens.get(call).or(tokens.last()).cloned().flatten())
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            vapid_key: Some("vapid".into()),
            ..WorkerConfig::default()
        }
    }

    fn setup(
        messaging: Option<FakeMessaging>,
        config: WorkerConfig,
    ) -> (
        PushRegistrar<FakeMessaging, MemoryTokenStore>,
        ServiceWorkerContainer,
    ) {
        let (container, _events) = ServiceWorkerContainer::new(config.clone());
        let registrar = PushRegistrar::new(
            container.clone(),
            config,
            Url::parse(ORIGIN).unwrap(),
            messaging,
            MemoryTokenStore::new(),
        );
        (registrar, container)
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(PushSetupError::MissingUserId.reason(), "missing_userId");
        assert_eq!(PushSetupError::ServiceWorkerUnsupported.reason(), "sw_unsupported");
        assert_eq!(
            PushSetupError::MessagingNotConfigured.reason(),
            "firebase_messaging_not_configured"
        );
        assert_eq!(PushSetupError::Failed("boom".into()).reason(), "boom");
    }

    #[tokio::test]
    async fn test_unsupported_page() {
        let (registrar, _) = setup(Some(FakeMessaging::granted(&[Some("t")])), config());

        let no_sw = registrar.with_environment(PageEnvironment {
            service_worker: false,
            ..PageEnvironment::default()
        });
        let err = no_sw.ensure_push_registered("u-1", None).await.unwrap_err();
        assert_eq!(err.reason(), "sw_unsupported");

        let server_side = no_sw.with_environment(PageEnvironment {
            in_browser: false,
            ..PageEnvironment::default()
        });
        let err = server_side.ensure_push_registered("", None).await.unwrap_err();
        assert_eq!(err, PushSetupError::NotInBrowser);
    }

    #[tokio::test]
    async fn test_missing_inputs() {
        let (registrar, _) = setup(Some(FakeMessaging::granted(&[Some("t")])), config());
        let err = registrar.ensure_push_registered("", None).await.unwrap_err();
        assert_eq!(err.reason(), "missing_userId");

        let (registrar, _) = setup(None, config());
        let err = registrar.ensure_push_registered("u-1", None).await.unwrap_err();
        assert_eq!(err, PushSetupError::MessagingNotConfigured);

        let (registrar, _) = setup(
            Some(FakeMessaging::granted(&[Some("t")])),
            WorkerConfig::default(),
        );
        let err = registrar.ensure_push_registered("u-1", None).await.unwrap_err();
        assert_eq!(err.reason(), "missing_vapid_key");
    }

    #[tokio::test]
    async fn test_permission_denied_registers_nothing() {
        let messaging = FakeMessaging {
            permission: PermissionState::Denied,
            ..FakeMessaging::granted(&[Some("t")])
        };
        let (registrar, container) = setup(Some(messaging), config());

        let err = registrar.ensure_push_registered("u-1", None).await.unwrap_err();
        assert_eq!(err.reason(), "permission_not_granted");
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_token() {
        let (registrar, _) = setup(Some(FakeMessaging::granted(&[None])), config());
        let err = registrar.ensure_push_registered("u-1", None).await.unwrap_err();
        assert_eq!(err.reason(), "no_token");
        assert!(registrar.store().saved().await.is_empty());
    }

    #[tokio::test]
    async fn test_token_saved_only_when_changed() {
        let messaging = FakeMessaging::granted(&[Some("tok-a"), Some("tok-a"), Some("tok-b")]);
        let (registrar, _) = setup(Some(messaging), config());

        for _ in 0..2 {
            assert_eq!(registrar.ensure_push_registered("u-1", None).await.unwrap(), "tok-a");
        }
        assert_eq!(registrar.ensure_push_registered("u-1", None).await.unwrap(), "tok-b");

        assert_eq!(
            registrar.store().saved().await,
            vec![
                ("u-1".to_string(), "tok-a".to_string()),
                ("u-1".to_string(), "tok-b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_registers_messaging_worker_once() {
        let (registrar, container) =
            setup(Some(FakeMessaging::granted(&[Some("t")])), config());

        registrar.ensure_push_registered("u-1", None).await.unwrap();
        registrar.ensure_push_registered("u-1", None).await.unwrap();

        assert_eq!(container.get_registrations().await, vec![ORIGIN.to_string()]);
        let [installing, waiting, active] = container.worker_states(ORIGIN).await.unwrap();
        assert!(installing.is_none() && waiting.is_none());
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn test_user_data_reaches_worker() {
        let (registrar, container) =
            setup(Some(FakeMessaging::granted(&[Some("t")])), config());
        registrar
            .ensure_push_registered("u-1", Some("Alice"))
            .await
            .unwrap();

        container
            .deliver_push(
                ORIGIN,
                json!({ "notification": { "title": "Hi user", "body": "Welcome back" } }),
            )
            .await
            .unwrap();
        let shown = container.notifications(ORIGIN).await.unwrap();
        assert_eq!(shown[0].title, "Hi Alice");
    }

    #[tokio::test]
    async fn test_foreground_needs_title_and_body() {
        let (registrar, container) =
            setup(Some(FakeMessaging::granted(&[Some("t")])), config());

        let complete = json!({ "notification": { "title": "Outbid", "body": "Bid again" } });
        assert_eq!(registrar.on_foreground_message(&complete).await.unwrap(), None);

        registrar.ensure_push_registered("u-1", None).await.unwrap();
        let untitled = json!({ "notification": { "body": "Bid again" } });
        assert_eq!(registrar.on_foreground_message(&untitled).await.unwrap(), None);
        let blank = json!({ "notification": { "title": "Outbid", "body": "" } });
        assert_eq!(registrar.on_foreground_message(&blank).await.unwrap(), None);

        let id = registrar
            .on_foreground_message(&complete)
            .await
            .unwrap()
            .expect("shown");
        let shown = container.notifications(ORIGIN).await.unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, id);
        assert_eq!(shown[0].title, "Outbid");
        assert_eq!(shown[0].options, NotificationOptions::plain("Bid again"));
    }
}
