//! Update notifier: the "new version available" prompt.
//!
//! Visibility follows the registration's lifecycle signals. A fresh install
//! ([`LifecycleSignal::OfflineReady`]) never shows the prompt; a waiting
//! update ([`LifecycleSignal::NeedRefresh`]) does, until the user picks
//! "Refresh now" or "Later".

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::registration::{LifecycleSignal, ServiceWorkerContainer};
use crate::ServiceWorkerError;

/// The registration's update operation.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Activate the waiting worker when `force_activate` is set.
    async fn update_service_worker(&self, force_activate: bool) -> Result<(), ServiceWorkerError>;
}

/// [`Updater`] bound to one registration scope of a container.
#[derive(Clone)]
pub struct ScopedUpdater {
    container: ServiceWorkerContainer,
    scope: String,
}

impl ScopedUpdater {
    pub fn new(container: ServiceWorkerContainer, scope: impl Into<String>) -> Self {
        Self {
            container,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl Updater for ScopedUpdater {
    async fn update_service_worker(&self, force_activate: bool) -> Result<(), ServiceWorkerError> {
        self.container
            .update_service_worker(&self.scope, force_activate)
            .await
    }
}

/// Latest values of the two lifecycle signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleSignals {
    pub offline_ready: bool,
    pub need_refresh: bool,
    /// Which signal fired most recently.
    pub last: Option<LifecycleSignal>,
}

/// Prompt state plus the update operation behind "Refresh now".
pub struct UpdateNotifier<U> {
    updater: U,
    signals: LifecycleSignals,
    visible: bool,
}

impl<U: Updater> UpdateNotifier<U> {
    pub fn new(updater: U) -> Self {
        Self {
            updater,
            signals: LifecycleSignals::default(),
            visible: false,
        }
    }

    /// Feed a lifecycle signal.
    pub fn on_signal(&mut self, signal: LifecycleSignal) {
        self.signals.last = Some(signal);
        match signal {
            LifecycleSignal::OfflineReady => {
                self.signals.offline_ready = true;
                self.visible = false;
                debug!("App ready to work offline");
            }
            LifecycleSignal::NeedRefresh => {
                self.signals.need_refresh = true;
                self.visible = true;
                info!("New version available");
            }
        }
    }

    /// Whether the prompt is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn signals(&self) -> LifecycleSignals {
        self.signals
    }

    /// "Refresh now": activate the waiting worker. Failures are logged and
    /// swallowed; the prompt is hidden either way.
    pub async fn refresh_now(&mut self) {
        match self.updater.update_service_worker(true).await {
            Ok(()) => {
                self.signals.need_refresh = false;
                debug!("Service worker update applied");
            }
            Err(e) => warn!(error = %e, "Service worker update failed"),
        }
        self.visible = false;
    }

    /// "Later": hide the prompt until the next `NeedRefresh`.
    pub fn later(&mut self) {
        self.visible = false;
    }

    /// Forget all signals, for a new registration session.
    pub fn reset(&mut self) {
        self.signals = LifecycleSignals::default();
        self.visible = false;
    }
}
