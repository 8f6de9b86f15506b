//! # Spoil Me Service Worker
//!
//! Client-side delivery flow for the Spoil Me Vintage PWA.
//!
//! ## Features
//!
//! - **Registration**: install/waiting/active slots, skip-waiting updates
//! - **Update prompt**: `offlineReady` / `needRefresh` driven visibility
//! - **Push bridge**: display-name personalization of background pushes
//! - **Clients API**: focus an open window or open a new one on click
//! - **Page setup**: permission, device token and foreground messages
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     ├── ContainerEvent ──→ UpdateNotifier (prompt)
//!     │
//!     └── ServiceWorkerRegistration
//!             ├── installing / waiting
//!             └── active ──→ WorkerRuntime (one task, FIFO events)
//!                               ├── Bridge::dispatch (pure)
//!                               └── WorkerHost (notifications, Clients)
//! ```

use thiserror::Error;

pub mod bridge;
pub mod clients;
pub mod foreground;
pub mod messages;
pub mod push;
pub mod registration;
pub mod runtime;
pub mod update;

pub use bridge::{Bridge, BridgeError, Effect, NotificationId, WorkerEvent, WorkerState};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use foreground::{
    MemoryTokenStore, MessagingBackend, PageEnvironment, PermissionState, PushRegistrar,
    PushSetupError, TokenStore,
};
pub use messages::WorkerMessage;
pub use push::{build_notification, personalize, NotificationOptions};
pub use registration::{
    ContainerEvent, LifecycleSignal, ServiceWorker, ServiceWorkerContainer,
    ServiceWorkerRegistration, ServiceWorkerState,
};
pub use runtime::{DisplayedNotification, LocalHost, WorkerHandle, WorkerHost, WorkerRuntime};
pub use update::{LifecycleSignals, ScopedUpdater, UpdateNotifier, Updater};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// A worker event handler faulted.
    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker terminated")]
    Terminated,
}
