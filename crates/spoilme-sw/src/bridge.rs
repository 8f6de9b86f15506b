//! Push delivery bridge: the worker's event dispatch table.
//!
//! Each event kind maps to a pure handler taking the current [`WorkerState`]
//! and the event, and returning the next state plus the [`Effect`]s the
//! runtime must perform. Nothing here touches a host.

use serde_json::Value;
use spoilme_core::config::{DEFAULT_DISPLAY_NAME, DEFAULT_FALLBACK_ICON};
use spoilme_core::{PushData, PushPayload};
use thiserror::Error;
use tracing::{debug, trace};

use crate::messages::WorkerMessage;
use crate::push::{build_notification, NotificationOptions};

/// Identifier the host assigns to a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

/// Handler faults.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Push payload without `notification.title` / `notification.body`.
    #[error("Malformed push payload: {0}")]
    MalformedPush(#[from] serde_json::Error),
}

/// Worker-context state. Lives as long as the worker instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerState {
    /// Latest name from a `USER_DATA` message, if one arrived.
    pub display_name: Option<String>,
}

impl WorkerState {
    pub fn with_display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
        }
    }
}

/// Events delivered to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// `postMessage` from a page.
    Message(Value),
    /// Background push, raw as received from the messaging backend.
    Push(Value),
    /// The user clicked a shown notification.
    NotificationClick {
        notification: NotificationId,
        data: Option<PushData>,
    },
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Message(_) => "message",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick { .. } => "notificationclick",
        }
    }
}

/// Side effects requested by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ShowNotification {
        title: String,
        options: NotificationOptions,
    },
    CloseNotification(NotificationId),
    /// Focus the window already at `url`, or open one there.
    FocusOrOpen { url: String },
}

impl Effect {
    /// Whether the worker must be kept alive until this effect completes.
    pub fn extends_lifetime(&self) -> bool {
        matches!(self, Effect::FocusOrOpen { .. })
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: WorkerState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &WorkerState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }
}

/// Dispatch table with its fixed settings.
#[derive(Debug, Clone)]
pub struct Bridge {
    default_display_name: String,
    fallback_icon: String,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_NAME, DEFAULT_FALLBACK_ICON)
    }
}

impl Bridge {
    pub fn new(default_display_name: impl Into<String>, fallback_icon: impl Into<String>) -> Self {
        Self {
            default_display_name: default_display_name.into(),
            fallback_icon: fallback_icon.into(),
        }
    }

    /// Name used for personalization in `state`.
    pub fn display_name<'a>(&'a self, state: &'a WorkerState) -> &'a str {
        state
            .display_name
            .as_deref()
            .unwrap_or(&self.default_display_name)
    }

    /// Route an event to its handler.
    pub fn dispatch(
        &self,
        state: &WorkerState,
        event: &WorkerEvent,
    ) -> Result<Transition, BridgeError> {
        match event {
            WorkerEvent::Message(data) => Ok(self.on_message(state, data)),
            WorkerEvent::Push(raw) => self.on_push(state, raw),
            WorkerEvent::NotificationClick { notification, data } => {
                Ok(self.on_notification_click(state, *notification, data.as_ref()))
            }
        }
    }

    fn on_message(&self, state: &WorkerState, data: &Value) -> Transition {
        match WorkerMessage::parse(data) {
            Some(WorkerMessage::UserData { name }) => {
                debug!(%name, "Display name cached");
                Transition {
                    state: WorkerState {
                        display_name: Some(name),
                    },
                    effects: Vec::new(),
                }
            }
            None => {
                trace!("Ignoring unrecognized worker message");
                Transition::unchanged(state)
            }
        }
    }

    fn on_push(&self, state: &WorkerState, raw: &Value) -> Result<Transition, BridgeError> {
        let payload: PushPayload = serde_json::from_value(raw.clone())?;
        let (title, options) =
            build_notification(&payload, self.display_name(state), &self.fallback_icon);

        Ok(Transition {
            state: state.clone(),
            effects: vec![Effect::ShowNotification { title, options }],
        })
    }

    fn on_notification_click(
        &self,
        state: &WorkerState,
        notification: NotificationId,
        data: Option<&PushData>,
    ) -> Transition {
        let url = data
            .map(PushData::target_url)
            .unwrap_or(spoilme_core::types::SITE_ROOT)
            .to_string();

        Transition {
            state: state.clone(),
            effects: vec![
                Effect::CloseNotification(notification),
                Effect::FocusOrOpen { url },
            ],
        }
    }
}
