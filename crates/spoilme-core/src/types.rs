//! Push payload types shared by the sender and the worker

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Site root used when a payload carries no click target.
pub const SITE_ROOT: &str = "/";

/// Inbound push message as delivered by the messaging backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub notification: PushNotification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PushData>,
}

/// Visible part of a push message.
///
/// `title` and `body` are required; a payload without them does not
/// deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Data block attached to a push message.
///
/// Kept as raw JSON so the block reaches the click handler exactly as
/// received. Only `url` is ever read, and only when it is a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushData(pub Value);

impl PushData {
    /// Data block pointing at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self(json!({ "url": url.into() }))
    }

    /// The `url` entry, if it is a non-empty string.
    pub fn url(&self) -> Option<&str> {
        self.0
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Click target, falling back to the site root.
    pub fn target_url(&self) -> &str {
        self.url().unwrap_or(SITE_ROOT)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl PushPayload {
    /// Payload with a title and body and nothing else.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            notification: PushNotification {
                title: title.into(),
                body: body.into(),
                image: None,
            },
            data: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.notification.image = Some(image.into());
        self
    }

    pub fn with_data(mut self, data: PushData) -> Self {
        self.data = Some(data);
        self
    }
}
