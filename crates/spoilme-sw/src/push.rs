//! Notification synthesis for background pushes.

use serde::{Deserialize, Serialize};
use spoilme_core::{PushData, PushPayload};

/// Tokens replaced by the display name, matched without regard to case.
const PLACEHOLDERS: [&str; 2] = ["valued customer", "user"];

/// Options handed to the host's notification API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// The payload's `data` block, untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PushData>,
}

impl NotificationOptions {
    /// Options with just a body, as foreground pages show them.
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            icon: None,
            data: None,
        }
    }
}

/// Replace every placeholder in `text` with `name`.
///
/// This is a plain substring match: "username" becomes "<name>name".
/// Replaced text is not rescanned.
pub fn personalize(text: &str, name: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        match placeholder_at(rest) {
            Some(len) => {
                out.push_str(name);
                // placeholders are ASCII, so `len` is a char boundary
                rest = &rest[len..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }

    out
}

fn placeholder_at(rest: &str) -> Option<usize> {
    PLACEHOLDERS
        .iter()
        .find(|token| {
            rest.as_bytes()
                .get(..token.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(token.as_bytes()))
        })
        .map(|token| token.len())
}

/// Build the personalized title and options for a push payload.
pub fn build_notification(
    payload: &PushPayload,
    name: &str,
    fallback_icon: &str,
) -> (String, NotificationOptions) {
    let title = personalize(&payload.notification.title, name);
    let options = NotificationOptions {
        body: personalize(&payload.notification.body, name),
        icon: Some(
            payload
                .notification
                .image
                .clone()
                .filter(|image| !image.is_empty())
                .unwrap_or_else(|| fallback_icon.to_string()),
        ),
        data: payload.data.clone(),
    };
    (title, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ICON: &str = "/icons/icon-192x192.png";

    #[test]
    fn test_personalize_both_placeholders() {
        assert_eq!(personalize("Hey user!", "Alice"), "Hey Alice!");
        assert_eq!(personalize("Welcome valued customer", "Alice"), "Welcome Alice");
    }

    #[test]
    fn test_personalize_ignores_case() {
        assert_eq!(
            personalize("USER, Valued Customer, uSeR", "Bo"),
            "Bo, Bo, Bo"
        );
    }

    #[test]
    fn test_personalize_replaces_inside_words() {
        assert_eq!(personalize("Update your username", "Alice"), "Update your Alicename");
    }

    #[test]
    fn test_personalize_does_not_rescan_name() {
        assert_eq!(personalize("hi user", "user user"), "hi user user");
    }

    #[test]
    fn test_personalize_non_ascii_text() {
        assert_eq!(personalize("¡Hola user! ✨", "Zoë"), "¡Hola Zoë! ✨");
        assert_eq!(personalize("", "Zoë"), "");
    }

    #[test]
    fn test_build_notification_uses_fallback_icon() {
        let payload = PushPayload::new("Hey user!", "Welcome valued customer");
        let (title, options) = build_notification(&payload, "Alice", ICON);

        assert_eq!(title, "Hey Alice!");
        assert_eq!(options.body, "Welcome Alice");
        assert_eq!(options.icon.as_deref(), Some(ICON));
        assert!(options.data.is_none());
    }

    #[test]
    fn test_build_notification_keeps_image_and_data() {
        let payload = PushPayload::new("Sale", "50% off")
            .with_image("https://cdn.example/jacket.png")
            .with_data(PushData::with_url("/product/7"));
        let (_, options) = build_notification(&payload, "Alice", ICON);

        assert_eq!(options.icon.as_deref(), Some("https://cdn.example/jacket.png"));
        assert_eq!(options.data, Some(PushData::with_url("/product/7")));
    }

    #[test]
    fn test_build_notification_empty_image_falls_back() {
        let payload = PushPayload::new("Sale", "50% off").with_image("");
        let (_, options) = build_notification(&payload, "Alice", ICON);
        assert_eq!(options.icon.as_deref(), Some(ICON));
    }
}
