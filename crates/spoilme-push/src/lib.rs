//! # Spoil Me Push
//!
//! Server-side push delivery: admin fan-out and per-user notifications.
//!
//! ## Design
//!
//! 1. **Targets**: a single user, a membership tier, every device, or the admins
//! 2. **Token lookup**: [`TokenSource`] over the hosted database's REST API
//! 3. **Delivery**: de-duplicated, capped, batched sends to FCM
//! 4. **Dry run**: without an FCM key nothing leaves the process
//! 5. **Per user**: [`UserNotifier`] sends one FCM v1 message per active
//!    device, authorized with a service-account access token

use thiserror::Error;

pub mod auth;
pub mod dispatch;
pub mod fcm;
pub mod fcm_v1;
pub mod notify;
pub mod target;
pub mod tokens;

pub use auth::{AccessTokenSource, ServiceAccountAuth, StaticAccessToken};

pub use dispatch::{AdminPushRequest, PushDispatcher, PushOutcome};
pub use fcm::{FcmClient, FcmMessage, FcmNotification, FcmResponse};
pub use fcm_v1::{FcmV1Client, V1Message, V1Notification, V1Response};
pub use notify::{NotificationRecord, NotificationWebhook, UserNotifier};
pub use target::PushTarget;
pub use tokens::{SupabaseTokenSource, TokenSource};

/// Errors that can occur while fanning out a push.
#[derive(Error, Debug)]
pub enum PushError {
    #[error(transparent)]
    Config(#[from] spoilme_common::SpoilMeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Token lookup failed with status {status}: {body}")]
    TokenLookup { status: u16, body: String },

    #[error("FCM rejected request with status {status}: {body}")]
    Fcm { status: u16, body: String },

    #[error("JWT signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("OAuth token exchange failed with status {status}: {body}")]
    OAuth { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}
