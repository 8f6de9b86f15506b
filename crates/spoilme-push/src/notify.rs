//! Per-user notifications through FCM v1.
//!
//! Triggered by a row landing in the notifications table: every active
//! device of the row's user gets one message.

use serde::Deserialize;
use serde_json::{Map, Value};
use spoilme_core::types::SITE_ROOT;
use tracing::{info, warn};

use crate::auth::AccessTokenSource;
use crate::dispatch::PushOutcome;
use crate::fcm_v1::{FcmV1Client, V1Message, V1Notification};
use crate::target::PushTarget;
use crate::tokens::TokenSource;
use crate::PushError;

/// A notification row as delivered by the database webhook.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationRecord {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub action_url: Option<String>,
}

/// Webhook body: `{ "record": { ... } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationWebhook {
    pub record: NotificationRecord,
}

pub struct UserNotifier<S, A> {
    tokens: S,
    fcm: FcmV1Client<A>,
}

impl<S: TokenSource, A: AccessTokenSource> UserNotifier<S, A> {
    pub fn new(tokens: S, fcm: FcmV1Client<A>) -> Self {
        Self { tokens, fcm }
    }

    /// Send `record` to each of its user's active devices, one request per
    /// device. A rejected device is counted and the rest still go out.
    pub async fn notify(&self, record: &NotificationRecord) -> Result<PushOutcome, PushError> {
        let tokens = self
            .tokens
            .tokens_for(&PushTarget::ActiveDevices(record.user_id.clone()))
            .await?;

        if tokens.is_empty() {
            info!(user_id = %record.user_id, "No active devices");
            return Ok(PushOutcome {
                success: true,
                sent_count: 0,
                failure_count: 0,
                message: Some("No tokens found".to_string()),
            });
        }

        let url = record.action_url.clone().unwrap_or_else(|| SITE_ROOT.to_string());
        let data = Map::from_iter([("url".to_string(), Value::String(url))]);

        let mut sent = 0;
        let mut failed = 0;
        for token in tokens {
            let message = V1Message {
                token,
                notification: V1Notification {
                    title: record.title.clone(),
                    body: record.message.clone(),
                },
                data: data.clone(),
            };
            match self.fcm.send(message).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(user_id = %record.user_id, error = %e, "Device send failed");
                    failed += 1;
                }
            }
        }

        info!(user_id = %record.user_id, sent, failed, "User notified");
        Ok(PushOutcome {
            success: true,
            sent_count: sent,
            failure_count: failed,
            message: None,
        })
    }
}
