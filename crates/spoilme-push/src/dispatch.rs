//! Admin push fan-out.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use spoilme_common::SpoilMeError;
use spoilme_core::config::FcmConfig;
use spoilme_core::types::SITE_ROOT;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::fcm::{FcmClient, FcmMessage, FcmNotification};
use crate::target::PushTarget;
use crate::tokens::TokenSource;
use crate::PushError;

/// A push composed in the admin console.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawAdminPushRequest")]
pub struct AdminPushRequest {
    pub target: PushTarget,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    /// Page to open on click; the site root when unset.
    pub link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdminPushRequest {
    target_type: String,
    #[serde(default)]
    target_value: Option<String>,
    title: String,
    body: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

impl TryFrom<RawAdminPushRequest> for AdminPushRequest {
    type Error = String;

    fn try_from(raw: RawAdminPushRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            target: PushTarget::from_parts(&raw.target_type, raw.target_value.as_deref())?,
            title: raw.title,
            body: raw.body,
            image_url: raw.image_url.filter(|s| !s.is_empty()),
            link: raw.link.filter(|s| !s.is_empty()),
        })
    }
}

impl AdminPushRequest {
    pub fn new(target: PushTarget, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target,
            title: title.into(),
            body: body.into(),
            image_url: None,
            link: None,
        }
    }
}

/// Result of a fan-out, in the shape the admin console expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub success: bool,
    pub sent_count: u64,
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PushOutcome {
    fn no_devices() -> Self {
        Self {
            success: false,
            sent_count: 0,
            failure_count: 0,
            message: Some("No active devices found".to_string()),
        }
    }

    fn delivered(sent_count: u64, failure_count: u64) -> Self {
        Self {
            success: true,
            sent_count,
            failure_count,
            message: None,
        }
    }
}

/// Resolves targets and sends through FCM.
pub struct PushDispatcher<S> {
    tokens: S,
    /// `None` means dry run.
    fcm: Option<FcmClient>,
    batch_size: usize,
    max_tokens: usize,
}

impl<S: TokenSource> PushDispatcher<S> {
    pub fn new(tokens: S, client: Client, config: &FcmConfig) -> Self {
        let fcm = config
            .server_key
            .as_ref()
            .map(|key| FcmClient::new(client, config.endpoint.clone(), key.clone()));

        Self {
            tokens,
            fcm,
            batch_size: config.batch_size.max(1),
            max_tokens: config.max_tokens,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.fcm.is_none()
    }

    /// Fan a push out to every device of its target.
    ///
    /// A batch FCM rejects, or that cannot be delivered at all, counts every
    /// recipient in it as a failure; remaining batches are still sent.
    pub async fn send(&self, request: &AdminPushRequest) -> Result<PushOutcome, PushError> {
        let tokens = self.tokens.tokens_for(&request.target).await?;
        let tokens = unique_capped(tokens, self.max_tokens);

        if tokens.is_empty() {
            info!(push_target = request.target.label(), "No devices to notify");
            return Ok(PushOutcome::no_devices());
        }

        let Some(fcm) = &self.fcm else {
            warn!(
                devices = tokens.len(),
                "FCM_SERVER_KEY not set; skipping send"
            );
            return Ok(PushOutcome::delivered(tokens.len() as u64, 0));
        };

        let notification = FcmNotification {
            title: request.title.clone(),
            body: request.body.clone(),
            image: request.image_url.clone(),
            sound: None,
        };
        let data = Map::from_iter([(
            "url".to_string(),
            Value::String(request.link.clone().unwrap_or_else(|| SITE_ROOT.to_string())),
        )]);

        let mut sent = 0;
        let mut failed = 0;
        for batch in tokens.chunks(self.batch_size) {
            let message = FcmMessage {
                registration_ids: batch.to_vec(),
                notification: notification.clone(),
                data: data.clone(),
            };

            match fcm.send(&message).await {
                Ok(response) => {
                    sent += response.success;
                    failed += response.failure;
                }
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "FCM batch send failed");
                    failed += batch.len() as u64;
                }
            }
        }

        info!(
            push_target = request.target.label(),
            sent, failed, "Push fan-out complete"
        );
        Ok(PushOutcome::delivered(sent, failed))
    }

    /// Alert every admin device, e.g. about a new artist application.
    ///
    /// Returns FCM's response body verbatim.
    pub async fn notify_admins(
        &self,
        title: &str,
        body: &str,
        user_id: &str,
    ) -> Result<String, PushError> {
        let tokens = self.tokens.tokens_for(&PushTarget::Admins).await?;
        let tokens = unique_capped(tokens, self.max_tokens);
        if tokens.is_empty() {
            return Ok(json!({ "ok": true, "msg": "No admin tokens" }).to_string());
        }

        let fcm = self
            .fcm
            .as_ref()
            .ok_or_else(|| SpoilMeError::config("FCM_SERVER_KEY is not set"))?;

        let message = FcmMessage {
            registration_ids: tokens,
            notification: FcmNotification {
                title: title.to_string(),
                body: body.to_string(),
                image: None,
                sound: Some("default".to_string()),
            },
            data: Map::from_iter([("userId".to_string(), Value::String(user_id.to_string()))]),
        };

        let (_, body) = fcm.send_raw(&message).await?;
        Ok(body)
    }
}

/// Drop repeats (first occurrence wins) and keep at most `max`.
fn unique_capped(tokens: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .take(max)
        .collect()
}
