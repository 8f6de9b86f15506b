//! Firebase Cloud Messaging HTTP v1 client: one device per request.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;
use url::Url;

use crate::auth::AccessTokenSource;
use crate::PushError;

/// Request body of `messages:send`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct V1Request {
    pub message: V1Message,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct V1Message {
    pub token: String,
    pub notification: V1Notification,
    /// v1 only accepts string values here.
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct V1Notification {
    pub title: String,
    pub body: String,
}

/// Accepted message, e.g. `projects/p/messages/0:1500415314455276%31bd1c96f9fd7ecd`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct V1Response {
    pub name: String,
}

pub struct FcmV1Client<A> {
    client: Client,
    send_url: Url,
    auth: A,
}

impl<A: AccessTokenSource> FcmV1Client<A> {
    /// `base` is the API root, normally `https://fcm.googleapis.com/`.
    pub fn new(client: Client, base: &Url, project_id: &str, auth: A) -> Result<Self, PushError> {
        let send_url = base.join(&format!("v1/projects/{project_id}/messages:send"))?;
        Ok(Self {
            client,
            send_url,
            auth,
        })
    }

    pub fn send_url(&self) -> &Url {
        &self.send_url
    }

    pub async fn send(&self, message: V1Message) -> Result<V1Response, PushError> {
        let access_token = self.auth.access_token().await?;
        let response = self
            .client
            .post(self.send_url.clone())
            .bearer_auth(access_token)
            .json(&V1Request { message })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        trace!(%status, "FCM v1 responded");
        if !status.is_success() {
            return Err(PushError::Fcm {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
