//! Firebase Cloud Messaging legacy HTTP client.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;
use url::Url;

use crate::PushError;

/// Body of one legacy send request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FcmMessage {
    pub registration_ids: Vec<String>,
    pub notification: FcmNotification,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// Per-request delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FcmResponse {
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failure: u64,
}

#[derive(Debug, Clone)]
pub struct FcmClient {
    client: Client,
    endpoint: Url,
    server_key: String,
}

impl FcmClient {
    pub fn new(client: Client, endpoint: Url, server_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            server_key: server_key.into(),
        }
    }

    /// Send and return the raw status and body, whatever the status.
    pub async fn send_raw(&self, message: &FcmMessage) -> Result<(StatusCode, String), PushError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("key={}", self.server_key))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        trace!(%status, recipients = message.registration_ids.len(), "FCM responded");
        Ok((status, body))
    }

    /// Send and decode the delivery counters. Non-2xx is an error.
    pub async fn send(&self, message: &FcmMessage) -> Result<FcmResponse, PushError> {
        let (status, body) = self.send_raw(message).await?;
        if !status.is_success() {
            return Err(PushError::Fcm {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> FcmMessage {
        FcmMessage {
            registration_ids: vec!["t1".into(), "t2".into()],
            notification: FcmNotification {
                title: "New drop".into(),
                body: "Fresh denim".into(),
                image: None,
                sound: None,
            },
            data: Map::from_iter([("url".to_string(), json!("/shop"))]),
        }
    }

    fn client(server: &MockServer) -> FcmClient {
        let endpoint = Url::parse(&format!("{}/fcm/send", server.uri())).unwrap();
        FcmClient::new(Client::new(), endpoint, "server-key")
    }

    #[test]
    fn test_message_omits_unset_fields() {
        let value = serde_json::to_value(message()).unwrap();
        assert_eq!(
            value,
            json!({
                "registration_ids": ["t1", "t2"],
                "notification": { "title": "New drop", "body": "Fresh denim" },
                "data": { "url": "/shop" }
            })
        );
    }

    #[tokio::test]
    async fn test_send_decodes_counters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .and(header("authorization", "key=server-key"))
            .and(body_json(serde_json::to_value(message()).unwrap()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "multicast_id": 1, "success": 1, "failure": 1 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server).send(&message()).await.unwrap();
        assert_eq!(response, FcmResponse { success: 1, failure: 1 });
    }

    #[tokio::test]
    async fn test_send_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server).send(&message()).await.unwrap_err();
        assert!(matches!(err, PushError::Fcm { status: 401, .. }));

        let (status, body) = client(&server).send_raw(&message()).await.unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Unauthorized");
    }
}
