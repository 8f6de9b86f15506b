//! OAuth access tokens for the FCM v1 API.

use async_trait::async_trait;
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use spoilme_core::config::ServiceAccountKey;
use tokio::sync::Mutex;
use tracing::debug;

use crate::PushError;

/// OAuth scope for sending through FCM.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion.
const ASSERTION_TTL_SECS: u64 = 3600;

/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Supplies bearer tokens for v1 requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, PushError>;
}

/// A fixed token, e.g. one minted by `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticAccessToken {
    async fn access_token(&self) -> Result<String, PushError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    exp: u64,
    iat: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_TTL_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: u64,
}

/// Exchanges a signed service-account assertion for an access token and
/// reuses it until shortly before it expires.
pub struct ServiceAccountAuth {
    client: Client,
    key: ServiceAccountKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(client: Client, key: ServiceAccountKey) -> Self {
        Self {
            client,
            key,
            cached: Mutex::new(None),
        }
    }

    /// RS256 assertion for the token endpoint, issued at `now`.
    fn assertion(&self, now: u64) -> Result<String, PushError> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: FCM_SCOPE.to_string(),
            aud: self.key.token_uri().to_string(),
            exp: now + ASSERTION_TTL_SECS,
            iat: now,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?)
    }

    async fn exchange(&self, now: u64) -> Result<CachedToken, PushError> {
        let assertion = self.assertion(now)?;
        let response = self
            .client
            .post(self.key.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PushError::OAuth {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        debug!(expires_in = token.expires_in, "Access token issued");
        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, PushError> {
        let now = get_current_timestamp();
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + EXPIRY_MARGIN_SECS {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
