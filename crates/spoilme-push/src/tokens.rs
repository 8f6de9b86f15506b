//! Device token lookup.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use spoilme_core::AppConfig;
use tracing::debug;
use url::Url;

use crate::target::PushTarget;
use crate::PushError;

/// Resolves a target to device tokens. Order is preserved; duplicates are
/// allowed.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn tokens_for(&self, target: &PushTarget) -> Result<Vec<String>, PushError>;
}

/// Token lookup against the hosted database's REST endpoint using the
/// service-role key.
#[derive(Debug, Clone)]
pub struct SupabaseTokenSource {
    client: Client,
    base: Url,
    service_role_key: String,
}

impl SupabaseTokenSource {
    /// `base` may carry a path; it is treated as a directory.
    pub fn new(client: Client, mut base: Url, service_role_key: impl Into<String>) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            client,
            base,
            service_role_key: service_role_key.into(),
        }
    }

    /// Build from configuration; fails if the URL or key is missing.
    pub fn from_config(client: Client, config: &AppConfig) -> Result<Self, PushError> {
        let (url, key) = config.supabase_credentials()?;
        Ok(Self::new(client, url.clone(), key))
    }

    fn rest(&self, path: &str) -> Result<Url, PushError> {
        Ok(self.base.join(&format!("rest/v1/{path}"))?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn fetch(&self, request: RequestBuilder) -> Result<Value, PushError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(PushError::TokenLookup {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl SupabaseTokenSource {
    /// Record a user's current messaging token on their profile.
    pub async fn store_user_token(&self, user_id: &str, token: &str) -> Result<(), PushError> {
        let request = self
            .client
            .patch(self.rest("users")?)
            .query(&[("id", format!("eq.{user_id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "fcm_token": token }));

        let response = self.authorized(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushError::TokenLookup {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }
        debug!(user_id, "Messaging token stored");
        Ok(())
    }
}

#[async_trait]
impl TokenSource for SupabaseTokenSource {
    async fn tokens_for(&self, target: &PushTarget) -> Result<Vec<String>, PushError> {
        let (rows, column) = match target {
            PushTarget::Individual(user_id) => {
                let request = self
                    .client
                    .get(self.rest("push_tokens")?)
                    .query(&[("select", "token".to_string()), ("user_id", format!("eq.{user_id}"))]);
                (self.fetch(request).await?, "token")
            }
            PushTarget::Tier(tier) => {
                let request = self
                    .client
                    .post(self.rest("rpc/get_tokens_for_tier")?)
                    .json(&json!({ "tier": tier }));
                (self.fetch(request).await?, "token")
            }
            PushTarget::All => {
                let request = self
                    .client
                    .get(self.rest("push_tokens")?)
                    .query(&[("select", "token"), ("limit", "1000")]);
                (self.fetch(request).await?, "token")
            }
            PushTarget::ActiveDevices(user_id) => {
                let request = self.client.get(self.rest("push_tokens")?).query(&[
                    ("select", "token".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                    ("is_active", "eq.true".to_string()),
                ]);
                (self.fetch(request).await?, "token")
            }
            PushTarget::Admins => {
                let request = self
                    .client
                    .get(self.rest("users")?)
                    .query(&[("select", "push_token"), ("is_admin", "eq.true")]);
                (self.fetch(request).await?, "push_token")
            }
        };

        let tokens = collect_tokens(&rows, column);
        debug!(push_target = target.label(), count = tokens.len(), "Tokens resolved");
        Ok(tokens)
    }
}

/// Pull non-empty tokens out of a REST response.
///
/// Rows may be objects carrying `column`, bare strings, or nested arrays of
/// either (as set-returning functions produce).
pub fn collect_tokens(rows: &Value, column: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    push_tokens(rows, column, &mut tokens);
    tokens
}

fn push_tokens(value: &Value, column: &str, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                push_tokens(item, column, out);
            }
        }
        Value::Object(row) => {
            if let Some(Value::String(s)) = row.get(column) {
                if !s.is_empty() {
                    out.push(s.clone());
                }
            }
        }
        _ => {}
    }
}
