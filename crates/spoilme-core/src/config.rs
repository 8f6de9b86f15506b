//! Application configuration

use serde::{Deserialize, Serialize};
use spoilme_common::{Result, SpoilMeError};
use url::Url;

/// Legacy FCM HTTP endpoint.
pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// Base of the FCM HTTP v1 API.
pub const DEFAULT_FCM_V1_ENDPOINT: &str = "https://fcm.googleapis.com/";

/// Google OAuth token endpoint for service-account grants.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Messaging worker script the page registers.
pub const DEFAULT_MESSAGING_SCRIPT: &str = "/firebase-messaging-sw.js";

/// Name used to personalize notifications before the page sends one.
pub const DEFAULT_DISPLAY_NAME: &str = "valued customer";

/// Icon shown when a push payload carries no image.
pub const DEFAULT_FALLBACK_ICON: &str = "/icons/icon-192x192.png";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub supabase: SupabaseConfig,
    pub fcm: FcmConfig,
    pub worker: WorkerConfig,
}

/// Hosted database access (PostgREST)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: Option<Url>,

    /// Service-role key, sent as both `apikey` and bearer token
    pub service_role_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmConfig {
    /// Legacy server key. Sends are dry runs when unset.
    pub server_key: Option<String>,

    pub endpoint: Url,

    /// Registration ids per request
    pub batch_size: usize,

    /// Upper bound on devices reached by one fan-out
    pub max_tokens: usize,

    /// Service account for the v1 API; per-user sends need it.
    #[serde(default)]
    pub service_account: Option<ServiceAccountKey>,

    /// Overrides the service account's project.
    #[serde(default)]
    pub project_id: Option<String>,

    pub v1_endpoint: Url,
}

/// Google service-account key, as downloaded from the Firebase console.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PKCS#8 PEM
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

impl FcmConfig {
    /// Project for v1 sends: the explicit override, else the key's.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref().or_else(|| {
            self.service_account
                .as_ref()
                .and_then(|key| key.project_id.as_deref())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub default_display_name: String,
    pub fallback_icon: String,

    /// Script path the page registers for messaging.
    pub messaging_script: String,

    /// Web-push VAPID key handed to the messaging backend.
    #[serde(default)]
    pub vapid_key: Option<String>,
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            server_key: None,
            endpoint: Url::parse(DEFAULT_FCM_ENDPOINT).expect("valid default FCM endpoint"),
            batch_size: 500,
            max_tokens: 1000,
            service_account: None,
            project_id: None,
            v1_endpoint: Url::parse(DEFAULT_FCM_V1_ENDPOINT).expect("valid default FCM v1 endpoint"),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_display_name: DEFAULT_DISPLAY_NAME.to_string(),
            fallback_icon: DEFAULT_FALLBACK_ICON.to_string(),
            messaging_script: DEFAULT_MESSAGING_SCRIPT.to_string(),
            vapid_key: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                                        | Default          |
    /// |------------------------------------------------|------------------|
    /// | `SUPABASE_URL` / `NEXT_PUBLIC_SUPABASE_URL`    | unset            |
    /// | `SUPABASE_SERVICE_ROLE_KEY`                    | unset            |
    /// | `FCM_SERVER_KEY`                               | unset (dry run)  |
    /// | `SPOILME_FCM_ENDPOINT`                         | legacy FCM URL   |
    /// | `FIREBASE_SERVICE_ACCOUNT` (JSON key)          | unset            |
    /// | `FIREBASE_PROJECT_ID`                          | key's project    |
    /// | `SPOILME_FCM_V1_ENDPOINT`                      | FCM v1 base URL  |
    /// | `VITE_FIREBASE_VAPID_KEY` / `VITE_FCM_VAPID_KEY` / `VITE_VAPID_KEY` | unset |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get("SUPABASE_URL").or_else(|| get("NEXT_PUBLIC_SUPABASE_URL")) {
            let url = Url::parse(raw.trim())
                .map_err(|e| SpoilMeError::config_with_source("invalid SUPABASE_URL", e))?;
            config.supabase.url = Some(url);
        }
        config.supabase.service_role_key = get("SUPABASE_SERVICE_ROLE_KEY");
        config.fcm.server_key = get("FCM_SERVER_KEY");

        if let Some(raw) = get("SPOILME_FCM_ENDPOINT") {
            config.fcm.endpoint = Url::parse(raw.trim())
                .map_err(|e| SpoilMeError::config_with_source("invalid SPOILME_FCM_ENDPOINT", e))?;
        }

        if let Some(raw) = get("FIREBASE_SERVICE_ACCOUNT") {
            let key = serde_json::from_str(&raw).map_err(|e| {
                SpoilMeError::config_with_source("invalid FIREBASE_SERVICE_ACCOUNT", e)
            })?;
            config.fcm.service_account = Some(key);
        }
        config.fcm.project_id = get("FIREBASE_PROJECT_ID");

        if let Some(raw) = get("SPOILME_FCM_V1_ENDPOINT") {
            config.fcm.v1_endpoint = Url::parse(raw.trim()).map_err(|e| {
                SpoilMeError::config_with_source("invalid SPOILME_FCM_V1_ENDPOINT", e)
            })?;
        }

        config.worker.vapid_key = get("VITE_FIREBASE_VAPID_KEY")
            .or_else(|| get("VITE_FCM_VAPID_KEY"))
            .or_else(|| get("VITE_VAPID_KEY"));

        Ok(config)
    }

    /// Supabase URL and key, or a config error naming what is missing.
    pub fn supabase_credentials(&self) -> Result<(&Url, &str)> {
        match (&self.supabase.url, &self.supabase.service_role_key) {
            (Some(url), Some(key)) => Ok((url, key.as_str())),
            (None, _) => Err(SpoilMeError::config("SUPABASE_URL is not set")),
            (_, None) => Err(SpoilMeError::config("SUPABASE_SERVICE_ROLE_KEY is not set")),
        }
    }
}
