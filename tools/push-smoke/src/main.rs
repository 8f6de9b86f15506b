//! Smoke-test harness for Spoil Me Vintage push delivery.
//!
//! Provides commands for:
//! - Fanning an admin push out through FCM
//! - Alerting admin devices directly
//! - Notifying one user's active devices through FCM v1
//! - Replaying a push through a local service worker
//! - Registering a device token for a user as the page would
//!
//! ## Usage
//!
//! ```bash
//! # Push to every device (dry run when FCM_SERVER_KEY is unset)
//! push-smoke send --target all --title "New drop" --body "Hi user, take a look"
//!
//! # Push to one user's devices, opening a product page on click
//! push-smoke send --target individual --value <user-id> --title "Sold" --body "..." --link /orders
//!
//! # Notify a user through FCM v1 (needs FIREBASE_SERVICE_ACCOUNT)
//! push-smoke notify-user --user-id <user-id> --title "You won" --message "..." --action-url /orders
//!
//! # Replay a payload through the worker as a signed-in customer
//! push-smoke simulate --name Alice --payload push.json --click
//!
//! # Record a device token against a user (needs a VAPID key)
//! push-smoke subscribe --user-id <user-id> --device-token <token> --name Alice
//! ```

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use spoilme_common::{init_logging, LogConfig, LogFormat, SpoilMeError};
use spoilme_core::AppConfig;
use spoilme_push::{
    AdminPushRequest, FcmV1Client, NotificationRecord, PushDispatcher, PushTarget,
    ServiceAccountAuth, SupabaseTokenSource, UserNotifier,
};
use spoilme_sw::{
    ClientMatchOptions, ContainerEvent, MessagingBackend, PermissionState, PushRegistrar,
    PushSetupError, ServiceWorkerContainer, TokenStore,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "push-smoke")]
#[command(about = "Smoke-test harness for Spoil Me Vintage push delivery")]
struct Cli {
    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fan an admin push out to a target audience
    Send {
        /// Audience: individual, tier, all or admins
        #[arg(short, long)]
        target: String,
        /// User id for `individual`, tier name for `tier`
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// Image shown in the notification
        #[arg(long)]
        image: Option<String>,
        /// Page opened on click
        #[arg(long)]
        link: Option<String>,
    },

    /// Alert every admin device
    NotifyAdmins {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// User the alert is about
        #[arg(long)]
        user_id: String,
    },

    /// Send a notification row to one user's active devices via FCM v1
    NotifyUser {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        /// Page opened on click; defaults to the site root
        #[arg(long)]
        action_url: Option<String>,
    },

    /// Deliver a push payload through a local service worker
    Simulate {
        /// JSON payload file
        #[arg(short, long)]
        payload: PathBuf,
        /// Display name to post before the push
        #[arg(short, long)]
        name: Option<String>,
        /// Click the notification afterwards
        #[arg(long)]
        click: bool,
        /// Site origin the worker is registered under
        #[arg(long, default_value = "https://spoilmevintage.com/")]
        origin: String,
    },

    /// Run page-side push setup with a known device token and save it
    Subscribe {
        #[arg(long)]
        user_id: String,
        /// Token the messaging backend should hand out
        #[arg(long)]
        device_token: String,
        /// Display name posted to the worker
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long, default_value = "https://spoilmevintage.com/")]
        origin: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(LogConfig::for_cli(cli.verbose, cli.log_format));

    let config = AppConfig::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Send {
            target,
            value,
            title,
            body,
            image,
            link,
        } => {
            let target = PushTarget::from_parts(&target, value.as_deref())
                .map_err(SpoilMeError::InvalidArgument)?;
            let mut request = AdminPushRequest::new(target, title, body);
            request.image_url = image;
            request.link = link;

            let dispatcher = dispatcher(&config)?;
            let outcome = dispatcher.send(&request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::NotifyAdmins {
            title,
            body,
            user_id,
        } => {
            let dispatcher = dispatcher(&config)?;
            let response = dispatcher.notify_admins(&title, &body, &user_id).await?;
            println!("{response}");
        }

        Commands::NotifyUser {
            user_id,
            title,
            message,
            action_url,
        } => {
            let record = NotificationRecord {
                user_id,
                title,
                message,
                action_url,
            };
            let outcome = user_notifier(&config)?.notify(&record).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Simulate {
            payload,
            name,
            click,
            origin,
        } => {
            let payload = load_payload(&payload)?;
            simulate(&config, &origin, payload, name.as_deref(), click).await?;
        }

        Commands::Subscribe {
            user_id,
            device_token,
            name,
            origin,
        } => {
            let origin = url::Url::parse(&origin).context("parsing --origin")?;
            let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
            let store = DatabaseTokenStore(SupabaseTokenSource::from_config(client, &config)?);
            let (container, _events) = ServiceWorkerContainer::new(config.worker.clone());
            let registrar = PushRegistrar::new(
                container,
                config.worker.clone(),
                origin,
                Some(FixedToken(device_token)),
                store,
            );

            match registrar.ensure_push_registered(&user_id, name.as_deref()).await {
                Ok(token) => println!("{}", json!({ "ok": true, "token": token })),
                Err(e) => {
                    error!(error = %e, "Push setup failed");
                    println!("{}", json!({ "ok": false, "reason": e.reason() }));
                }
            }
        }
    }

    Ok(())
}

fn dispatcher(config: &AppConfig) -> anyhow::Result<PushDispatcher<SupabaseTokenSource>> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let tokens = SupabaseTokenSource::from_config(client.clone(), config)?;
    let dispatcher = PushDispatcher::new(tokens, client, &config.fcm);
    if dispatcher.is_dry_run() {
        info!("Running without FCM_SERVER_KEY; nothing will be sent");
    }
    Ok(dispatcher)
}

fn user_notifier(
    config: &AppConfig,
) -> anyhow::Result<UserNotifier<SupabaseTokenSource, ServiceAccountAuth>> {
    let key = config
        .fcm
        .service_account
        .clone()
        .ok_or_else(|| SpoilMeError::config("FIREBASE_SERVICE_ACCOUNT is not set"))?;
    let project_id = config
        .fcm
        .project_id()
        .ok_or_else(|| SpoilMeError::config("no Firebase project id"))?
        .to_string();

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let tokens = SupabaseTokenSource::from_config(client.clone(), config)?;
    let auth = ServiceAccountAuth::new(client.clone(), key);
    let fcm = FcmV1Client::new(client, &config.fcm.v1_endpoint, &project_id, auth)?;
    Ok(UserNotifier::new(tokens, fcm))
}

/// Messaging backend that grants permission and issues one fixed token.
struct FixedToken(String);

#[async_trait]
impl MessagingBackend for FixedToken {
    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn get_token(
        &self,
        _vapid_key: &str,
        _scope: &str,
    ) -> Result<Option<String>, PushSetupError> {
        Ok(Some(self.0.clone()))
    }
}

/// Saves device tokens on the user's row.
struct DatabaseTokenStore(SupabaseTokenSource);

#[async_trait]
impl TokenStore for DatabaseTokenStore {
    async fn save_token(&self, user_id: &str, token: &str) -> Result<(), PushSetupError> {
        self.0
            .store_user_token(user_id, token)
            .await
            .map_err(|e| PushSetupError::Failed(e.to_string()))
    }
}

fn load_payload(path: &Path) -> spoilme_common::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| SpoilMeError::InvalidArgument(format!("{}: {e}", path.display())))
}

async fn simulate(
    config: &AppConfig,
    origin: &str,
    payload: Value,
    name: Option<&str>,
    click: bool,
) -> anyhow::Result<()> {
    let (container, mut events) = ServiceWorkerContainer::new(config.worker.clone());
    let script = format!("{}/sw.js", origin.trim_end_matches('/'));
    let scope = container.register(&script, Some("/")).await?;

    if let Ok(ContainerEvent::Lifecycle { signal, .. }) = events.try_recv() {
        info!(?signal, "Worker lifecycle");
    }

    container.post_user_data(&scope, name).await?;
    if let Err(e) = container.deliver_push(&scope, payload).await {
        error!(error = %e, "Push handler failed");
        return Err(e.into());
    }

    let shown = container.notifications(&scope).await?;
    let Some(notification) = shown.last() else {
        anyhow::bail!("worker showed no notification");
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "title": notification.title,
            "options": notification.options,
        }))?
    );

    if click {
        container.click_notification(&scope, notification.id).await?;
        let clients = container.clients(&scope).await?;
        let clients = clients.read().await;
        for client in clients.match_all(&ClientMatchOptions::windows()) {
            println!("window {} focused={}", client.url, client.focused);
        }
    }

    Ok(())
}
