//! End-to-end flow through the container: register, personalize, push,
//! click, and update.

use serde_json::json;
use spoilme_core::config::WorkerConfig;
use spoilme_sw::{
    ContainerEvent, LifecycleSignal, ScopedUpdater, ServiceWorkerContainer, ServiceWorkerState,
    UpdateNotifier,
};

const SCRIPT: &str = "https://spoilme.example/firebase-messaging-sw.js";

async fn registered() -> (ServiceWorkerContainer, String) {
    let (container, _events) = ServiceWorkerContainer::new(WorkerConfig::default());
    let scope = container.register(SCRIPT, None).await.unwrap();
    (container, scope)
}

#[tokio::test]
async fn personalizes_with_posted_name() {
    let (container, scope) = registered().await;

    container.post_user_data(&scope, Some("Alice")).await.unwrap();
    container
        .deliver_push(
            &scope,
            json!({ "notification": { "title": "Hey user!", "body": "Welcome valued customer" } }),
        )
        .await
        .unwrap();

    let shown = container.notifications(&scope).await.unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Hey Alice!");
    assert_eq!(shown[0].options.body, "Welcome Alice");
    assert_eq!(shown[0].options.icon.as_deref(), Some("/icons/icon-192x192.png"));
}

#[tokio::test]
async fn falls_back_to_default_name() {
    let (container, scope) = registered().await;

    container
        .deliver_push(
            &scope,
            json!({ "notification": { "title": "Hello user", "body": "New drop" } }),
        )
        .await
        .unwrap();

    let shown = container.notifications(&scope).await.unwrap();
    assert_eq!(shown[0].title, "Hello valued customer");
}

#[tokio::test]
async fn click_focuses_matching_window() {
    let (container, scope) = registered().await;
    let home = container.open_page(&scope, "/").await.unwrap();
    let order = container.open_page(&scope, "/orders/5").await.unwrap();

    container
        .deliver_push(
            &scope,
            json!({
                "notification": { "title": "Shipped", "body": "Your order is on its way" },
                "data": { "url": "/orders/5" }
            }),
        )
        .await
        .unwrap();
    let id = container.notifications(&scope).await.unwrap()[0].id;

    container.click_notification(&scope, id).await.unwrap();

    let clients = container.clients(&scope).await.unwrap();
    let clients = clients.read().await;
    assert_eq!(clients.len(), 2, "no new window opened");
    assert!(clients.get(&order.id).unwrap().focused);
    assert!(!clients.get(&home.id).unwrap().focused);
    drop(clients);

    assert!(container.notifications(&scope).await.unwrap().is_empty());
}

#[tokio::test]
async fn click_opens_window_when_none_matches() {
    let (container, scope) = registered().await;
    container.open_page(&scope, "/shop").await.unwrap();

    container
        .deliver_push(&scope, json!({ "notification": { "title": "t", "body": "b" } }))
        .await
        .unwrap();
    let id = container.notifications(&scope).await.unwrap()[0].id;
    container.click_notification(&scope, id).await.unwrap();

    let clients = container.clients(&scope).await.unwrap();
    let windows: Vec<_> = clients
        .read()
        .await
        .match_all(&spoilme_sw::ClientMatchOptions::windows());
    assert_eq!(windows.len(), 2);
    let opened = windows.last().unwrap();
    assert_eq!(opened.url.as_str(), "https://spoilme.example/");
    assert!(opened.focused);
}

#[tokio::test]
async fn odd_data_block_is_shown_and_opens_root() {
    let (container, scope) = registered().await;

    container
        .deliver_push(
            &scope,
            json!({
                "notification": { "title": "t", "body": "b", "image": "" },
                "data": { "url": 5, "ref": null }
            }),
        )
        .await
        .unwrap();
    let shown = container.notifications(&scope).await.unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].options.icon.as_deref(), Some("/icons/icon-192x192.png"));
    assert_eq!(
        serde_json::to_value(&shown[0].options.data).unwrap(),
        json!({ "url": 5, "ref": null })
    );

    container.click_notification(&scope, shown[0].id).await.unwrap();
    let clients = container.clients(&scope).await.unwrap();
    let windows = clients
        .read()
        .await
        .match_all(&spoilme_sw::ClientMatchOptions::windows());
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].url.as_str(), "https://spoilme.example/");
}

#[tokio::test]
async fn malformed_push_is_reported_and_worker_survives() {
    let (container, scope) = registered().await;

    let err = container
        .deliver_push(&scope, json!({ "notification": { "body": "no title" } }))
        .await
        .unwrap_err();
    assert!(matches!(err, spoilme_sw::ServiceWorkerError::ScriptError(_)));

    container
        .deliver_push(&scope, json!({ "notification": { "title": "ok", "body": "ok" } }))
        .await
        .unwrap();
    assert_eq!(container.notifications(&scope).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_prompt_follows_registration() {
    let (container, mut events) = ServiceWorkerContainer::new(WorkerConfig::default());
    let scope = container.register(SCRIPT, None).await.unwrap();
    let mut notifier = UpdateNotifier::new(ScopedUpdater::new(container.clone(), scope.clone()));

    let apply = |notifier: &mut UpdateNotifier<ScopedUpdater>, event: ContainerEvent| {
        if let ContainerEvent::Lifecycle { signal, .. } = event {
            notifier.on_signal(signal);
        }
    };

    apply(&mut notifier, events.recv().await.unwrap());
    assert!(!notifier.is_visible(), "fresh install shows no prompt");

    container.post_user_data(&scope, Some("Alice")).await.unwrap();
    container.register(SCRIPT, None).await.unwrap();
    apply(&mut notifier, events.recv().await.unwrap());
    assert!(notifier.is_visible());
    assert_eq!(notifier.signals().last, Some(LifecycleSignal::NeedRefresh));

    notifier.refresh_now().await;
    assert!(!notifier.is_visible());
    assert_eq!(
        events.recv().await,
        Some(ContainerEvent::ControllerChange {
            scope: scope.clone()
        })
    );
    assert_eq!(
        container.worker_states(&scope).await.unwrap(),
        [None, None, Some(ServiceWorkerState::Activated)]
    );

    // The new worker starts with an empty name cache.
    container
        .deliver_push(&scope, json!({ "notification": { "title": "Hi user", "body": "" } }))
        .await
        .unwrap();
    let shown = container.notifications(&scope).await.unwrap();
    assert_eq!(shown.last().unwrap().title, "Hi valued customer");
}

#[tokio::test]
async fn refresh_failure_is_swallowed() {
    let (container, scope) = registered().await;
    let mut notifier = UpdateNotifier::new(ScopedUpdater::new(container.clone(), "missing-scope"));
    notifier.on_signal(LifecycleSignal::NeedRefresh);

    notifier.refresh_now().await;
    assert!(!notifier.is_visible());
    assert_eq!(container.get_registrations().await, vec![scope]);
}
