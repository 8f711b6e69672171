//! Integration tests for session lifecycle and per-session property overlays.

use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use syscontext::domain::{ConfigurationItem, RecordId, SessionStatus};
use syscontext::SystemContext;

mod common;
use common::{app, item, new_context};

struct Running {
    context: SystemContext,
    item: ConfigurationItem,
    session: RecordId,
    other_session: RecordId,
}

async fn running() -> Running {
    let context = new_context();
    let shop = app(&context, "shop").await;
    let root = item(&context, shop.id, "app", "x", None).await;
    let theme = item(&context, shop.id, "theme", "light", Some(root.id)).await;

    let installation = context.install_app(shop.id, "host-1").await.unwrap();
    let now = Utc::now();
    let session = context.start_session(installation.id, now).await.unwrap();
    let other = context.start_session(installation.id, now).await.unwrap();

    Running {
        context,
        item: theme,
        session: session.id,
        other_session: other.id,
    }
}

#[tokio::test]
async fn test_upsert_twice_keeps_one_property() {
    let Running {
        context,
        item,
        session,
        other_session,
    } = running().await;
    let t1 = Utc::now();

    context
        .update_property_state(session, item.id, "k", "v1", t1)
        .await
        .unwrap();
    context
        .update_property_state(session, item.id, "k", "v2", t1 + Duration::seconds(1))
        .await
        .unwrap();

    let states = context.session_states(session).await.unwrap();
    assert_eq!(states.len(), 1);
    let properties = context.property_states(states[0].id).await.unwrap();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].property_value, "v2");

    let state = context.item_state(item.id, session).await.unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state["k"], "v2");

    assert!(context.item_state(item.id, other_session).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overlay_leaves_static_configuration_alone() {
    let Running {
        context,
        item,
        session,
        ..
    } = running().await;

    context
        .update_property_state(session, item.id, "theme", "dark", Utc::now())
        .await
        .unwrap();

    let config = context.app_configuration(item.application).await.unwrap();
    assert_eq!(config["app.theme"], "light");
    assert_eq!(
        context.property_state("THEME", item.id, session).await.unwrap(),
        Some("dark".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_same_pair() {
    let Running {
        context,
        item,
        session,
        ..
    } = running().await;
    let context = Arc::new(context);
    let item_id = item.id;
    let now = Utc::now();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                context
                    .update_property_state(session, item_id, "counter", &i.to_string(), now)
                    .await
            })
        })
        .collect();

    for result in join_all(handles).await {
        result.expect("task panicked").unwrap();
    }

    let states = context.session_states(session).await.unwrap();
    assert_eq!(states.len(), 1, "exactly one state per (session, item)");
    let properties = context.property_states(states[0].id).await.unwrap();
    assert_eq!(properties.len(), 1, "exactly one property per key");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_distinct_keys() {
    let Running {
        context,
        item,
        session,
        ..
    } = running().await;
    let context = Arc::new(context);
    let item_id = item.id;
    let now = Utc::now();

    let writes = (0..8).map(|i| {
        let context = Arc::clone(&context);
        async move {
            context
                .update_property_state(session, item_id, &format!("key{i}"), "v", now)
                .await
        }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    assert_eq!(context.item_state(item_id, session).await.unwrap().len(), 8);
    assert_eq!(context.session_states(session).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_once() {
    let Running {
        context, session, ..
    } = running().await;
    let closed_at = Utc::now() + Duration::minutes(10);

    assert!(context.shutdown_session(session, closed_at).await.unwrap());
    assert!(
        !context
            .shutdown_session(session, closed_at + Duration::minutes(1))
            .await
            .unwrap()
    );

    let model = context.app_session_model(session).await.unwrap();
    assert_eq!(model.sessions.len(), 1);
    assert_eq!(model.sessions[&session].status, SessionStatus::Closed { closed_at });
}
