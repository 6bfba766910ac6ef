//! Identity Rebind Integration Tests
//!
//! Changing the active identity re-parameterises identity-scoped
//! subscriptions on the wire and leaves everything else alone.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use serde_json::json;

use common::{connected_mux, count, counting_listener, eventually, fast_config, settle};
use market_stream_mux::{ConnectionState, Listener, NO_IDENTITY, Params};

#[tokio::test]
async fn test_identity_change_rebinds_only_scoped_keys() {
    let (mux, link, _task) = connected_mux(fast_config()).await;

    let _web = mux.add_listener("webData2", Listener::new(|_| {}));
    let _mids = mux.add_listener("allMids", Listener::new(|_| {}));
    assert!(eventually(|| link.control_frames("subscribe").len() == 2).await);
    assert!(
        link.control_frames("subscribe")
            .contains(&json!({"type": "webData2", "user": NO_IDENTITY}))
    );
    settle().await;
    link.clear_sent();

    assert!(mux.update_active_identity(Some("0xABC")));

    assert!(eventually(|| link.control_log().len() == 2).await);
    settle().await;
    assert_eq!(
        link.control_log(),
        vec![
            (
                "unsubscribe".to_string(),
                json!({"type": "webData2", "user": NO_IDENTITY})
            ),
            (
                "subscribe".to_string(),
                json!({"type": "webData2", "user": "0xabc"})
            ),
        ]
    );
}

#[tokio::test]
async fn test_unchanged_identity_sends_nothing() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let _fills = mux.subscribe("userFills", Params::new().with_active_user(), Listener::new(|_| {}));
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);

    assert!(mux.update_active_identity(Some("0xabc")));
    assert!(eventually(|| link.control_log().len() == 3).await);
    settle().await;
    link.clear_sent();

    assert!(!mux.update_active_identity(Some("0xABC")));
    settle().await;
    assert!(link.control_log().is_empty());
    assert_eq!(mux.active_identity().address(), Some("0xabc"));
}

#[tokio::test]
async fn test_literal_user_param_is_not_rebound() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let _pinned = mux.subscribe(
        "userFills",
        Params::new().with("user", "0x1111111111111111111111111111111111111111"),
        Listener::new(|_| {}),
    );
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);
    settle().await;
    link.clear_sent();

    mux.update_active_identity(Some("0xabc"));
    settle().await;

    assert!(link.control_log().is_empty());
}

#[tokio::test]
async fn test_identity_change_while_disconnected_applies_on_replay() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let _web = mux.add_listener("webData2", Listener::new(|_| {}));
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);

    link.set_refuse(true);
    link.drop_connection();
    assert!(eventually(|| mux.connection_state() == ConnectionState::Reconnecting).await);
    link.clear_sent();

    mux.update_active_identity(Some("0xDEF"));
    link.set_refuse(false);

    assert!(eventually(|| link.connects() == 2).await);
    assert!(eventually(|| !link.control_log().is_empty()).await);
    settle().await;

    assert_eq!(
        link.control_log(),
        vec![(
            "subscribe".to_string(),
            json!({"type": "webData2", "user": "0xdef"})
        )]
    );
}

#[tokio::test]
async fn test_scoped_frames_route_by_active_identity() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let (listener, seen) = counting_listener();
    let _web = mux.add_listener("webData2", listener);
    mux.update_active_identity(Some("0xabc"));
    assert!(
        eventually(|| link
            .control_frames("subscribe")
            .contains(&json!({"type": "webData2", "user": "0xabc"})))
        .await
    );

    link.push_data("webData2", &json!({"user": "0xABC", "clearinghouseState": {}}));
    link.push_data("webData2", &json!({"user": "0xdef", "clearinghouseState": {}}));

    assert!(eventually(|| count(&seen) == 1).await);
    settle().await;
    assert_eq!(count(&seen), 1);
}

#[tokio::test]
async fn test_user_channel_reaches_user_events_listeners() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let (listener, seen) = counting_listener();
    let _events = mux.add_listener("userEvents", listener.clone());
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);

    link.push_data("user", &json!({"fills": []}));
    assert!(eventually(|| count(&seen) == 1).await);

    assert!(mux.remove_listener("userEvents", &listener));
    assert!(eventually(|| link.control_frames("unsubscribe").len() == 1).await);
}

#[tokio::test]
async fn test_scoped_and_literal_keys_share_one_wire_subscription() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    assert!(mux.update_active_identity(Some("0xabc")));

    let scoped = mux.add_listener("webData2", Listener::new(|_| {}));
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);

    let literal = mux.subscribe(
        "webData2",
        Params::new().with("user", "0xabc"),
        Listener::new(|_| {}),
    );
    settle().await;
    assert_eq!(
        link.control_frames("subscribe"),
        vec![json!({"type": "webData2", "user": "0xabc"})]
    );

    drop(literal);
    settle().await;
    assert!(link.control_frames("unsubscribe").is_empty());
    assert_eq!(mux.ref_count("webData2", &Params::new().with_active_user()), 1);

    drop(scoped);
    assert!(eventually(|| link.control_frames("unsubscribe").len() == 1).await);
    settle().await;
    assert_eq!(
        link.control_frames("unsubscribe"),
        vec![json!({"type": "webData2", "user": "0xabc"})]
    );
}

#[tokio::test]
async fn test_rebind_onto_literal_object_keeps_it_subscribed() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let _pinned = mux.subscribe(
        "webData2",
        Params::new().with("user", "0xdef"),
        Listener::new(|_| {}),
    );
    let _web = mux.add_listener("webData2", Listener::new(|_| {}));
    assert!(eventually(|| link.control_frames("subscribe").len() == 2).await);
    settle().await;
    link.clear_sent();

    // The scoped key now resolves to the object the literal key already holds.
    assert!(mux.update_active_identity(Some("0xdef")));
    assert!(eventually(|| link.control_log().len() == 1).await);
    settle().await;
    assert_eq!(
        link.control_log(),
        vec![(
            "unsubscribe".to_string(),
            json!({"type": "webData2", "user": NO_IDENTITY})
        )]
    );
    link.clear_sent();

    assert!(mux.update_active_identity(Some("0xabc")));
    assert!(eventually(|| link.control_log().len() == 1).await);
    settle().await;
    assert_eq!(
        link.control_log(),
        vec![(
            "subscribe".to_string(),
            json!({"type": "webData2", "user": "0xabc"})
        )]
    );
}
