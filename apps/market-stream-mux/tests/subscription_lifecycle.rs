//! Subscription Lifecycle Integration Tests
//!
//! Reference counting and wire-frame suppression through the public facade,
//! with the real supervisor driving an in-memory transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use serde_json::json;

use common::{
    MockTransport, connected_mux, count, counting_listener, eventually, fast_config, settle,
};
use market_stream_mux::{ConnectionState, Listener, Params, StreamMultiplexer};

fn btc_book() -> Params {
    Params::new().with("coin", "BTC")
}

#[tokio::test]
async fn test_two_callers_share_one_wire_subscription() {
    let (mux, link, _task) = connected_mux(fast_config()).await;

    let first = mux.subscribe("l2Book", btc_book(), Listener::new(|_| {}));
    let second = mux.subscribe("l2Book", btc_book(), Listener::new(|_| {}));
    assert_eq!(mux.ref_count("l2Book", &btc_book()), 2);

    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);
    settle().await;
    assert_eq!(
        link.control_frames("subscribe"),
        vec![json!({"type": "l2Book", "coin": "BTC"})]
    );

    drop(first);
    settle().await;
    assert!(link.control_frames("unsubscribe").is_empty());

    drop(second);
    assert!(eventually(|| link.control_frames("unsubscribe").len() == 1).await);
    settle().await;

    assert_eq!(link.control_frames("subscribe").len(), 1);
    assert_eq!(
        link.control_frames("unsubscribe"),
        vec![json!({"type": "l2Book", "coin": "BTC"})]
    );
    assert_eq!(mux.ref_count("l2Book", &btc_book()), 0);
}

#[tokio::test]
async fn test_repeated_cycles_alternate_on_the_wire() {
    let (mux, link, _task) = connected_mux(fast_config()).await;

    for _ in 0..5 {
        let a = mux.subscribe("trades", Params::new().with("coin", "ETH"), Listener::new(|_| {}));
        let b = mux.subscribe("trades", Params::new().with("coin", "ETH"), Listener::new(|_| {}));
        drop(a);
        drop(b);
    }

    assert!(eventually(|| link.control_log().len() == 10).await);
    settle().await;

    let methods: Vec<String> = link.control_log().into_iter().map(|(m, _)| m).collect();
    assert_eq!(methods.len(), 10);
    for pair in methods.chunks(2) {
        assert_eq!(pair, ["subscribe", "unsubscribe"]);
    }
}

#[tokio::test]
async fn test_duplicate_registration_delivers_once() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let (listener, seen) = counting_listener();

    let owner = mux.subscribe("l2Book", btc_book(), listener.clone());
    let duplicate = mux.subscribe("l2Book", btc_book(), listener);
    assert!(owner.is_owner());
    assert!(!duplicate.is_owner());
    assert_eq!(mux.ref_count("l2Book", &btc_book()), 1);

    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);
    link.push_data("l2Book", &json!({"coin": "BTC", "time": 1, "levels": [[], []]}));

    assert!(eventually(|| count(&seen) == 1).await);
    settle().await;
    assert_eq!(count(&seen), 1);

    // Dropping the inert duplicate leaves the registration in place.
    drop(duplicate);
    settle().await;
    assert_eq!(mux.ref_count("l2Book", &btc_book()), 1);
    assert!(link.control_frames("unsubscribe").is_empty());
    drop(owner);
}

#[tokio::test]
async fn test_explicit_unsubscribe_matches_handle_release() {
    let (mux, link, _task) = connected_mux(fast_config()).await;
    let listener = Listener::new(|_| {});

    mux.subscribe("l2Book", btc_book(), listener.clone()).detach();
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);

    assert!(mux.unsubscribe("l2Book", &btc_book(), &listener));
    assert!(!mux.unsubscribe("l2Book", &btc_book(), &listener));

    assert!(eventually(|| link.control_frames("unsubscribe").len() == 1).await);
    settle().await;
    assert_eq!(link.control_frames("unsubscribe").len(), 1);
}

#[tokio::test]
async fn test_commands_before_first_connect_are_flushed() {
    let (transport, link) = MockTransport::new();
    let (mux, supervisor) = StreamMultiplexer::new(fast_config(), transport);

    let _book = mux.subscribe("l2Book", btc_book(), Listener::new(|_| {}));
    let released = mux.subscribe("l2Book", Params::new().with("coin", "SOL"), Listener::new(|_| {}));
    drop(released);
    assert_eq!(mux.connection_state(), ConnectionState::Disconnected);

    let _task = tokio::spawn(supervisor.run());
    assert!(eventually(|| mux.connection_state() == ConnectionState::Connected).await);
    assert!(eventually(|| !link.control_log().is_empty()).await);
    settle().await;

    // The SOL key came and went before any connection existed.
    assert_eq!(
        link.control_log(),
        vec![(
            "subscribe".to_string(),
            json!({"type": "l2Book", "coin": "BTC"})
        )]
    );
}

#[tokio::test]
async fn test_subscribe_json_uses_the_same_key() {
    let (mux, link, _task) = connected_mux(fast_config()).await;

    let typed = mux.subscribe(
        "candle",
        Params::new().with("coin", "BTC").with("interval", "1m"),
        Listener::new(|_| {}),
    );
    let loose = mux
        .subscribe_json(
            &json!({"interval": "1m", "type": "candle", "coin": "BTC"}),
            Listener::new(|_| {}),
        )
        .unwrap();

    assert_eq!(typed.key(), loose.key());
    assert!(eventually(|| link.control_frames("subscribe").len() == 1).await);
    settle().await;
    assert_eq!(link.control_frames("subscribe").len(), 1);
}

#[tokio::test]
async fn test_subscribe_json_rejects_nested_params() {
    let (mux, _link, _task) = connected_mux(fast_config()).await;

    let result = mux.subscribe_json(
        &json!({"type": "l2Book", "coin": {"nested": true}}),
        Listener::new(|_| {}),
    );

    assert!(result.is_err());
    assert_eq!(mux.stats().keys, 0);
}
