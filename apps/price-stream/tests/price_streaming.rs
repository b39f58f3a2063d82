//! Price Streaming Integration Tests
//!
//! Frames pushed through a scripted feed must come out as price update
//! events, with previous prices tracked across frames and reconnects.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::time::Duration;

use common::{FEED_URL, ScriptedTransport, drain_states, next_price, test_config, wait_closed};
use futures_util::StreamExt;
use price_stream::{ConnectionController, ConnectionState, PriceDirection};

#[tokio::test]
async fn first_price_is_unchanged_then_direction_follows() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut prices = controller.price_updates();

    controller.subscribe(["bitcoin"]).await.unwrap();
    let feed = transport.latest();

    feed.send_frame(r#"{"bitcoin":"100.0"}"#);
    let first = next_price(&mut prices).await;
    assert_eq!(first.symbol(), "bitcoin");
    assert_eq!(first.price(), 100.0);
    assert_eq!(first.previous_price(), 100.0);
    assert_eq!(first.direction(), PriceDirection::Unchanged);

    feed.send_frame(r#"{"bitcoin":"105.0"}"#);
    let second = next_price(&mut prices).await;
    assert_eq!(second.price(), 105.0);
    assert_eq!(second.previous_price(), 100.0);
    assert_eq!(second.direction(), PriceDirection::Up);
    assert_eq!(second.change(), 5.0);

    assert_eq!(controller.last_price("bitcoin"), Some(105.0));
}

#[tokio::test]
async fn multi_symbol_frame_emits_one_event_per_field() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut prices = controller.price_updates();

    controller.subscribe(["bitcoin", "ethereum"]).await.unwrap();
    transport
        .latest()
        .send_frame(r#"{"ethereum":"3000.5","bitcoin":"65000"}"#);

    let first = next_price(&mut prices).await;
    let second = next_price(&mut prices).await;
    assert_eq!(first.symbol(), "ethereum");
    assert_eq!(first.price(), 3000.5);
    assert_eq!(second.symbol(), "bitcoin");
    assert_eq!(second.price(), 65000.0);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_state_change() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    controller.subscribe(["bitcoin", "ethereum"]).await.unwrap();
    let mut prices = controller.price_updates();
    let mut transitions = controller.state_transitions();
    let feed = transport.latest();

    feed.send_frame("not json");
    feed.send_frame("[1, 2, 3]");
    feed.send_frame(r#"{"bitcoin":"abc","ethereum":"10"}"#);
    feed.send_frame(r#"{"bitcoin":"1"}"#);

    let ethereum = next_price(&mut prices).await;
    assert_eq!(ethereum.symbol(), "ethereum");
    assert_eq!(ethereum.price(), 10.0);

    // The bad bitcoin field never reached the book.
    let bitcoin = next_price(&mut prices).await;
    assert_eq!(bitcoin.symbol(), "bitcoin");
    assert_eq!(bitcoin.previous_price(), 1.0);
    assert_eq!(bitcoin.direction(), PriceDirection::Unchanged);

    assert!(prices.try_recv().is_none());
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert!(drain_states(&mut transitions).is_empty());

    let stats = controller.stats();
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.fields_skipped, 1);
}

#[tokio::test]
async fn resubscribing_watched_symbol_is_a_no_op() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    controller.subscribe(["bitcoin"]).await.unwrap();
    let mut transitions = controller.state_transitions();

    let changes = controller.subscribe(["BITCOIN", " bitcoin "]).await.unwrap();

    assert!(changes.is_empty());
    assert_eq!(transport.open_calls(), 1);
    assert!(drain_states(&mut transitions).is_empty());
    assert!(!transport.latest().is_closed());
}

#[tokio::test]
async fn new_symbol_forces_reconnect_with_full_set() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut prices = controller.price_updates();
    controller.subscribe(["bitcoin"]).await.unwrap();
    let old_feed = transport.latest();

    old_feed.send_frame(r#"{"bitcoin":"100"}"#);
    next_price(&mut prices).await;

    let mut transitions = controller.state_transitions();
    let changes = controller.subscribe(["ethereum"]).await.unwrap();

    assert_eq!(changes.added, vec!["ethereum"]);
    assert_eq!(
        transport.opened_urls(),
        vec![
            format!("{FEED_URL}?assets=bitcoin"),
            format!("{FEED_URL}?assets=bitcoin,ethereum"),
        ]
    );
    assert_eq!(
        drain_states(&mut transitions),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    wait_closed(&old_feed).await;

    // Frames from the replaced connection are not delivered.
    old_feed.send_frame(r#"{"bitcoin":"1"}"#);

    // Previous prices survive a forced reconnect.
    transport.latest().send_frame(r#"{"bitcoin":"90"}"#);
    let event = next_price(&mut prices).await;
    assert_eq!(event.price(), 90.0);
    assert_eq!(event.previous_price(), 100.0);
    assert_eq!(event.direction(), PriceDirection::Down);
}

#[tokio::test]
async fn unsubscribe_forgets_removed_symbol_prices() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut prices = controller.price_updates();
    controller.subscribe(["bitcoin", "ethereum"]).await.unwrap();

    transport
        .latest()
        .send_frame(r#"{"bitcoin":"100","ethereum":"10"}"#);
    next_price(&mut prices).await;
    next_price(&mut prices).await;

    controller.unsubscribe(["ethereum"]).await.unwrap();

    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(
        transport.opened_urls().last().unwrap(),
        &format!("{FEED_URL}?assets=bitcoin")
    );
    assert_eq!(controller.last_price("ethereum"), None);
    assert_eq!(controller.last_price("bitcoin"), Some(100.0));

    controller.subscribe(["ethereum"]).await.unwrap();
    transport.latest().send_frame(r#"{"ethereum":"12"}"#);

    let event = next_price(&mut prices).await;
    assert_eq!(event.previous_price(), 12.0);
    assert_eq!(event.direction(), PriceDirection::Unchanged);
}

#[tokio::test]
async fn disconnect_clears_price_history() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut prices = controller.price_updates();
    controller.subscribe(["bitcoin"]).await.unwrap();

    transport.latest().send_frame(r#"{"bitcoin":"100"}"#);
    next_price(&mut prices).await;

    controller.disconnect().await.unwrap();
    assert_eq!(controller.last_price("bitcoin"), None);

    controller.connect().await.unwrap();
    transport.latest().send_frame(r#"{"bitcoin":"120"}"#);

    let event = next_price(&mut prices).await;
    assert_eq!(event.previous_price(), 120.0);
}

#[tokio::test]
async fn every_observer_receives_each_update() {
    let transport = ScriptedTransport::accepting();
    let controller = ConnectionController::spawn(transport.clone(), test_config(3));
    let mut first = controller.price_updates();
    let mut second = controller.price_updates().into_stream();

    assert_eq!(controller.broadcast_stats().price_receivers, 2);

    controller.subscribe(["solana"]).await.unwrap();
    transport.latest().send_frame(r#"{"solana":"150.25"}"#);

    let a = next_price(&mut first).await;
    let b = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("stream observer timed out")
        .unwrap();
    assert_eq!(a, b);
}
