//! Fail-fast publishing and generation-scoped channels
//!
//! Publishing never waits for a connection and never succeeds on a channel
//! from a generation that has since been lost.


use futures::future::join_all;
use resilient_bus::bus::{ChannelRegistry, ConnectionState};
use resilient_bus::testing::MockBroker;
use std::time::{Duration, Instant};
use test_helpers::{
    client_for, fast_options, open_client, test_event, wait_for_new_generation, wait_for_state,
};

#[tokio::test]
async fn test_publish_before_start_fails_immediately() {
    let broker = MockBroker::new();
    let client = client_for(&broker, fast_options("not-started"));

    let err = client.publish(&test_event(1)).await.unwrap_err();
    assert!(err.is_channel_unavailable());
    match err {
        resilient_bus::PublishError::ChannelUnavailable(unavailable) => {
            assert_eq!(unavailable.state, ConnectionState::Closed);
            assert_eq!(unavailable.current_generation, 0);
        }
        other => panic!("expected ChannelUnavailable, got {other}"),
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_publish_while_open_hangs_does_not_wait() {
    let broker = MockBroker::new();
    broker.set_open_hang(true);
    let mut options = fast_options("hanging-open");
    options.open_timeout = Duration::from_secs(30);
    let client = client_for(&broker, options);
    client.start().await.unwrap();
    assert!(wait_for_state(&client, ConnectionState::Connecting).await);

    let started = Instant::now();
    let err = client.publish(&test_event(1)).await.unwrap_err();
    assert!(err.is_channel_unavailable());
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "publish must not wait for the connection, took {:?}",
        started.elapsed()
    );

    client.stop().await;
}

#[tokio::test]
async fn test_channel_from_lost_generation_never_validates_again() {
    let broker = MockBroker::new();
    let client = open_client(&broker, "stale-channel").await;
    let registry = ChannelRegistry::new(client.manager().clone());

    let channel = registry.obtain().unwrap();
    assert!(registry.is_valid(&channel));

    broker.stop();
    broker.start();
    let generation = wait_for_new_generation(&client, channel.generation())
        .await
        .expect("client should reconnect");

    let err = registry.validate(&channel).unwrap_err();
    assert_eq!(err.channel_generation, Some(channel.generation()));
    assert_eq!(err.current_generation, generation);
    assert_eq!(err.state, ConnectionState::Open);

    let fresh = registry.obtain().unwrap();
    assert_eq!(fresh.generation(), generation);
    assert!(registry.is_valid(&fresh));

    client.stop().await;
}

#[tokio::test]
async fn test_concurrent_publishes_during_outage_never_hang() {
    let broker = MockBroker::new();
    let client = open_client(&broker, "outage-fanout").await;

    let messages: Vec<_> = (0..50).map(test_event).collect();
    broker.stop();
    let results = tokio::time::timeout(
        Duration::from_secs(1),
        join_all(messages.iter().map(|message| client.publish(message))),
    )
    .await
    .expect("publishes must settle without waiting for the broker");

    for result in results {
        if let Err(err) = result {
            assert!(err.is_channel_unavailable(), "unexpected error: {err}");
        }
    }

    // Once the close is processed nothing more gets through
    assert!(wait_for_state(&client, ConnectionState::Connecting).await);
    let delivered_before = broker.published().len();
    let err = client.publish(&test_event(1000)).await.unwrap_err();
    assert!(err.is_channel_unavailable());
    assert_eq!(broker.published().len(), delivered_before);

    client.stop().await;
}

#[tokio::test]
async fn test_publish_after_stop_is_rejected() {
    let broker = MockBroker::new();
    let client = open_client(&broker, "stopped").await;
    client.stop().await;

    let err = client.publish(&test_event(1)).await.unwrap_err();
    assert!(err.is_channel_unavailable());
    assert_eq!(client.current_state(), ConnectionState::Closing);
}
