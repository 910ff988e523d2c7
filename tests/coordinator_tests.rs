//! Tests for initial game-phase resolution: the push path racing the REST
//! pull fallback.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use treasure_hunt_client::cache::{self, keys, MemoryCache};
use treasure_hunt_client::coordinator::{resolve_initial_phase, PhaseSource};
use treasure_hunt_client::types::GamePhase;
use treasure_hunt_client::{BrokerClient, BrokerConfig};

use common::{msg, ConnectScript, MockApi, MockConnector, ScriptItem};

fn fast_config() -> BrokerConfig {
    BrokerConfig::new().with_reconnect_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn push_arriving_in_time_means_no_pull() {
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![
        // Let the subscriptions settle before the snapshot arrives.
        ScriptItem::Wait(Duration::from_millis(50)),
        msg("/app/game/state", &json!({"state": "IN_PROGRESS"})),
    ])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new();
    let cache = MemoryCache::new();

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::InProgress);
    assert_eq!(resolution.via, PhaseSource::Push);
    assert_eq!(api.state_calls.load(Ordering::Relaxed), 0);
    // The resolved phase is persisted.
    assert_eq!(
        cache::load::<GamePhase>(&cache, keys::GAME_STATE),
        Some(GamePhase::InProgress)
    );

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn deadline_expiry_pulls_exactly_once() {
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new();
    api.push_state(Ok(GamePhase::WaitingForPlayers));
    let cache = MemoryCache::new();

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::WaitingForPlayers);
    assert_eq!(resolution.via, PhaseSource::Fallback);
    assert_eq!(api.state_calls.load(Ordering::Relaxed), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn connect_failure_requests_fallback_before_the_deadline() {
    // One failure, then a long backoff: the pull must not wait for the
    // deadline.
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Fail]);
    let config = BrokerConfig::new().with_reconnect_delay(Duration::from_secs(60));
    let (client, mut events) = BrokerClient::start(connector, config);
    let api = MockApi::new();
    api.push_state(Ok(GamePhase::InProgress));
    let cache = MemoryCache::new();

    let resolution = tokio::time::timeout(
        Duration::from_secs(5),
        resolve_initial_phase(&client, &mut events, &api, &cache, Duration::from_secs(60)),
    )
    .await
    .expect("resolution should not wait for the deadline")
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::InProgress);
    assert_eq!(resolution.via, PhaseSource::Fallback);
    assert_eq!(api.state_calls.load(Ordering::Relaxed), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_pull_falls_back_to_the_cached_phase() {
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new(); // empty script: every pull errors
    let cache = MemoryCache::new();
    cache::store(&cache, keys::GAME_STATE, &GamePhase::Finished);

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::Finished);
    assert_eq!(resolution.via, PhaseSource::Fallback);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_pull_with_cold_cache_defaults_to_not_started() {
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new();
    let cache = MemoryCache::new();

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::NotStarted);
    assert_eq!(resolution.via, PhaseSource::Fallback);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn late_push_beats_a_slow_pull() {
    // The push lands after the deadline but before the pull answers.
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![
        ScriptItem::Wait(Duration::from_millis(100)),
        msg("/topic/game/state", &json!("ARRANGING_TEAMS")),
    ])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new();
    api.set_state_delay(Duration::from_millis(500));
    api.push_state(Ok(GamePhase::NotStarted));
    let cache = MemoryCache::new();

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    assert_eq!(resolution.phase, GamePhase::ArrangingTeams);
    assert_eq!(resolution.via, PhaseSource::Push);
    // The fallback was requested exactly once even though the push won.
    assert_eq!(api.state_calls.load(Ordering::Relaxed), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_push_payloads_do_not_resolve() {
    let (connector, _sent, _attempts) = MockConnector::new(vec![ConnectScript::Succeed(vec![
        ScriptItem::Wait(Duration::from_millis(10)),
        msg("/app/game/state", &json!({"unexpected": true})),
    ])]);
    let (client, mut events) = BrokerClient::start(connector, fast_config());
    let api = MockApi::new();
    api.push_state(Ok(GamePhase::WaitingForPlayers));
    let cache = MemoryCache::new();

    let resolution = resolve_initial_phase(
        &client,
        &mut events,
        &api,
        &cache,
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    // The bad payload was ignored and the pull decided.
    assert_eq!(resolution.phase, GamePhase::WaitingForPlayers);
    assert_eq!(resolution.via, PhaseSource::Fallback);

    client.shutdown().await.unwrap();
}
