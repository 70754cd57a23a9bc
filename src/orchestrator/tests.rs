//! Tests for the orchestrator

use super::*;
use crate::config::{AmpType, ApiConfig, DeviceConfig, FeaturesConfig, MeteringConfig};
use crate::device::connection::HEALTH_PATH;
use crate::device::{Credentials, Verb};
use crate::surface::LocalSurface;
use crate::sync::Channel;
use crate::testing::{channel_entry, connected_manager, MockTransport, TEST_HOST, TEST_TOKEN};
use serde_json::{json, Value};

const BULK: &str = "/settings/channel";

fn make_test_config(delay: bool) -> AppConfig {
    AppConfig {
        device: DeviceConfig {
            host: "192.168.1.50".to_string(),
            token: TEST_TOKEN.to_string(),
            amp_type: AmpType::Uma04Poe,
            probe_interval_ms: 500,
            request_timeout_ms: 2000,
        },
        metering: MeteringConfig {
            enabled: true,
            interval_ms: 50,
        },
        features: FeaturesConfig { delay },
        api: ApiConfig::default(),
    }
}

fn options(value: Value) -> OptionValues {
    value.as_object().cloned().unwrap_or_default()
}

async fn make_session(
    transport: &Arc<MockTransport>,
    delay: bool,
) -> (Arc<Orchestrator>, Arc<LocalSurface>) {
    let surface = Arc::new(LocalSurface::new());
    let connection = connected_manager(transport).await;
    let session = Orchestrator::with_connection(make_test_config(delay), connection, surface.clone());
    (session, surface)
}

fn respond_bulk(transport: &MockTransport, mutes: [bool; 4]) {
    let entries: Vec<Value> = mutes
        .iter()
        .map(|&mute| channel_entry(mute, true, -10.0))
        .collect();
    transport.respond(Verb::Get, BULK, 200, Value::Array(entries));
}

#[tokio::test]
async fn test_construction_order_and_catalog() {
    let transport = MockTransport::new();
    let (session, surface) = make_session(&transport, false).await;

    assert_eq!(
        session.synchronizer_names(),
        vec!["mute", "power", "autostandby", "volume"]
    );
    let action_ids: Vec<_> = session
        .definitions()
        .actions
        .iter()
        .map(|a| a.id.as_str())
        .collect();
    assert_eq!(action_ids, vec!["mute_ch", "power_ch", "autostandby_ch", "volume_ch"]);
    assert_eq!(surface.definitions().feedbacks.len(), 2);
    assert_eq!(surface.definitions().variables.len(), 16);
}

#[tokio::test]
async fn test_delay_is_optional() {
    let transport = MockTransport::new();
    let (with_delay, surface) = make_session(&transport, true).await;

    assert_eq!(with_delay.synchronizer_names().last(), Some(&"delay"));
    assert_eq!(surface.definitions().actions.len(), 7);
    assert_eq!(surface.definitions().variables.len(), 16 + 24);

    let (without_delay, _surface) = make_session(&transport, false).await;
    let result = without_delay
        .handle_action("delay_temperature", &options(json!({ "channel": 1, "temperature": 20 })))
        .await;
    assert!(matches!(result, Err(GatewayError::UnknownAction(_))));
}

#[tokio::test]
async fn test_uma04_mute_on_channel_5_is_rejected_before_any_io() {
    let transport = MockTransport::new();
    let (session, _surface) = make_session(&transport, false).await;
    assert_eq!(session.config().channels(), 4);

    let result = session
        .handle_action("mute_ch", &options(json!({ "channel": 5, "mute": true })))
        .await;

    assert!(matches!(result, Err(GatewayError::Validation(_))));
    assert!(transport.device_calls().is_empty());
}

#[tokio::test]
async fn test_missing_channel_is_rejected_before_any_io() {
    let transport = MockTransport::new();
    let (session, _surface) = make_session(&transport, false).await;

    let result = session
        .handle_action("volume_ch", &options(json!({ "volume": -3 })))
        .await;

    assert!(matches!(result, Err(GatewayError::Validation(_))));
    assert!(transport.device_calls().is_empty());
}

#[tokio::test]
async fn test_not_ready_device_fails_and_ticks_are_skipped() {
    let transport = MockTransport::new();
    transport.respond(Verb::Get, HEALTH_PATH, 200, json!({ "ready": false }));
    respond_bulk(&transport, [false; 4]);
    let connection = Arc::new(ConnectionManager::with_credentials(
        transport.clone(),
        Credentials::for_host(TEST_HOST, TEST_TOKEN),
    ));
    assert_eq!(connection.probe_now().await, ConnectionState::Failed);
    let surface = Arc::new(LocalSurface::new());
    let session = Orchestrator::with_connection(make_test_config(false), connection, surface);

    let report = session.tick().await;

    assert!(matches!(report, TickReport::Skipped(ConnectionState::Failed)));
    assert!(transport.device_calls().is_empty());
}

#[tokio::test]
async fn test_tick_refreshes_every_synchronizer() {
    let transport = MockTransport::new();
    respond_bulk(&transport, [true, false, false, true]);
    let (session, surface) = make_session(&transport, false).await;

    let report = session.tick().await;

    match report {
        TickReport::Ran {
            refreshed,
            busy,
            failed,
        } => {
            assert_eq!(refreshed.len(), 4);
            assert!(busy.is_empty());
            assert!(failed.is_empty());
        },
        other => panic!("unexpected report: {:?}", other),
    }
    assert_eq!(transport.calls_to(Verb::Get, BULK), 1);
    assert_eq!(surface.variable("mute_ch_4"), Some(json!(true)));
    assert_eq!(surface.variable("power_ch_1"), Some(json!(true)));
    assert_eq!(surface.variable("volume_ch_2"), Some(json!(-10.0)));
    assert!(surface.variable("autostandby_ch_3").is_some());
    assert!(session
        .check_feedback("mute", &options(json!({ "channel": 1 })))
        .unwrap());
    assert!(!session
        .check_feedback("mute", &options(json!({ "channel": 2 })))
        .unwrap());
}

#[tokio::test]
async fn test_failed_refresh_is_reported_and_keeps_cache() {
    let transport = MockTransport::new();
    respond_bulk(&transport, [true; 4]);
    let (session, surface) = make_session(&transport, false).await;
    session.tick().await;

    transport.respond(Verb::Get, BULK, 500, Value::Null);
    let report = session.tick().await;

    match report {
        TickReport::Ran { failed, .. } => {
            assert_eq!(failed.len(), 4);
            assert!(failed
                .iter()
                .all(|(_, e)| *e == GatewayError::Http { status: 500 }));
        },
        other => panic!("unexpected report: {:?}", other),
    }
    assert_eq!(surface.variable("mute_ch_1"), Some(json!(true)));
    assert!(session
        .check_feedback("mute", &options(json!({ "channel": 1 })))
        .unwrap());
}

#[tokio::test]
async fn test_busy_synchronizer_is_skipped() {
    let transport = MockTransport::new();
    respond_bulk(&transport, [false; 4]);
    let (session, _surface) = make_session(&transport, false).await;

    let guard = session.points[0].in_flight.try_begin();
    assert!(guard.is_some());
    let report = session.tick().await;

    match report {
        TickReport::Ran {
            refreshed, busy, ..
        } => {
            assert_eq!(busy, vec!["mute"]);
            assert_eq!(refreshed.len(), 3);
        },
        other => panic!("unexpected report: {:?}", other),
    }
    drop(guard);
    assert!(!session.points[0].in_flight.is_busy());
}

#[tokio::test]
async fn test_write_updates_cache_and_variable_without_reread() {
    let transport = MockTransport::new();
    let (session, surface) = make_session(&transport, false).await;

    for ch in Channel::all(4) {
        let path = format!("/settings/channel/{}/dsp/mute", ch);
        transport.respond(Verb::Put, &path, 200, json!({}));
        let before = transport.device_calls().len();

        session
            .handle_action("mute_ch", &options(json!({ "channel": ch.number(), "mute": true })))
            .await
            .unwrap();

        assert_eq!(surface.variable(&format!("mute_ch_{}", ch)), Some(json!(true)));
        assert!(session
            .check_feedback("mute", &options(json!({ "channel": ch.number() })))
            .unwrap());
        assert_eq!(transport.device_calls().len(), before + 1);
        assert_eq!(transport.calls_to(Verb::Get, &path), 0);
    }
    assert_eq!(surface.feedback_checks("mute"), 4);
}

#[tokio::test]
async fn test_failed_write_leaves_cache_and_variable_unchanged() {
    let transport = MockTransport::new();
    respond_bulk(&transport, [false; 4]);
    let (session, surface) = make_session(&transport, false).await;
    session.tick().await;

    for ch in Channel::all(4) {
        let path = format!("/settings/channel/{}/dsp/mute", ch);
        transport.respond(Verb::Put, &path, 503, Value::Null);

        let result = session
            .handle_action("mute_ch", &options(json!({ "channel": ch.number(), "mute": true })))
            .await;

        assert_eq!(result, Err(GatewayError::Http { status: 503 }));
        assert_eq!(surface.variable(&format!("mute_ch_{}", ch)), Some(json!(false)));
        assert!(!session
            .check_feedback("mute", &options(json!({ "channel": ch.number() })))
            .unwrap());
    }
}

#[tokio::test]
async fn test_delay_action_through_the_session() {
    let transport = MockTransport::new();
    let path = "/settings/channel/2/dsp/delay";
    transport.respond(
        Verb::Get,
        path,
        200,
        json!({ "type": "ms", "ms": 5.0, "m": 1.7, "samples": 240.0, "temperature": 25.0 }),
    );
    transport.respond(Verb::Put, path, 200, json!({}));
    let (session, surface) = make_session(&transport, true).await;

    session
        .handle_action(
            "delay_temperature",
            &options(json!({ "channel": 2, "temperature": "30.5" })),
        )
        .await
        .unwrap();

    assert_eq!(
        transport.last_body(Verb::Put, path),
        Some(json!({ "type": "ms", "samples": 240.0, "ms": 5.0, "m": 1.7, "temperature": 30.5 }))
    );
    assert_eq!(surface.variable("delay_ch_temp_2"), Some(json!(30.5)));
}

#[tokio::test]
async fn test_passthrough_reads() {
    let transport = MockTransport::new();
    transport.respond(Verb::Get, "/version", 200, json!({ "version": "1.4.2" }));
    transport.respond(
        Verb::Get,
        "/info/device",
        200,
        json!({ "model_name": "UMA04/POE", "channel": 4, "serial": "A123" }),
    );
    let (session, _surface) = make_session(&transport, false).await;

    assert_eq!(session.version().await.unwrap().version, "1.4.2");
    let info = session.device_info().await.unwrap();
    assert_eq!(info.channel, 4);
    assert_eq!(info.serial, "A123");

    session.connection().close();
    assert_eq!(session.version().await, Err(GatewayError::NotConnected));
}

#[tokio::test]
async fn test_status_is_forwarded_to_surface() {
    let transport = MockTransport::new();
    let (session, surface) = make_session(&transport, false).await;
    assert_eq!(surface.status(), ConnectionState::Connected);

    transport.fail(Verb::Get, HEALTH_PATH);
    session.connection().probe_now().await;

    assert_eq!(surface.status(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_metering_timer_refreshes_and_shutdown_stops_it() {
    let transport = MockTransport::new();
    respond_bulk(&transport, [true; 4]);
    let (session, surface) = make_session(&transport, false).await;

    session.start_metering();
    assert!(session.is_metering());
    let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
        while surface.variable("mute_ch_1").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok());

    session.shutdown();
    assert!(!session.is_metering());
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let calls = transport.calls_to(Verb::Get, BULK);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.calls_to(Verb::Get, BULK), calls);
}

#[tokio::test]
async fn test_shutdown_cancels_timer_when_not_connected() {
    let transport = MockTransport::new();
    let (session, _surface) = make_session(&transport, false).await;
    session.connection().close();
    session.start_metering();

    session.shutdown();

    assert!(!session.is_metering());
}

#[tokio::test]
async fn test_update_config() {
    let transport = MockTransport::new();
    let (session, _surface) = make_session(&transport, false).await;
    session.start_metering();

    assert_eq!(
        session.update_config(make_test_config(false)),
        ConfigChange::Unchanged
    );
    assert_eq!(
        session.update_config(make_test_config(true)),
        ConfigChange::RequiresRebuild
    );

    let mut no_metering = make_test_config(false);
    no_metering.metering.enabled = false;
    assert_eq!(session.update_config(no_metering.clone()), ConfigChange::Applied);
    assert!(!session.is_metering());

    let mut rotated = no_metering;
    rotated.device.token = "rotated".to_string();
    assert_eq!(session.update_config(rotated), ConfigChange::Applied);
    assert_eq!(session.connection().credentials().token, "rotated");
    assert_eq!(session.config().device.token, "rotated");

    session.shutdown();
}

#[tokio::test]
async fn test_probe_interval_change_restarts_heartbeat() {
    let transport = MockTransport::new();
    transport.respond(Verb::Get, HEALTH_PATH, 200, json!({ "ready": true }));
    let mut config = make_test_config(false);
    config.device.probe_interval_ms = 3_600_000;
    config.metering.enabled = false;
    let surface = Arc::new(LocalSurface::new());
    let session = Orchestrator::with_transport(config.clone(), transport.clone(), surface);
    session.start();

    let connected = tokio::time::timeout(Duration::from_secs(2), async {
        while !session.connection().is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(connected.is_ok());
    let before = transport.calls_to(Verb::Get, HEALTH_PATH);

    config.device.probe_interval_ms = 20;
    assert_eq!(session.update_config(config), ConfigChange::Applied);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(transport.calls_to(Verb::Get, HEALTH_PATH) > before + 1);
    session.shutdown();
}
