//! Integration tests for the device session
//!
//! Connection lifecycle, outbound queue draining and raw REPL exchanges
//! against the simulated device.


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use monocle_core::protocol::{
    DFU_CONTROL_CHARACTERISTIC_UUID, DFU_PACKET_CHARACTERISTIC_UUID, RAW_DATA_RX_CHARACTERISTIC_UUID,
    RAW_DATA_TX_CHARACTERISTIC_UUID, REPL_RX_CHARACTERISTIC_UUID, REPL_SERVICE_UUID,
    REPL_TX_CHARACTERISTIC_UUID,
};
use monocle_core::*;
use test_utils::{
    connected_session, fast_config, session_for, wait_until, SimulatedDevice, EMPTY_OK,
};

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_subscribes_and_requests_friendly_prompt() {
    let (device, session, sink) = connected_session(fast_config()).await;

    assert!(session.is_connected());
    assert_eq!(
        session.services().await,
        vec![DeviceService::Repl, DeviceService::RawData]
    );
    assert!(device.subscriptions().contains(&REPL_TX_CHARACTERISTIC_UUID));
    assert!(device.subscriptions().contains(&RAW_DATA_TX_CHARACTERISTIC_UUID));
    assert_eq!(
        sink.states(),
        vec![ConnectionStatus::Progress, ConnectionStatus::Connected]
    );

    // Ctrl-B goes out first and the banner is echoed to the terminal
    assert!(wait_until(|| sink.output().contains("MicroPython")).await);
    assert_eq!(
        device.writes_to(REPL_RX_CHARACTERISTIC_UUID).first(),
        Some(&b"\x02".to_vec())
    );
}

#[tokio::test(start_paused = true)]
async fn test_discovery_timeout_cancels_request() {
    let device = SimulatedDevice::new();
    device.set_undiscoverable();
    let (session, sink) = session_for(&device, fast_config());

    let result = session.connect().await;

    assert!(matches!(
        result,
        Err(MonocleError::DiscoveryTimeout { timeout_ms: 10_000 })
    ));
    assert!(device.request_cancelled());
    assert!(!session.is_connected());
    assert_eq!(sink.states(), vec![ConnectionStatus::Disconnected]);
    assert!(sink.output().contains("Disconnected"));
}

#[tokio::test]
async fn test_missing_services_fail_connect() {
    let device = SimulatedDevice::with_services(vec![REPL_SERVICE_UUID]);
    device.hide_service(REPL_SERVICE_UUID);
    let (session, _sink) = session_for(&device, fast_config());

    let result = session.connect().await;

    assert!(matches!(result, Err(MonocleError::NoUsableService)));
    assert!(!device.is_connected());
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let (device, session, _sink) = connected_session(fast_config()).await;

    let kind = session.connect().await.unwrap();

    assert_eq!(kind, SessionKind::Repl);
    assert_eq!(device.connect_count(), 2);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_disconnect_clears_state_and_reconnects_on_next_command() {
    let (device, session, sink) = connected_session(fast_config()).await;
    session.enter_raw_mode().await.unwrap();
    device.set_silent(true);

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_command("slow()").await })
    };
    assert!(wait_until(|| device.repl_input().contains("slow()\x04")).await);

    device.drop_connection();

    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(MonocleError::Disconnected)));
    assert!(!session.is_connected());
    assert_eq!(session.mode().await, ReplMode::Normal);
    assert_eq!(session.queued_bytes(Channel::Repl).await, 0);
    assert!(matches!(
        session.send_raw_data(b"x").await,
        Err(MonocleError::NotConnected)
    ));
    assert_eq!(sink.states().last(), Some(&ConnectionStatus::Disconnected));
    assert!(sink.output().ends_with("Disconnected\r\n"));

    // The next command reconnects instead of queueing forever
    device.set_silent(false);
    session.send_command("print('back')").await.unwrap();
    assert_eq!(device.connect_count(), 2);
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_drain_stops_after_link_loss() {
    let (device, session, sink) = connected_session(fast_config()).await;
    assert!(wait_until(|| sink.output().contains(">>> ")).await);
    let writes_before = device.writes_to(REPL_RX_CHARACTERISTIC_UUID).len();

    device.drop_connection();
    assert!(wait_until(|| sink.states().last() == Some(&ConnectionStatus::Disconnected)).await);

    session.send_interrupt(b"\x03").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A running drain would have tried the write and discarded the bytes
    assert_eq!(session.queued_bytes(Channel::Repl).await, 1);
    assert_eq!(device.writes_to(REPL_RX_CHARACTERISTIC_UUID).len(), writes_before);
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_while_connecting_leaves_no_live_connection() {
    let device = SimulatedDevice::new();
    device.drop_on_subscribe();
    let (session, sink) = session_for(&device, fast_config());

    let result = session.connect().await;

    assert!(matches!(result, Err(MonocleError::Disconnected)));
    assert!(!session.is_connected());
    assert!(session.services().await.is_empty());
    assert_eq!(sink.states().last(), Some(&ConnectionStatus::Disconnected));

    session.send_interrupt(b"\x03").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.queued_bytes(Channel::Repl).await, 1);
}

#[tokio::test]
async fn test_local_disconnect_notifies_once() {
    let (_device, session, sink) = connected_session(fast_config()).await;

    session.disconnect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let disconnects = sink
        .states()
        .into_iter()
        .filter(|state| *state == ConnectionStatus::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
    assert!(!session.is_connected());
}

// ----------------------------------------------------------------------------
// Outbound Queues
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_raw_data_drained_in_mtu_chunks() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    let payload: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();

    session.send_raw_data(&payload).await.unwrap();

    assert!(wait_until(|| device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID).len() == 3).await);
    let writes = device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID);
    let sizes: Vec<usize> = writes.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(writes.concat(), payload);
    assert_eq!(session.queued_bytes(Channel::RawData).await, 0);
}

#[tokio::test]
async fn test_queue_preserves_order_across_enqueues() {
    let (device, session, _sink) = connected_session(fast_config()).await;

    for part in ["first ", "second ", "third"] {
        session.send_raw_data(part.as_bytes()).await.unwrap();
    }

    assert!(wait_until(|| device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID).concat().len() == 18).await);
    assert_eq!(
        device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID).concat(),
        b"first second third".to_vec()
    );
}

#[tokio::test]
async fn test_busy_transport_retries_same_prefix() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    assert!(wait_until(|| !device.writes_to(REPL_RX_CHARACTERISTIC_UUID).is_empty()).await);
    device.fail_busy(3);

    session.send_raw_data(b"hello").await.unwrap();

    assert!(wait_until(|| !device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID),
        vec![b"hello".to_vec()]
    );
}

#[tokio::test]
async fn test_hard_write_error_discards_prefix() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    assert!(wait_until(|| !device.writes_to(REPL_RX_CHARACTERISTIC_UUID).is_empty()).await);
    device.fail_writes(1);

    session.send_raw_data(&[7u8; 150]).await.unwrap();

    assert!(wait_until(|| !device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        device.writes_to(RAW_DATA_RX_CHARACTERISTIC_UUID),
        vec![vec![7u8; 50]]
    );
}

#[tokio::test]
async fn test_raw_data_notifications_reach_sink() {
    let (device, _session, sink) = connected_session(fast_config()).await;

    device.notify(RAW_DATA_TX_CHARACTERISTIC_UUID, b"\x01\x02\x03");

    assert!(wait_until(|| sink.raw_data() == vec![b"\x01\x02\x03".to_vec()]).await);
}

#[tokio::test]
async fn test_raw_data_requires_service() {
    let device = SimulatedDevice::with_services(vec![REPL_SERVICE_UUID]);
    let (session, _sink) = session_for(&device, fast_config());
    session.ensure_connected().await.unwrap();

    let result = session.send_raw_data(b"x").await;

    assert!(matches!(
        result,
        Err(MonocleError::Transport(TransportError::ServiceNotFound(_)))
    ));
}

// ----------------------------------------------------------------------------
// Raw REPL
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_raw_command_round_trip() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    device.respond_with(|command| {
        if command == "1+1" {
            "OK2\r\n\x04>".to_string()
        } else {
            EMPTY_OK.to_string()
        }
    });

    session.enter_raw_mode().await.unwrap();
    assert_eq!(session.mode().await, ReplMode::RawActive);

    let reply = session.send_command("1+1").await.unwrap();

    assert_eq!(reply.as_deref(), Some("OK2\r\n\x04>"));
    assert_eq!(reply.as_deref().and_then(extract_payload), Some("2\r\n"));
    assert_eq!(device.commands(), vec!["1+1".to_string()]);
    assert!(device.repl_input().contains("\x03\x011+1\x04"));

    session.exit_raw_mode().await.unwrap();
    assert_eq!(session.mode().await, ReplMode::Normal);
    assert!(!device.is_raw());
}

#[tokio::test]
async fn test_raw_replies_not_forwarded_to_terminal() {
    let (device, session, sink) = connected_session(fast_config()).await;
    device.respond_with(|_| "OKsecret\r\n\x04\x04>".to_string());
    assert!(wait_until(|| sink.output().contains(">>> ")).await);

    session.enter_raw_mode().await.unwrap();
    session.send_command("x").await.unwrap();

    assert!(!sink.output().contains("secret"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_with_none() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    session.enter_raw_mode().await.unwrap();
    device.set_silent(true);

    let started = tokio::time::Instant::now();
    let reply = session.send_command("1+1").await.unwrap();

    assert_eq!(reply, None);
    assert!(started.elapsed() >= Duration::from_secs(5));

    // The waiter slot is free again
    device.set_silent(false);
    let reply = session.send_command("2+2").await.unwrap();
    assert_eq!(reply.as_deref(), Some(EMPTY_OK));
}

#[tokio::test(start_paused = true)]
async fn test_second_raw_command_while_waiting_is_rejected() {
    let (device, session, _sink) = connected_session(fast_config()).await;
    session.enter_raw_mode().await.unwrap();
    device.set_silent(true);

    let (first, second) = tokio::join!(session.send_command("a"), session.send_command("b"));

    assert_eq!(first.unwrap(), None);
    assert!(matches!(second, Err(MonocleError::CommandPending)));
}

#[tokio::test]
async fn test_normal_mode_command_is_not_framed() {
    let (device, session, _sink) = connected_session(fast_config()).await;

    let reply = session.send_command("print(1)\r").await.unwrap();

    assert_eq!(reply, None);
    assert!(wait_until(|| device.repl_input().ends_with("print(1)\r")).await);
    assert!(!device.repl_input().contains('\x04'));
}

#[tokio::test]
async fn test_command_dropped_when_device_missing() {
    let device = SimulatedDevice::with_services(vec![]);
    let (session, sink) = session_for(&device, fast_config());

    let reply = session.send_command("1+1").await.unwrap();

    assert_eq!(reply, None);
    assert!(device.writes_to(REPL_RX_CHARACTERISTIC_UUID).is_empty());
    assert_eq!(sink.states().last(), Some(&ConnectionStatus::Disconnected));
}

// ----------------------------------------------------------------------------
// Firmware Update
// ----------------------------------------------------------------------------

struct ScriptedUpdater;

#[async_trait]
impl FirmwareUpdater for ScriptedUpdater {
    async fn update(&self, link: &mut DfuLink) -> Result<()> {
        link.transmit_control_bytes(&[0x06, 0x01]).await?;
        match link.receive_control_response().await {
            Some(response) if response == vec![0x60, 0x06, 0x01] => {}
            other => return Err(MonocleError::Dfu(format!("unexpected response {:?}", other))),
        }
        link.transmit_packet_bytes(&[0u8; 20]).await?;
        link.report_progress(100.0);
        Ok(())
    }
}

#[tokio::test]
async fn test_bootloader_session_runs_update_and_reconnects() {
    let device = SimulatedDevice::bootloader();
    let sink = test_utils::RecordingSink::new();
    let session = DeviceSession::builder(Arc::new(device.clone()), sink.clone())
        .config(fast_config().with_reconnect_delay(Duration::from_millis(10)))
        .firmware_updater(Arc::new(ScriptedUpdater))
        .build()
        .unwrap();

    session.ensure_connected().await.unwrap();

    assert_eq!(
        device.writes_to(DFU_CONTROL_CHARACTERISTIC_UUID),
        vec![vec![0x06, 0x01]]
    );
    assert_eq!(device.writes_to(DFU_PACKET_CHARACTERISTIC_UUID).len(), 1);
    assert_eq!(sink.progress_reports(), vec![100.0]);
    assert!(sink.states().contains(&ConnectionStatus::Updating));
    assert_eq!(sink.infos(), vec!["Firmware update done".to_string()]);
    assert!(!session.is_connected());

    // The device reboots into the interpreter
    device.set_services(vec![REPL_SERVICE_UUID]);
    assert!(wait_until(|| device.connect_count() == 2).await);
    assert!(wait_until(|| session.is_connected()).await);
}

#[tokio::test]
async fn test_bootloader_without_updater_fails() {
    let device = SimulatedDevice::bootloader();
    let (session, sink) = session_for(&device, fast_config());

    let result = session.ensure_connected().await;

    assert!(matches!(result, Err(MonocleError::Dfu(_))));
    assert!(!session.is_connected());
    assert_eq!(sink.errors().len(), 1);
}
