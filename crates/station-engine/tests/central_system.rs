//! End-to-end scenarios against a scripted Central System on a loopback
//! WebSocket listener.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use station_engine::store::{KvStore, MemoryStore};
use station_engine::{ChargePoint, CpStatus, EngineConfig, EngineError, EngineEvent};
use station_types::v16::{AvailabilityType, ConnectorStatus, RemoteStartStopStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerWs = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}/", listener.local_addr().unwrap());
    (listener, base)
}

/// Accept the charge point, granting the ocpp1.6 subprotocol it offers
async fn accept_cp(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, |_request: &Request, mut response: Response| {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("ocpp1.6"),
        );
        Ok(response)
    })
    .await
    .unwrap()
}

/// Next text frame, parsed
async fn recv_frame(ws: &mut ServerWs) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next CALL as (unique_id, action, payload)
async fn recv_call(ws: &mut ServerWs) -> (String, String, Value) {
    let frame = recv_frame(ws).await;
    assert_eq!(frame[0], 2, "expected a CALL, got {frame}");
    (
        frame[1].as_str().unwrap().to_string(),
        frame[2].as_str().unwrap().to_string(),
        frame[3].clone(),
    )
}

async fn expect_call(ws: &mut ServerWs, action: &str) -> (String, Value) {
    let (unique_id, got, payload) = recv_call(ws).await;
    assert_eq!(got, action);
    (unique_id, payload)
}

async fn send_result(ws: &mut ServerWs, unique_id: &str, payload: Value) {
    ws.send(Message::Text(json!([3, unique_id, payload]).to_string()))
        .await
        .unwrap();
}

async fn send_call(ws: &mut ServerWs, unique_id: &str, action: &str, payload: Value) {
    ws.send(Message::Text(
        json!([2, unique_id, action, payload]).to_string(),
    ))
    .await
    .unwrap();
}

/// Accept the BootNotification the station sends on open
async fn boot(ws: &mut ServerWs, interval: i64) {
    let (unique_id, payload) = expect_call(ws, "BootNotification").await;
    assert_eq!(payload["chargePointVendor"], "Elmo");
    assert!(payload["chargePointModel"].is_string());
    send_result(
        ws,
        &unique_id,
        json!({
            "status": "Accepted",
            "interval": interval,
            "currentTime": "2024-01-01T00:00:00Z",
        }),
    )
    .await;
}

async fn wait_for_status(events: &mut Receiver<EngineEvent>, wanted: CpStatus) {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a status event")
            .expect("event channel closed");
        if let EngineEvent::StatusChanged { status, .. } = event {
            if status == wanted {
                return;
            }
        }
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn cold_connect_boots_and_arms_heartbeat() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 1).await;

        // the 1s heartbeat must show up on its own
        let (unique_id, payload) = expect_call(&mut ws, "Heartbeat").await;
        assert_eq!(payload, json!({}));
        send_result(
            &mut ws,
            &unique_id,
            json!({"currentTime": "2024-01-01T00:00:05Z"}),
        )
        .await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    assert_eq!(cp.status(), CpStatus::Connected);
    server.await.unwrap();
}

#[tokio::test]
async fn happy_transaction_lifecycle() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        let (unique_id, payload) = expect_call(&mut ws, "Authorize").await;
        assert_eq!(payload["idTag"], "DEADBEEF");
        send_result(
            &mut ws,
            &unique_id,
            json!({"idTagInfo": {"status": "Accepted"}}),
        )
        .await;

        let (start_id, payload) = expect_call(&mut ws, "StartTransaction").await;
        assert_eq!(payload["connectorId"], 1);
        assert_eq!(payload["idTag"], "DEADBEEF");
        assert_eq!(payload["meterStart"], 0);
        assert_eq!(payload["reservationId"], 0);
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));

        let (status_id, payload) = expect_call(&mut ws, "StatusNotification").await;
        assert_eq!(payload["connectorId"], 1);
        assert_eq!(payload["status"], "Charging");
        assert_eq!(payload["errorCode"], "NoError");
        send_result(&mut ws, &status_id, json!({})).await;
        send_result(
            &mut ws,
            &start_id,
            json!({"idTagInfo": {"status": "Accepted"}, "transactionId": 42}),
        )
        .await;

        let (unique_id, payload) = expect_call(&mut ws, "MeterValues").await;
        assert_eq!(payload["connectorId"], 0);
        assert_eq!(payload["transactionId"], 42);
        let sampled = &payload["meterValue"][0]["sampledValue"][0];
        assert_eq!(sampled["value"], "5000");
        assert_eq!(sampled["measurand"], "Energy.Active.Import.Register");
        assert_eq!(sampled["unit"], "Wh");
        send_result(&mut ws, &unique_id, json!({})).await;

        let (unique_id, payload) = expect_call(&mut ws, "StopTransaction").await;
        assert_eq!(payload["transactionId"], 42);
        assert_eq!(payload["meterStop"], 5000);
        assert_eq!(payload["reason"], "Local");
        assert_eq!(payload["idTag"], "DEADBEEF");
        assert_eq!(payload["transactionData"][0]["sampledValue"][0]["value"], "0");
        assert_eq!(
            payload["transactionData"][1]["sampledValue"][0]["value"],
            "5000"
        );
        // give the station a beat to settle in Finishing before the reply
        tokio::time::sleep(Duration::from_millis(100)).await;
        send_result(
            &mut ws,
            &unique_id,
            json!({"idTagInfo": {"status": "Accepted"}}),
        )
        .await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;

    cp.authorize("DEADBEEF").await.unwrap();
    wait_for_status(&mut events, CpStatus::Authorized).await;

    cp.start_transaction("DEADBEEF").await.unwrap();
    assert_eq!(cp.status(), CpStatus::InTransaction);
    assert_eq!(cp.connector_status(1).unwrap(), ConnectorStatus::Charging);
    eventually("transaction id 42", || cp.transaction_id() == Some(42)).await;

    cp.set_meter_value(5000, true).await.unwrap();

    cp.stop_transaction("DEADBEEF").await.unwrap();
    assert_eq!(cp.status(), CpStatus::Authorized);
    assert_eq!(cp.connector_status(1).unwrap(), ConnectorStatus::Finishing);
    eventually("connector 1 back to Available", || {
        cp.connector_status(1).unwrap() == ConnectorStatus::Available
    })
    .await;
    // the id survives the stop; only a new session resets it
    assert_eq!(cp.transaction_id(), Some(42));

    server.await.unwrap();
}

#[tokio::test]
async fn remote_start_runs_after_delay_without_blocking() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    cp.update_config(|config| config.remote_start_delay_secs = 1);

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        let started = Instant::now();
        send_call(&mut ws, "X", "RemoteStartTransaction", json!({"idTag": "T1"})).await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[0], 3);
        assert_eq!(reply[1], "X");
        assert_eq!(reply[2]["status"], "Accepted");

        // the delay must not block other traffic
        send_call(
            &mut ws,
            "Y",
            "TriggerMessage",
            json!({"requestedMessage": "Heartbeat"}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "Y");
        assert_eq!(reply[2]["status"], "Accepted");
        let (hb_id, _) = expect_call(&mut ws, "Heartbeat").await;
        send_result(&mut ws, &hb_id, json!({"currentTime": "2024-01-01T00:00:00Z"})).await;
        assert!(
            started.elapsed() < Duration::from_millis(900),
            "heartbeat was held up by the remote-start delay"
        );

        let (start_id, payload) = expect_call(&mut ws, "StartTransaction").await;
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(payload["idTag"], "T1");
        send_result(
            &mut ws,
            &start_id,
            json!({"idTagInfo": {"status": "Accepted"}, "transactionId": 7}),
        )
        .await;
        let (status_id, _) = expect_call(&mut ws, "StatusNotification").await;
        send_result(&mut ws, &status_id, json!({})).await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    eventually("remote-started transaction", || {
        cp.transaction_id() == Some(7)
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn remote_start_rejected_sends_nothing() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    cp.update_config(|config| {
        config.remote_start_stop_response = RemoteStartStopStatus::Rejected;
    });
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        send_call(&mut ws, "X", "RemoteStartTransaction", json!({"idTag": "T1"})).await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "X");
        assert_eq!(reply[2]["status"], "Rejected");

        // no StartTransaction may follow
        let quiet = timeout(Duration::from_millis(800), ws.next()).await;
        assert!(quiet.is_err(), "unexpected frame after rejected remote start");
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    server.await.unwrap();
    assert_eq!(cp.transaction_id(), None);
}

#[tokio::test]
async fn remote_stop_accepted_originates_stop() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        send_call(&mut ws, "RS", "RemoteStartTransaction", json!({"idTag": "T1"})).await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[2]["status"], "Accepted");

        let (start_id, _) = expect_call(&mut ws, "StartTransaction").await;
        send_result(
            &mut ws,
            &start_id,
            json!({"idTagInfo": {"status": "Accepted"}, "transactionId": 9}),
        )
        .await;
        let (status_id, _) = expect_call(&mut ws, "StatusNotification").await;
        send_result(&mut ws, &status_id, json!({})).await;

        send_call(
            &mut ws,
            "RT",
            "RemoteStopTransaction",
            json!({"transactionId": 9}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "RT");
        assert_eq!(reply[2]["status"], "Accepted");

        let (stop_id, payload) = expect_call(&mut ws, "StopTransaction").await;
        assert_eq!(payload["transactionId"], 9);
        assert!(payload.get("idTag").is_none());
        send_result(&mut ws, &stop_id, json!({})).await;
        // keep the socket up long enough for the client-side asserts
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    eventually("transaction 9 started", || cp.transaction_id() == Some(9)).await;
    eventually("back to AUTHORIZED after remote stop", || {
        cp.status() == CpStatus::Authorized
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn change_availability_on_connector_zero_cascades() {
    let (listener, base) = listen().await;
    let durable = Arc::new(MemoryStore::new());
    let cp = ChargePoint::with_durable_store(EngineConfig::default(), durable.clone());

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        send_call(
            &mut ws,
            "CA",
            "ChangeAvailability",
            json!({"connectorId": 0, "type": "Inoperative"}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "CA");
        assert_eq!(reply[2]["status"], "Accepted");

        // connector 0 first, then the cascade over 1 and 2
        for expected_connector in [0, 1, 2] {
            let (unique_id, payload) = expect_call(&mut ws, "StatusNotification").await;
            assert_eq!(payload["connectorId"], expected_connector);
            assert_eq!(payload["status"], "Unavailable");
            send_result(&mut ws, &unique_id, json!({})).await;
        }
    });

    cp.connect(&base, "CP01").await.unwrap();
    eventually("availability cascade", || {
        (0..3).all(|c| cp.availability(c).unwrap() == AvailabilityType::Inoperative)
    })
    .await;
    eventually("statuses forced to Unavailable", || {
        (0..3).all(|c| cp.connector_status(c).unwrap() == ConnectorStatus::Unavailable)
    })
    .await;
    assert_eq!(
        durable.get("conn_availability0").as_deref(),
        Some("Inoperative")
    );
    server.await.unwrap();
}

#[tokio::test]
async fn trigger_message_meter_values_uses_requested_connector() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;
        ready_rx.await.unwrap();

        send_call(
            &mut ws,
            "T1",
            "TriggerMessage",
            json!({"requestedMessage": "MeterValues", "connectorId": 1}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[2]["status"], "Accepted");

        let (unique_id, payload) = expect_call(&mut ws, "MeterValues").await;
        assert_eq!(payload["connectorId"], 1);
        assert!(payload.get("transactionId").is_none());
        assert_eq!(payload["meterValue"][0]["sampledValue"][0]["value"], "777");
        send_result(&mut ws, &unique_id, json!({})).await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    cp.set_meter_value(777, false).await.unwrap();
    ready_tx.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unknown_action_gets_not_implemented_call_error() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        send_call(&mut ws, "Z", "FooBar", json!({})).await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[0], 4);
        assert_eq!(reply[1], "Z");
        assert_eq!(reply[2], "NotImplemented");

        // a protocol miss never kills the session
        send_call(
            &mut ws,
            "Y",
            "TriggerMessage",
            json!({"requestedMessage": "Heartbeat"}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "Y");
        let (hb_id, _) = expect_call(&mut ws, "Heartbeat").await;
        send_result(&mut ws, &hb_id, json!({"currentTime": "2024-01-01T00:00:00Z"})).await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    server.await.unwrap();
}

#[tokio::test]
async fn reset_acknowledges_then_closes() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        send_call(&mut ws, "R", "Reset", json!({"type": "Soft"})).await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "R");
        assert_eq!(reply[2]["status"], "Accepted");

        // the station closes right after the acknowledgement
        loop {
            match timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for close")
            {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    eventually("clean disconnect after reset", || {
        cp.status() == CpStatus::Disconnected
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn double_connect_is_refused() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        // the refused second connect closes this socket
        loop {
            match timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for close")
            {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;

    let err = cp.connect(&base, "CP01").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyConnected));
    assert_eq!(cp.status(), CpStatus::Error);
    server.await.unwrap();
}

#[tokio::test]
async fn boot_rejection_logs_and_disconnects() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        let (unique_id, _) = expect_call(&mut ws, "BootNotification").await;
        send_result(
            &mut ws,
            &unique_id,
            json!({
                "status": "Rejected",
                "interval": 0,
                "currentTime": "2024-01-01T00:00:00Z",
            }),
        )
        .await;

        loop {
            match timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for close")
            {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    });

    cp.connect(&base, "CP01").await.unwrap();
    eventually("clean disconnect after rejected boot", || {
        cp.status() == CpStatus::Disconnected
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_json_enters_error_but_keeps_socket() {
    let (listener, base) = listen().await;
    let cp = ChargePoint::new(EngineConfig::default());
    let mut events = cp.subscribe();

    let server = tokio::spawn(async move {
        let mut ws = accept_cp(&listener).await;
        boot(&mut ws, 3600).await;

        ws.send(Message::Text("{oops".to_string())).await.unwrap();

        // the socket must still answer afterwards
        send_call(
            &mut ws,
            "Y",
            "TriggerMessage",
            json!({"requestedMessage": "Heartbeat"}),
        )
        .await;
        let reply = recv_frame(&mut ws).await;
        assert_eq!(reply[1], "Y");
        let (hb_id, _) = expect_call(&mut ws, "Heartbeat").await;
        send_result(&mut ws, &hb_id, json!({"currentTime": "2024-01-01T00:00:00Z"})).await;
    });

    cp.connect(&base, "CP01").await.unwrap();
    wait_for_status(&mut events, CpStatus::Connected).await;
    eventually("ERROR after malformed frame", || {
        cp.status() == CpStatus::Error
    })
    .await;
    server.await.unwrap();
}
