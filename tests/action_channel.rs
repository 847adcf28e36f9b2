mod support;

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use support::{MockConnector, MockServer, wait_for_state};
use tradewire::{
    ActionChannel, ConnectionState, TradeWireError,
    config::ActionChannelConfig,
    credentials::StaticCredential,
    stomp::{Frame, StompCommand},
};

const CONNECTED: &str = "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0";

fn channel(connector: &Arc<MockConnector>, token: Option<&str>) -> ActionChannel {
    let credentials = match token {
        Some(token) => StaticCredential::new(token),
        None => StaticCredential::none(),
    };
    ActionChannel::new(
        ActionChannelConfig::default(),
        connector.clone(),
        Arc::new(credentials),
    )
}

async fn next_frame(server: &mut MockServer) -> Frame {
    let raw = server.next_sent().await.expect("client sent nothing");
    Frame::decode(&raw)
        .expect("client sent an invalid frame")
        .expect("client sent a heart-beat")
}

/// Accept the CONNECT handshake and wait until the channel reports open.
async fn open_session(channel: &ActionChannel, server: &mut MockServer) -> Frame {
    channel.connect().unwrap();
    let connect = next_frame(server).await;
    server.push(CONNECTED);
    channel.wait_until_open().await.unwrap();
    connect
}

#[tokio::test(start_paused = true)]
async fn connect_authenticates_with_bearer_token() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt-abc"));

    let connect = open_session(&actions, &mut server).await;

    assert_eq!(connect.command, StompCommand::Connect);
    assert_eq!(connect.get("Authorization"), Some("Bearer jwt-abc"));
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("host"), Some("localhost"));
    assert_eq!(actions.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn payment_is_published_exactly_once() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    actions.send_payment(7, 1000, 500).unwrap();

    let frame = next_frame(&mut server).await;
    assert_eq!(frame.command, StompCommand::Send);
    assert_eq!(frame.get("destination"), Some("/app/trade/payment"));
    assert_eq!(frame.get("content-type"), Some("application/json"));
    let body: Value = serde_json::from_str(&frame.body).unwrap();
    assert_eq!(body, json!({ "tradeId": 7, "money": 1000, "point": 500 }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.try_next_sent().is_none());
    assert_eq!(actions.stats().commands_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn trade_confirm_goes_to_confirm_destination() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    actions.send_trade_confirm(11).unwrap();

    let frame = next_frame(&mut server).await;
    assert_eq!(frame.get("destination"), Some("/app/trade/confirm"));
    let body: Value = serde_json::from_str(&frame.body).unwrap();
    assert_eq!(body, json!({ "tradeId": 11 }));
}

#[tokio::test(start_paused = true)]
async fn arbitrary_destinations_accept_any_serializable_body() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    actions
        .send("/app/trade/cancel", &json!({ "tradeId": 4, "reason": "typo" }))
        .unwrap();

    let frame = next_frame(&mut server).await;
    assert_eq!(frame.get("destination"), Some("/app/trade/cancel"));
    assert_eq!(
        serde_json::from_str::<Value>(&frame.body).unwrap(),
        json!({ "tradeId": 4, "reason": "typo" })
    );
}

#[tokio::test(start_paused = true)]
async fn send_is_rejected_unless_open() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));

    assert!(matches!(
        actions.send_payment(1, 1, 1),
        Err(TradeWireError::NotConnected {
            state: ConnectionState::Idle
        })
    ));

    actions.connect().unwrap();
    // CONNECT sent, CONNECTED not yet received
    next_frame(&mut server).await;
    assert!(matches!(
        actions.send_trade_confirm(1),
        Err(TradeWireError::NotConnected {
            state: ConnectionState::Connecting
        })
    ));

    server.push(CONNECTED);
    actions.wait_until_open().await.unwrap();
    actions.disconnect();
    assert!(matches!(
        actions.send_trade_confirm(1),
        Err(TradeWireError::NotConnected {
            state: ConnectionState::Closed
        })
    ));

    // Nothing rejected ever reached the wire; only DISCONNECT follows.
    let frame = next_frame(&mut server).await;
    assert_eq!(frame.command, StompCommand::Disconnect);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_fails_fast_without_retry() {
    let connector = MockConnector::new();
    let _server = connector.accept();
    let actions = channel(&connector, None);

    assert!(matches!(
        actions.connect(),
        Err(TradeWireError::MissingCredential)
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 0);
    assert_eq!(actions.state(), ConnectionState::Closed);
    assert!(actions.last_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn waiting_after_a_missing_credential_reports_it() {
    let connector = MockConnector::new();
    let actions = channel(&connector, None);

    assert!(actions.connect().is_err());

    let waited = tokio::time::timeout(Duration::from_secs(5), actions.wait_until_open())
        .await
        .expect("wait_until_open never resolved");
    assert!(matches!(waited, Err(TradeWireError::MissingCredential)));
    assert_eq!(connector.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn broker_error_closes_the_channel_without_reconnecting() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let _spare = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    server.push("ERROR\nmessage:session expired\n\n\0");
    wait_for_state(&mut actions.watch_state(), ConnectionState::Closed).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(actions.state(), ConnectionState::Closed);
    assert!(actions.last_error().unwrap().contains("session expired"));
    assert!(actions.send_payment(1, 2, 3).is_err());
}

#[tokio::test(start_paused = true)]
async fn crlf_broker_error_with_multiline_body_closes_the_channel() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    server.push("ERROR\r\nmessage:bad\r\n\r\nline one\n\nline two\0");
    wait_for_state(&mut actions.watch_state(), ConnectionState::Closed).await;

    assert_eq!(actions.last_error().as_deref(), Some("bad"));
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_surfaces_the_broker_message() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("stale"));

    actions.connect().unwrap();
    next_frame(&mut server).await;
    server.push("ERROR\nmessage:Invalid token\n\n\0");

    match actions.wait_until_open().await {
        Err(TradeWireError::Protocol { message }) => {
            assert!(message.contains("Invalid token"))
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_broker_is_not_retried() {
    let connector = MockConnector::new();
    connector.refuse();
    let actions = channel(&connector, Some("jwt"));

    actions.connect().unwrap();
    assert!(actions.wait_until_open().await.is_err());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(actions.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn disconnect_flushes_accepted_commands_then_says_goodbye() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    actions.send_trade_confirm(1).unwrap();
    actions.send_trade_confirm(2).unwrap();
    actions.disconnect();
    actions.disconnect();
    actions.wait_closed().await;

    let first = next_frame(&mut server).await;
    let second = next_frame(&mut server).await;
    let goodbye = next_frame(&mut server).await;
    assert_eq!(first.body, r#"{"tradeId":1}"#);
    assert_eq!(second.body, r#"{"tradeId":2}"#);
    assert_eq!(goodbye.command, StompCommand::Disconnect);
    assert!(goodbye.get("receipt").is_some());

    assert_eq!(actions.state(), ConnectionState::Closed);
    assert_eq!(connector.live_transports(), 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_and_receipts_are_ignored() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut server).await;

    server.push("\n");
    server.push("RECEIPT\nreceipt-id:77\n\n\0");
    server.push("garbage without frame end");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(actions.state(), ConnectionState::Open);
    actions.send_trade_confirm(5).unwrap();
    assert_eq!(next_frame(&mut server).await.command, StompCommand::Send);
}

#[tokio::test(start_paused = true)]
async fn explicit_reconnect_opens_a_fresh_session() {
    let connector = MockConnector::new();
    let mut first = connector.accept();
    let mut second = connector.accept();
    let actions = channel(&connector, Some("jwt"));
    open_session(&actions, &mut first).await;

    first.push("ERROR\nmessage:broker restart\n\n\0");
    wait_for_state(&mut actions.watch_state(), ConnectionState::Closed).await;

    open_session(&actions, &mut second).await;
    assert!(actions.last_error().is_none());
    actions.send_payment(3, 10, 0).unwrap();
    assert_eq!(
        next_frame(&mut second).await.get("destination"),
        Some("/app/trade/payment")
    );
    assert_eq!(connector.peak_live_transports(), 1);
}

#[test]
fn connect_without_runtime_closes_the_channel() {
    let connector = MockConnector::new();
    let actions = channel(&connector, Some("jwt"));

    assert!(matches!(actions.connect(), Err(TradeWireError::NoRuntime)));
    assert_eq!(actions.state(), ConnectionState::Closed);
    assert_eq!(connector.attempt_count(), 0);
}
