use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::support::{dead_relay_config, TestRelay};
use crate::config::ConnectorConfig;
use crate::connection::{ConnectionState, Connector};
use crate::engine::{
    EngineConnectionState, EngineEvent, IceCandidate, MockEngineFactory, SdpKind,
};
use crate::error::SignalError;
use crate::protocol::{SignalKind, SignalMessage};
use crate::relay::MailboxClient;
use crate::signaling::SignalChannel;

fn test_config(local_id: &str) -> ConnectorConfig {
    ConnectorConfig::builder()
        .local_id(local_id)
        .invite_retry(Duration::from_millis(100))
        .accept_timeout(Duration::from_millis(500))
        .idle_timeout(Duration::from_secs(2))
        .connect_deadline(Duration::from_secs(5))
        .reconnect_cooldown(Duration::from_millis(100))
        .build()
        .expect("connector config")
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2130706431 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

// Scenario: two candidates arrive on the switched channel before the offer.
// Once the offer's remote description is applied the listener must apply the
// buffered candidates in their original order, exactly once, and connect.
// Afterwards hangup must be idempotent and close the engine exactly once.
#[tokio::test]
async fn listener_buffers_early_candidates_then_connects() {
    let relay = TestRelay::start().await;
    let client = relay.client();
    let factory = Arc::new(MockEngineFactory::new());
    let connector = Connector::new(client.clone(), test_config("host"), factory.clone());
    let mut payloads = connector.messages().expect("payload stream");
    let mut states = connector.state();

    let listen_connector = connector.clone();
    let listen_task = tokio::spawn(async move { listen_connector.listen().await });

    let mut caller = SignalChannel::call(&client, "host", "guest", Duration::from_secs(5))
        .await
        .expect("call accepted");

    // The relay keeps one message per mailbox; pace the sends so the
    // listener's poll loop drains each one before the next lands.
    let first = candidate(1);
    let second = candidate(2);
    caller
        .send(&SignalMessage::candidate(&first))
        .await
        .expect("send candidate 1");
    sleep(Duration::from_millis(200)).await;
    caller
        .send(&SignalMessage::candidate(&second))
        .await
        .expect("send candidate 2");
    sleep(Duration::from_millis(200)).await;
    caller
        .send(&SignalMessage::offer("v=0 caller offer"))
        .await
        .expect("send offer");

    let answer = timeout(Duration::from_secs(5), caller.recv())
        .await
        .expect("answer in time")
        .expect("channel open");
    assert_eq!(answer.kind, SignalKind::Answer);

    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .expect("connected in time")
    .expect("state stream");

    let engines = factory.engines();
    assert_eq!(engines.len(), 1);
    let engine = &engines[0];
    assert_eq!(
        engine.remote_description().map(|desc| desc.kind),
        Some(SdpKind::Offer)
    );
    assert_eq!(engine.applied_candidates(), vec![first, second]);

    // Payloads flow through the connected session.
    engine.push_event(EngineEvent::ChannelOpen);
    engine.push_event(EngineEvent::ChannelMessage(Bytes::from_static(b"ping")));
    let inbound = timeout(Duration::from_secs(5), payloads.recv())
        .await
        .expect("payload in time")
        .expect("stream open");
    assert_eq!(inbound, Some(Bytes::from_static(b"ping")));
    assert!(connector.data_channel_open());
    connector.send_text("pong").await.expect("data channel send");

    // Hangup twice: one release, one end-of-stream marker.
    connector.hangup().await;
    connector.hangup().await;
    assert_eq!(engine.close_calls(), 1);
    assert_eq!(engine.applied_candidates().len(), 2);
    let closed = timeout(Duration::from_secs(5), payloads.recv())
        .await
        .expect("close marker in time")
        .expect("stream open");
    assert!(closed.is_none());
    assert!(!factory.saw_overlapping_handles());

    connector.shutdown().await;
    let _ = timeout(Duration::from_secs(5), listen_task).await;
}

// Scenario: the relay is unreachable for the whole handshake deadline. The
// attempt must fail with the transport-level error, return to Idle, and
// never have built an engine handle.
#[tokio::test]
async fn initiate_fails_cleanly_when_relay_is_unreachable() {
    let client = MailboxClient::new(&dead_relay_config().await).expect("client");
    let factory = Arc::new(MockEngineFactory::new());
    let mut config = test_config("guest");
    config.invite_deadline = Some(Duration::from_millis(700));
    let connector = Connector::new(client, config, factory.clone());

    let err = connector
        .initiate("host")
        .await
        .expect_err("relay is down");
    assert!(matches!(err, SignalError::RelayUnreachable(_)), "{err}");
    assert_eq!(connector.current_state(), ConnectionState::Idle);
    assert_eq!(factory.built_count(), 0, "no engine handle may leak");
}

#[tokio::test]
async fn initiate_times_out_when_nobody_accepts() {
    let relay = TestRelay::start().await;
    let factory = Arc::new(MockEngineFactory::new());
    let mut config = test_config("guest");
    config.invite_deadline = Some(Duration::from_millis(900));
    config.accept_timeout = Duration::from_millis(200);
    let connector = Connector::new(relay.client(), config, factory.clone());

    let err = connector
        .initiate("host")
        .await
        .expect_err("nobody listens on host");
    assert!(matches!(err, SignalError::HandshakeTimeout(_)), "{err}");
    assert_eq!(connector.current_state(), ConnectionState::Idle);
    assert_eq!(factory.built_count(), 0);
}

// Scenario: keep-alive. A connected caller whose engine fails must close the
// session (previous handle fully released) and then re-dial on its own after
// the cooldown, building a second engine only once the first is gone.
#[tokio::test]
async fn keep_alive_redials_after_engine_failure() {
    let relay = TestRelay::start().await;
    let client = relay.client();
    let factory = Arc::new(MockEngineFactory::new());
    let mut config = test_config("guest");
    config.keep_alive = true;
    let connector = Connector::new(client.clone(), config, factory.clone());
    let mut payloads = connector.messages().expect("payload stream");

    // Scripted remote: accepts every call and answers every offer.
    let answerer_client = client.clone();
    let answerer_cancel = CancellationToken::new();
    let answerer_token = answerer_cancel.clone();
    let answerer = tokio::spawn(async move {
        loop {
            let Ok(mut channel) =
                SignalChannel::listen(&answerer_client, "host", answerer_token.child_token()).await
            else {
                return;
            };
            loop {
                match timeout(Duration::from_secs(5), channel.recv()).await {
                    Ok(Some(message)) if message.kind == SignalKind::Offer => {
                        let _ = channel.send(&SignalMessage::answer("v=0 scripted")).await;
                        break;
                    }
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        }
    });

    connector.initiate("host").await.expect("first connection");
    assert_eq!(factory.built_count(), 1);

    factory.engines()[0].push_event(EngineEvent::ConnectionState(EngineConnectionState::Failed));

    // The failing session must end with the close marker...
    let closed = timeout(Duration::from_secs(5), payloads.recv())
        .await
        .expect("close marker in time")
        .expect("stream open");
    assert!(closed.is_none());

    // ...and a second attempt must start on its own after the cooldown.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while factory.built_count() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "keep-alive never re-dialed"
        );
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(factory.engines()[0].close_calls(), 1);
    assert!(
        !factory.saw_overlapping_handles(),
        "previous handle must be released before the new one is built"
    );

    let mut states = connector.state();
    timeout(
        Duration::from_secs(10),
        states.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .expect("reconnected in time")
    .expect("state stream");

    answerer_cancel.cancel();
    connector.shutdown().await;
    let _ = timeout(Duration::from_secs(5), answerer).await;
}

#[tokio::test]
async fn listener_abandons_a_silent_switched_channel() {
    let relay = TestRelay::start().await;
    let client = relay.client();
    let factory = Arc::new(MockEngineFactory::new());
    let mut config = test_config("host");
    config.idle_timeout = Duration::from_millis(300);
    let connector = Connector::new(client.clone(), config, factory.clone());
    let mut states = connector.state();

    let listen_connector = connector.clone();
    let listen_task = tokio::spawn(async move { listen_connector.listen().await });

    // Accept the call, then go silent: no offer ever arrives.
    let _caller = SignalChannel::call(&client, "host", "guest", Duration::from_secs(5))
        .await
        .expect("call accepted");

    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Negotiating),
    )
    .await
    .expect("negotiating in time")
    .expect("state stream");
    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Idle),
    )
    .await
    .expect("abandoned in time")
    .expect("state stream");

    assert_eq!(
        factory.built_count(),
        0,
        "the engine is only built once an offer arrives"
    );

    connector.shutdown().await;
    let _ = timeout(Duration::from_secs(5), listen_task).await;
}

#[tokio::test]
async fn payload_stream_can_only_be_taken_once() {
    let relay = TestRelay::start().await;
    let factory = Arc::new(MockEngineFactory::new());
    let connector = Connector::new(relay.client(), test_config("host"), factory);

    assert!(connector.messages().is_ok());
    assert!(connector.messages().is_err());
}
