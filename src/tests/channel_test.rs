use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::support::TestRelay;
use crate::error::SignalError;
use crate::protocol::{SignalKind, SignalMessage};
use crate::signaling::SignalChannel;

// Scenario: caller leaves `connect{from=X}` in the well-known mailbox `R`,
// the listener replies `ok{switchChannel=Y}`, and both ends bind the same
// mailbox pair from opposite directions.
#[tokio::test]
async fn call_and_listen_bind_a_matching_mailbox_pair() {
    let relay = TestRelay::start().await;
    let client = relay.client();

    let listener_client = client.clone();
    let listener = tokio::spawn(async move {
        SignalChannel::listen(&listener_client, "host", CancellationToken::new()).await
    });

    let caller = SignalChannel::call(&client, "host", "guest", Duration::from_secs(5))
        .await
        .expect("call");
    let listener = timeout(Duration::from_secs(5), listener)
        .await
        .expect("listen finished")
        .expect("listen task")
        .expect("listen");

    assert!(caller.local_mailbox().starts_with("guest_"));
    assert!(listener.local_mailbox().starts_with("host_"));
    assert_eq!(caller.remote_mailbox(), listener.local_mailbox());
    assert_eq!(listener.remote_mailbox(), caller.local_mailbox());
}

#[tokio::test]
async fn bound_channels_exchange_messages_in_order() {
    let relay = TestRelay::start().await;
    let client = relay.client();

    let listener_client = client.clone();
    let listener = tokio::spawn(async move {
        SignalChannel::listen(&listener_client, "host", CancellationToken::new()).await
    });
    let mut caller = SignalChannel::call(&client, "host", "guest", Duration::from_secs(5))
        .await
        .expect("call");
    let mut listener = listener.await.expect("listen task").expect("listen");

    assert!(caller.try_recv().is_none(), "queue starts empty");

    caller
        .send(&SignalMessage::offer("v=0 first"))
        .await
        .expect("send offer");
    let first = timeout(Duration::from_secs(5), listener.recv())
        .await
        .expect("recv")
        .expect("message");
    assert_eq!(first.kind, SignalKind::Offer);

    listener
        .send(&SignalMessage::answer("v=0 reply"))
        .await
        .expect("send answer");
    let reply = timeout(Duration::from_secs(5), caller.recv())
        .await
        .expect("recv")
        .expect("message");
    assert_eq!(reply.kind, SignalKind::Answer);
    assert_eq!(reply.sdp.as_deref(), Some("v=0 reply"));
}

#[tokio::test]
async fn listen_skips_messages_that_are_not_invitations() {
    let relay = TestRelay::start().await;
    let client = relay.client();

    client
        .put("host", &SignalMessage::offer("stray offer"))
        .await
        .expect("stray put");

    let listener_client = client.clone();
    let listener = tokio::spawn(async move {
        SignalChannel::listen(&listener_client, "host", CancellationToken::new()).await
    });

    // Give the listener time to drain the stray message first.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let caller = SignalChannel::call(&client, "host", "guest", Duration::from_secs(5))
        .await
        .expect("call");
    let listener = timeout(Duration::from_secs(5), listener)
        .await
        .expect("listen finished")
        .expect("listen task")
        .expect("listen");
    assert_eq!(listener.remote_mailbox(), caller.local_mailbox());
}

#[tokio::test]
async fn listen_stops_when_cancelled() {
    let relay = TestRelay::start().await;
    let client = relay.client();
    let cancel = CancellationToken::new();

    let listener_client = client.clone();
    let listener_cancel = cancel.clone();
    let listener = tokio::spawn(async move {
        SignalChannel::listen(&listener_client, "host", listener_cancel).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = timeout(Duration::from_secs(5), listener)
        .await
        .expect("listen returned")
        .expect("listen task");
    assert!(matches!(result, Err(SignalError::Cancelled)));
}

#[tokio::test]
async fn bound_channel_delivers_to_the_bound_remote_mailbox() {
    let relay = TestRelay::start().await;
    let client = relay.client();

    let channel = SignalChannel::bind(client.clone(), "a_local".into(), "b_remote".into());
    channel
        .send(&SignalMessage::offer("v=0"))
        .await
        .expect("send to bound remote");

    let stored = client
        .get("b_remote", Duration::from_secs(2))
        .await
        .expect("stored message");
    assert_eq!(stored.kind, SignalKind::Offer);
}
