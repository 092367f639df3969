//! In-process mailbox relay for the test suite.
//!
//! Mirrors the production relay contract: `PUT /{mailbox}` stores the latest
//! message, `GET /{mailbox}` hands it out exactly once and answers 404 while
//! the mailbox is empty. A test can also make the next N GETs fail with 503
//! to simulate a flaky relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use parking_lot::Mutex;

use crate::config::RelayConfig;
use crate::relay::MailboxClient;

#[derive(Clone, Default)]
struct RelayState {
    mailboxes: Arc<Mutex<HashMap<String, String>>>,
    get_failures: Arc<AtomicUsize>,
    get_count: Arc<AtomicUsize>,
}

pub struct TestRelay {
    addr: SocketAddr,
    state: RelayState,
    server: tokio::task::JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Self {
        init_tracing();
        let state = RelayState::default();
        let app = Router::new()
            .route("/:mailbox", put(put_message).get(get_message))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test relay");
        let addr = listener.local_addr().expect("relay addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test relay server");
        });
        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            base_url: self.base_url(),
            poll_interval: Duration::from_millis(25),
            request_timeout: Duration::from_secs(2),
        }
    }

    pub fn client(&self) -> MailboxClient {
        MailboxClient::new(&self.config()).expect("mailbox client")
    }

    /// Make the next `count` GETs answer 503 regardless of mailbox content.
    pub fn fail_next_gets(&self, count: usize) {
        self.state.get_failures.store(count, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.state.get_count.load(Ordering::SeqCst)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn put_message(
    State(state): State<RelayState>,
    Path(mailbox): Path<String>,
    body: String,
) -> StatusCode {
    state.mailboxes.lock().insert(mailbox, body);
    StatusCode::OK
}

async fn get_message(
    State(state): State<RelayState>,
    Path(mailbox): Path<String>,
) -> (StatusCode, String) {
    state.get_count.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .get_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
            left.checked_sub(1)
        })
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, String::new());
    }
    match state.mailboxes.lock().remove(&mailbox) {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// A base URL nothing listens on, for unreachable-relay scenarios.
pub async fn dead_relay_config() -> RelayConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    RelayConfig {
        base_url: format!("http://{addr}"),
        poll_interval: Duration::from_millis(25),
        request_timeout: Duration::from_millis(250),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
