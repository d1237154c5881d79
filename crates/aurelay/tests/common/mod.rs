//! Test utilities and common setup.

use axum::Router;
use std::net::SocketAddr;

use aurelay::api::{self, AppState};
use aurelay::config::{DeliveryMode, RelayConfig};
use aurelay::db::Database;

/// Create a test application over an in-memory database.
pub async fn test_app() -> Router {
    let (app, _state) = test_app_with_state().await;
    app
}

/// Create a test application and keep the state around so tests can seed
/// the stores directly.
pub async fn test_app_with_state() -> (Router, AppState) {
    let db = Database::in_memory().await.unwrap();
    let state = AppState::new(&db, &RelayConfig::default());
    (api::create_router(state.clone()), state)
}

/// Byte-level TCP proxy in front of the relay, so a test can sever every
/// client connection and later restore reachability on the same address.
pub struct TcpProxy {
    addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl TcpProxy {
    /// Start forwarding on an ephemeral port.
    pub async fn start(upstream: SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::from_listener(listener, upstream)
    }

    /// Rebind on a specific address, restoring a previously stopped proxy.
    pub async fn start_on(addr: SocketAddr, upstream: SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        Self::from_listener(listener, upstream)
    }

    fn from_listener(listener: tokio::net::TcpListener, upstream: SocketAddr) -> Self {
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            // Connection tasks live in the JoinSet, so aborting the accept
            // task tears every forwarded stream down with it.
            let mut conns = tokio::task::JoinSet::new();
            loop {
                if let Ok((mut inbound, _)) = listener.accept().await {
                    conns.spawn(async move {
                        if let Ok(mut outbound) =
                            tokio::net::TcpStream::connect(upstream).await
                        {
                            let _ =
                                tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                        }
                    });
                }
            }
        });
        Self { addr, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drop the listener and kill every forwarded connection.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Spawn a relay on an ephemeral port for live WebSocket tests.
///
/// Returns the HTTP base URL and the shared state for store assertions.
pub async fn spawn_relay(mode: DeliveryMode) -> (String, AppState) {
    let db = Database::in_memory().await.unwrap();
    let config = RelayConfig {
        delivery_mode: mode,
        ..RelayConfig::default()
    };
    let state = AppState::new(&db, &config);
    let router = api::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state)
}
