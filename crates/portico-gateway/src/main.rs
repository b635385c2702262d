//! portico Gateway
//!
//! Accepts long-lived client connections on one port, routes agent requests
//! to per-session single-flight workers, and fans streamed agent events back
//! to every subscriber. The dev binary wires the echo invoker and the
//! in-memory session store; embedders construct `Gateway` with their own.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use portico_gateway::agent::{DevEchoInvoker, MemorySessionStore};
use portico_gateway::hooks::NoopHooks;
use portico_gateway::server::Gateway;
use portico_gateway::{app_state, config, router};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg = config::load_from_file("portico.yaml").expect("config load failed");
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .expect("gateway.listen must be a valid SocketAddr");

    let gateway = Gateway::new(
        cfg,
        Arc::new(DevEchoInvoker),
        Arc::new(MemorySessionStore::new()),
        Arc::new(NoopHooks),
    );
    gateway.start();

    let app = router::build_router(app_state::AppState::new(gateway.clone()));

    tracing::info!(%listen, "portico-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .expect("failed to bind");

    axum::serve(listener, app).await.expect("server failed");
    gateway.stop();
}
