//! WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS, capturing the proxy-supplied transport identity
//! - Create the socket handle and its writer task
//! - Decode once and hand envelopes to the gateway dispatch
//! - Run the standard cleanup path on disconnect

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use portico_core::protocol::Envelope;

use crate::{app_state::AppState, transport::codec, transport::Socket};

/// Outbound queue depth per socket. Slow consumers start losing lossy frames
/// once this backs up; reliable sends block up to their timeout.
const OUTBOUND_QUEUE: usize = 1024;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let transport_user = headers
        .get("x-forwarded-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    ws.on_upgrade(move |socket| handle_socket(state, transport_user, socket))
}

async fn handle_socket(state: AppState, transport_user: Option<String>, ws: WebSocket) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let socket = Socket::channel(out_tx);
    if let Some(user) = transport_user {
        socket.set_transport_user(user);
    }

    let gateway = state.gateway().clone();
    gateway.attach_socket(socket.clone());

    let span = tracing::info_span!("gateway_conn", socket = socket.id());

    // Writer task: the only place the WS sink is touched.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let closed = socket.closed_token();

    async {
        loop {
            tokio::select! {
                _ = closed.cancelled() => break,

                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(msg)) => match codec::decode(msg) {
                            Ok(codec::Inbound::Envelope(env)) => {
                                gateway.handle_envelope(&socket, env).await;
                            }
                            Ok(codec::Inbound::Ping(_)) | Ok(codec::Inbound::Pong(_)) => {
                                // WS-level keep-alive; protocol liveness rides
                                // on ping/pong envelopes instead.
                            }
                            Ok(codec::Inbound::Close) => break,
                            Err(e) => {
                                tracing::debug!(code = %e.code().as_str(), err = %e, "decode failed");
                                socket.send(&Envelope::error(e.code(), e.to_string()));
                            }
                        },
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }
    }
    .instrument(span)
    .await;

    gateway.handle_disconnect(&socket);
    writer.abort();
}
