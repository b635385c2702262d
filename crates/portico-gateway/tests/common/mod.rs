//! Shared harness: an in-process gateway with a scriptable invoker and
//! channel-backed client sockets, so the full dispatch path runs without a
//! real listener.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use portico_core::protocol::validate;
use portico_gateway::agent::{
    AgentEventStream, AgentInvoker, Invocation, MemorySessionStore,
};
use portico_gateway::config;
use portico_gateway::hooks::NoopHooks;
use portico_gateway::server::Gateway;
use portico_gateway::transport::Socket;

pub const BASIC_CFG: &str = r#"
agents:
  - id: "a1"
    default: true
"#;

pub struct ActiveInvocation {
    pub invocation: Invocation,
    events: Option<mpsc::UnboundedSender<portico_core::Result<Value>>>,
    pub signal: CancellationToken,
}

/// Invoker whose streams stay open until the test emits/fails/finishes them.
#[derive(Default)]
pub struct ScriptedInvoker {
    invocations: Mutex<Vec<ActiveInvocation>>,
}

impl ScriptedInvoker {
    pub fn count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn content_of(&self, i: usize) -> String {
        self.invocations.lock().unwrap()[i].invocation.content.clone()
    }

    pub fn session_key_of(&self, i: usize) -> String {
        self.invocations.lock().unwrap()[i]
            .invocation
            .session_key
            .clone()
    }

    pub fn signal(&self, i: usize) -> CancellationToken {
        self.invocations.lock().unwrap()[i].signal.clone()
    }

    pub fn emit(&self, i: usize, ev: Value) {
        let guard = self.invocations.lock().unwrap();
        if let Some(tx) = guard[i].events.as_ref() {
            let _ = tx.send(Ok(ev));
        }
    }

    pub fn fail(&self, i: usize, message: &str) {
        let guard = self.invocations.lock().unwrap();
        if let Some(tx) = guard[i].events.as_ref() {
            let _ = tx.send(Err(portico_core::GatewayError::Internal(message.into())));
        }
    }

    /// Close the event stream: the invocation completes.
    pub fn finish(&self, i: usize) {
        self.invocations.lock().unwrap()[i].events = None;
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: Invocation,
        signal: CancellationToken,
    ) -> portico_core::Result<AgentEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.invocations.lock().unwrap().push(ActiveInvocation {
            invocation: request,
            events: Some(tx),
            signal: signal.clone(),
        });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.take_until(signal.cancelled_owned()).boxed())
    }
}

pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub invoker: Arc<ScriptedInvoker>,
    pub store: Arc<MemorySessionStore>,
}

pub fn gateway_with(cfg_yaml: &str) -> TestGateway {
    let cfg = config::load_from_str(cfg_yaml).unwrap();
    let invoker = Arc::new(ScriptedInvoker::default());
    let store = Arc::new(MemorySessionStore::new());
    let gateway = Gateway::new(cfg, invoker.clone(), store.clone(), Arc::new(NoopHooks));
    TestGateway {
        gateway,
        invoker,
        store,
    }
}

pub fn basic_gateway() -> TestGateway {
    gateway_with(BASIC_CFG)
}

/// Poll `f` until true or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(f: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !f() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        sleep(Duration::from_millis(5)).await;
    }
}

pub struct TestClient {
    pub socket: Arc<Socket>,
    rx: mpsc::Receiver<Message>,
}

impl TestClient {
    /// Attach a channel-backed socket and run the handshake.
    pub async fn connect(gw: &TestGateway, client_type: &str) -> Self {
        let mut client = Self::attach(gw);
        client
            .send(
                gw,
                serde_json::json!({
                    "type": "connect",
                    "id": "h1",
                    "client": { "instanceId": format!("client-{}", client.socket.id()), "clientType": client_type },
                    "timestamp": 1
                }),
            )
            .await;
        let res = client.recv().await;
        assert_eq!(res["type"], "res");
        assert_eq!(res["ok"], true);
        assert_eq!(res["payload"], "gateway-ready");
        client
    }

    /// Attach without handshaking (for auth tests).
    pub fn attach(gw: &TestGateway) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let socket = Socket::channel(tx);
        gw.gateway.attach_socket(socket.clone());
        Self { socket, rx }
    }

    pub async fn send(&self, gw: &TestGateway, frame: Value) {
        let env = validate::parse_envelope(&frame.to_string()).unwrap();
        gw.gateway.handle_envelope(&self.socket, env).await;
    }

    pub async fn recv(&mut self) -> Value {
        let msg = timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket channel closed");
        match msg {
            Message::Text(s) => serde_json::from_str(&s).unwrap(),
            other => panic!("unexpected non-text frame: {other:?}"),
        }
    }

    /// Skip frames until one matches.
    pub async fn recv_matching<F: Fn(&Value) -> bool>(&mut self, pred: F) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no matching frame arrived"
            );
            let frame = self.recv().await;
            if pred(&frame) {
                return frame;
            }
        }
    }

    /// Assert nothing arrives for a short window.
    pub async fn expect_silence(&mut self) {
        match timeout(Duration::from_millis(100), self.rx.recv()).await {
            Err(_) => {}
            Ok(Some(msg)) => panic!("unexpected frame: {msg:?}"),
            Ok(None) => {}
        }
    }
}
