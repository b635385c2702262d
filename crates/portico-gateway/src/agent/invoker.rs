//! The seam to the agent runtime.
//!
//! The gateway consumes an async stream of opaque JSON events per
//! invocation; what produces them (a model loop, a subprocess, a remote
//! runtime) is not its concern. The stream must terminate when the agent is
//! done or the cancel signal trips.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use portico_core::error::Result;
use portico_core::protocol::Attachment;

/// Mid-stream errors surface as `Err` items; the scheduler synthesizes an
/// `agent-error` event for observers when the invoker did not emit one.
pub type AgentEventStream = BoxStream<'static, Result<Value>>;

#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent_id: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub session_key: String,
    pub workdir: Option<String>,
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: Invocation,
        signal: CancellationToken,
    ) -> Result<AgentEventStream>;
}

/// Development invoker used by the dev binary and the integration tests:
/// echoes the content back as a single `token` event, then ends.
#[derive(Debug, Default)]
pub struct DevEchoInvoker;

#[async_trait]
impl AgentInvoker for DevEchoInvoker {
    async fn invoke(
        &self,
        request: Invocation,
        signal: CancellationToken,
    ) -> Result<AgentEventStream> {
        let events = vec![Ok(json!({
            "type": "token",
            "text": request.content,
        }))];
        Ok(stream::iter(events)
            .take_until(signal.cancelled_owned())
            .boxed())
    }
}
