//! Internal lifecycle hooks.
//!
//! Best-effort notifications to the embedding process. Deliveries run on
//! spawned tasks and failures are swallowed; a broken hook must never stall
//! or fail a message handler.

use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum HookEvent {
    GatewayStartup { version: String },
    SessionStart { session_key: String, agent_id: String },
    MessageReceived { session_key: String, client_id: Option<String> },
}

#[async_trait]
pub trait InternalHooks: Send + Sync {
    async fn notify(&self, event: HookEvent);
}

#[derive(Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl InternalHooks for NoopHooks {
    async fn notify(&self, _event: HookEvent) {}
}

/// Fire-and-forget dispatch off the caller's task.
pub fn emit(hooks: &Arc<dyn InternalHooks>, event: HookEvent) {
    let hooks = hooks.clone();
    tokio::spawn(async move {
        hooks.notify(event).await;
    });
}
