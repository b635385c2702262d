//! Config schema with strict parsing.
//!
//! `deny_unknown_fields` prevents silent misconfiguration.

use std::collections::HashMap;

use serde::Deserialize;

use portico_core::error::{GatewayError, Result};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Routing hints: chat-platform channel name -> agent id.
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut defaults = 0usize;
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(GatewayError::InvalidMessage("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(GatewayError::InvalidMessage(format!(
                    "duplicate agent id: {}",
                    agent.id
                )));
            }
            if agent.is_default {
                defaults += 1;
            }
        }
        if defaults > 1 {
            return Err(GatewayError::InvalidMessage(
                "at most one agent may be marked default".into(),
            ));
        }
        for (channel, agent_id) in &self.routes {
            if !seen.contains(agent_id.as_str()) {
                return Err(GatewayError::InvalidMessage(format!(
                    "route {channel} targets unknown agent: {agent_id}"
                )));
            }
        }
        if self.auth.mode == AuthMode::Password && self.auth.password.is_none() {
            return Err(GatewayError::InvalidMessage(
                "auth.password is required in password mode".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Heartbeat ping cadence.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Nodes silent longer than this are swept and their sockets closed.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_nodes: default_max_nodes(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9800".into()
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_ping_timeout_ms() -> u64 {
    60_000
}

fn default_max_nodes() -> usize {
    256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    Token,
    Password,
    TransportIdentity,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, rename = "default")]
    pub is_default: bool,
    /// Workspace hint passed through to the invoker.
    #[serde(default)]
    pub workdir: Option<String>,
}

fn default_enabled() -> bool {
    true
}
