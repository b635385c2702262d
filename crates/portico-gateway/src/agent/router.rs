//! Agent selection and session-key derivation.
//!
//! Both functions are pure over the static config: the same request inputs
//! always resolve to the same agent and session key, so repeated requests
//! from one logical origin collapse onto one session.

use std::collections::HashMap;

use portico_core::protocol::RoutingHints;

use crate::config::{AgentConfig, GatewayConfig};

pub struct AgentRouter {
    agents: HashMap<String, AgentConfig>,
    default_agent: Option<String>,
    channel_routes: HashMap<String, String>,
}

impl AgentRouter {
    pub fn new(cfg: &GatewayConfig) -> Self {
        let agents: HashMap<String, AgentConfig> = cfg
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();
        let default_agent = cfg
            .agents
            .iter()
            .find(|a| a.is_default && a.enabled)
            .or_else(|| cfg.agents.iter().find(|a| a.enabled))
            .map(|a| a.id.clone());
        Self {
            agents,
            default_agent,
            channel_routes: cfg.routes.clone(),
        }
    }

    fn enabled(&self, id: &str) -> bool {
        self.agents.get(id).map(|a| a.enabled).unwrap_or(false)
    }

    /// Resolve the agent for a request. An explicitly named agent must exist
    /// and be enabled; otherwise a channel route, then the configured
    /// default.
    pub fn select_agent(
        &self,
        requested: Option<&str>,
        routing: Option<&RoutingHints>,
    ) -> Option<String> {
        if let Some(id) = requested {
            return self.enabled(id).then(|| id.to_string());
        }
        if let Some(channel) = routing.and_then(|r| r.channel.as_deref()) {
            if let Some(id) = self.channel_routes.get(channel) {
                if self.enabled(id) {
                    return Some(id.clone());
                }
            }
        }
        self.default_agent.clone()
    }

    /// Deterministic session key for an agent and origin. The origin is the
    /// channel hint when present, the peer hint otherwise, `main` as the
    /// fallback for direct clients.
    pub fn build_session_key(&self, agent_id: &str, routing: Option<&RoutingHints>) -> String {
        let origin = routing
            .and_then(|r| r.channel.as_deref().or(r.peer.as_deref()))
            .unwrap_or("main");
        format!("agent:{agent_id}:{origin}")
    }

    /// Workspace hint for the invoker, from static agent config.
    pub fn agent_workdir(&self, agent_id: &str) -> Option<String> {
        self.agents.get(agent_id).and_then(|a| a.workdir.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config;

    fn router() -> AgentRouter {
        let cfg = config::load_from_str(
            r#"
agents:
  - id: "general"
    default: true
  - id: "support"
  - id: "retired"
    enabled: false
routes:
  "help-desk": "support"
"#,
        )
        .unwrap();
        AgentRouter::new(&cfg)
    }

    fn channel_hint(channel: &str) -> RoutingHints {
        RoutingHints {
            channel: Some(channel.into()),
            ..RoutingHints::default()
        }
    }

    #[test]
    fn explicit_agent_must_exist_and_be_enabled() {
        let r = router();
        assert_eq!(r.select_agent(Some("support"), None).as_deref(), Some("support"));
        assert_eq!(r.select_agent(Some("retired"), None), None);
        assert_eq!(r.select_agent(Some("ghost"), None), None);
    }

    #[test]
    fn channel_route_refines_the_default() {
        let r = router();
        let hints = channel_hint("help-desk");
        assert_eq!(r.select_agent(None, Some(&hints)).as_deref(), Some("support"));
        let other = channel_hint("random");
        assert_eq!(r.select_agent(None, Some(&other)).as_deref(), Some("general"));
        assert_eq!(r.select_agent(None, None).as_deref(), Some("general"));
    }

    #[test]
    fn session_keys_are_deterministic() {
        let r = router();
        let hints = channel_hint("help-desk");
        assert_eq!(
            r.build_session_key("support", Some(&hints)),
            r.build_session_key("support", Some(&hints)),
        );
        assert_eq!(r.build_session_key("general", None), "agent:general:main");
    }
}
