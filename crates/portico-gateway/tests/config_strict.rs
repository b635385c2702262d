#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use portico_gateway::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
gateway:
  listen: "0.0.0.0:9800"
agents:
  - id: "a1"
    enabeld: true # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "INVALID_MESSAGE");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
agents:
  - id: "a1"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.gateway.listen, "0.0.0.0:9800");
    assert_eq!(cfg.gateway.ping_interval_ms, 30_000);
    assert_eq!(cfg.gateway.ping_timeout_ms, 60_000);
    assert_eq!(cfg.agents[0].id, "a1");
    assert!(cfg.agents[0].enabled);
}

#[test]
fn duplicate_agent_ids_fail() {
    let bad = r#"
agents:
  - id: "a1"
  - id: "a1"
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn at_most_one_default_agent() {
    let bad = r#"
agents:
  - id: "a1"
    default: true
  - id: "a2"
    default: true
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn password_mode_requires_a_password() {
    let bad = r#"
auth:
  mode: "password"
agents:
  - id: "a1"
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn routes_must_target_known_agents() {
    let bad = r#"
agents:
  - id: "a1"
routes:
  "support": "ghost"
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn auth_modes_parse() {
    let ok = r#"
auth:
  mode: "transport-identity"
agents:
  - id: "a1"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.auth.mode, config::AuthMode::TransportIdentity);
}
