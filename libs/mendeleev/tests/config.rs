//! Client configuration loaded through the shared layered loader

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;

use common::load_config;
use mendeleev::{ClientConfig, Context, ErrorRecovery, RecoveryMode, TcpConfig, TransportConfig};

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn yaml_file_layers_over_defaults() {
    let file = yaml_file(
        r#"
slave: 2
error_recovery: [protocol]
transport:
  type: tcp
  host: 10.1.1.7
  port: 502
"#,
    );

    let config: ClientConfig = load_config(Some(file.path()), "MENDCFG_YAML_").unwrap();

    assert_eq!(config.slave, Some(2));
    assert_eq!(config.response_timeout_ms, 500);
    assert_eq!(config.error_recovery, vec![RecoveryMode::Protocol]);
    let TransportConfig::Tcp(tcp) = &config.transport else {
        panic!("expected tcp transport");
    };
    assert_eq!(tcp.host, "10.1.1.7");
    assert_eq!(tcp.port, 502);
    assert_eq!(tcp.connect_timeout_ms, TcpConfig::default().connect_timeout_ms);

    let ctx = Context::from_config(&config).unwrap();
    assert_eq!(ctx.error_recovery(), ErrorRecovery::PROTOCOL);
    assert_eq!(ctx.slave(), Some(2));
}

#[test]
fn environment_overrides_file() {
    let file = yaml_file(
        r#"
slave: 2
byte_timeout_ms: 100
transport:
  type: tcp
  host: 10.1.1.7
"#,
    );

    std::env::set_var("MENDCFG_ENV_BYTE_TIMEOUT_MS", "0");
    std::env::set_var("MENDCFG_ENV_TRANSPORT__PORT", "6020");
    let config: ClientConfig = load_config(Some(file.path()), "MENDCFG_ENV_").unwrap();
    std::env::remove_var("MENDCFG_ENV_BYTE_TIMEOUT_MS");
    std::env::remove_var("MENDCFG_ENV_TRANSPORT__PORT");

    assert_eq!(config.byte_timeout_ms, 0);
    let TransportConfig::Tcp(tcp) = &config.transport else {
        panic!("expected tcp transport");
    };
    assert_eq!(tcp.host, "10.1.1.7");
    assert_eq!(tcp.port, 6020);

    let ctx = Context::from_config(&config).unwrap();
    assert!(ctx.byte_timeout().is_zero());
}

#[test]
fn invalid_values_are_rejected_when_building() {
    let file = yaml_file(
        r#"
response_timeout_ms: 0
transport:
  type: tcp
"#,
    );

    let config: ClientConfig = load_config(Some(file.path()), "MENDCFG_INVALID_").unwrap();
    assert!(Context::from_config(&config).is_err());
}
