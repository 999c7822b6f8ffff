//! Integration tests for metrics server functionality.

use lumberyard_core::config::MetricsConfig;
use lumberyard_daemon::metrics_server;
use serial_test::serial;

#[test]
fn test_listen_addr_parses_ip_and_port() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_string(),
        port: 19100,
    };

    let addr = metrics_server::listen_addr(&config).expect("should parse");
    assert_eq!(addr.to_string(), "127.0.0.1:19100");
}

#[test]
#[serial]
fn test_install_metrics_recorder_fails_with_invalid_address() {
    // Given: An invalid metrics configuration (invalid IP)
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "999.999.999.999".to_string(),
        port: 9100,
    };

    // When: Installing the metrics recorder
    let result = metrics_server::install_metrics_recorder(&config);

    // Then: Should fail before touching the global recorder
    let err = result.expect_err("invalid address should be rejected");
    assert!(err.to_string().contains("invalid metrics listen address"));
}

#[tokio::test]
#[serial]
async fn test_install_metrics_recorder_succeeds_with_valid_config() {
    // Given: A valid metrics configuration
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_string(),
        port: 19101,
    };

    // When: Installing the metrics recorder
    let result = metrics_server::install_metrics_recorder(&config);

    // Then: Should succeed
    assert!(
        result.is_ok(),
        "install_metrics_recorder should succeed with valid config: {:?}",
        result.err()
    );

    // A second install fails because the global recorder is already set
    let config = MetricsConfig {
        port: 19102,
        ..config
    };
    assert!(metrics_server::install_metrics_recorder(&config).is_err());
}
