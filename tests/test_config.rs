mod common;
use common::*;
use solarmax_bridge::prelude::*;

use std::io::Write;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn reads_config_file_with_defaults() -> Result<()> {
    common_setup();
    let file = write_config(
        r#"
buses:
  - host: 192.168.1.50
    port: 12345
    inverters: [1, 2, 3]
"#,
    );

    let config = ConfigWrapper::new(&file.path().to_string_lossy())?;

    assert_eq!(config.poll_interval(), Duration::from_secs(60));
    assert_eq!(config.loglevel(), "info");

    let bus = &config.buses()[0];
    assert!(bus.enabled());
    assert_eq!(bus.host(), "192.168.1.50");
    assert_eq!(bus.inverters(), &[1, 2, 3]);

    let settings = bus.settings();
    assert_eq!(settings.to_string(), "192.168.1.50:12345");
    assert_eq!(settings.connect_timeout, Duration::from_secs(2));
    assert_eq!(settings.io_timeout, Duration::from_secs(10));
    assert!(settings.use_tcp_nodelay);
    assert_eq!(settings.reconnect_delay, Duration::from_millis(1000));
    assert_eq!(settings.max_reconnect_delay, Duration::from_millis(60000));

    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let err = ConfigWrapper::new("/nonexistent/solarmax.yaml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/solarmax.yaml"));
}

#[test]
fn overrides_and_models() -> Result<()> {
    let config = Config::from_yaml(
        r#"
buses:
  - host: inverters.local
    port: 12345
    inverters: [1]
    read_timeout: 3
    use_tcp_nodelay: false
  - enabled: false
    host: ""
    port: 0
    inverters: []
models:
  - type_code: 20100
    description: SolarMax 10MT
    max_watts: 10000
poll_interval: 15
loglevel: debug
"#,
    )?;
    let config = ConfigWrapper::from_config(config);

    assert_eq!(config.buses().len(), 2);
    assert_eq!(config.enabled_buses().len(), 1);
    assert_eq!(config.poll_interval(), Duration::from_secs(15));
    assert_eq!(config.loglevel(), "debug");

    let settings = config.enabled_buses()[0].settings();
    assert_eq!(settings.io_timeout, Duration::from_secs(3));
    assert!(!settings.use_tcp_nodelay);

    let tables = config.tables();
    assert_eq!(tables.model(20100).unwrap().max_watts, 10000);
    // built-in models remain
    assert_eq!(tables.model(20020).unwrap().description, "SolarMax 3000S");

    Ok(())
}

#[test]
fn rejects_invalid_buses() {
    let cases = [
        ("port: 0\n    host: a\n    inverters: [1]", "port"),
        ("port: 1\n    host: \"\"\n    inverters: [1]", "host"),
        ("port: 1\n    host: a\n    inverters: []", "inverters"),
        ("port: 1\n    host: a\n    inverters: [100]", "above"),
        ("port: 1\n    host: a\n    inverters: [1, 1]", "duplicate"),
        (
            "port: 1\n    host: a\n    inverters: [1]\n    read_timeout: 0",
            "timeouts",
        ),
    ];

    for (bus, expected) in cases {
        let yaml = format!("buses:\n  - {}\n", bus);
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{:?} gave {:?}",
            bus,
            err.to_string()
        );
    }
}

#[test]
fn rejects_zero_poll_interval() {
    let yaml = Factory::config_yaml(1, &[1]).replace("poll_interval: 1", "poll_interval: 0");

    let err = Config::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("poll_interval"));
}
