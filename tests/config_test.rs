//! Tests for loading configuration files.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use sluice::config::Config;
use sluice::{BridgeContext, OperationKind, SluiceError};

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn load_from_explicit_path() {
    let file = config_file(
        r#"
        [buffer]
        capacity = 16

        [executor]
        io_threads = 2
        thread_name = "pipe"

        [strategy]
        offload = ["produce_payload"]
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.buffer.capacity, 16);
    assert_eq!(config.executor.io_threads(), 2);
    assert_eq!(config.executor.thread_name, "pipe");

    let strategy = config.strategy.strategy();
    assert!(strategy.offloads(OperationKind::ProducePayload));
    assert!(!strategy.offloads(OperationKind::ConsumePayload));
}

#[test]
fn empty_file_is_all_defaults() {
    let file = config_file("");
    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.buffer.capacity, 4);
    assert_eq!(config.executor.max_blocking_threads, 64);
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let file = config_file("[buffer]\ncapacity = 0\n");
    let err = Config::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(ref msg) if msg.contains("capacity")));
}

#[test]
fn malformed_toml_is_a_configuration_error() {
    let file = config_file("[buffer\ncapacity = ");
    let err = Config::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(ref msg) if msg.contains("parse")));
}

#[test]
fn missing_explicit_path_is_an_error() {
    let missing = Path::new("/definitely/not/here/sluice.toml");
    assert!(matches!(
        Config::load(Some(missing)),
        Err(SluiceError::Configuration(_))
    ));
    // No fallback to defaults when the caller named a file.
    assert!(Config::load_or_default(Some(missing)).is_err());
}

#[test]
fn bridge_context_follows_the_config() {
    let file = config_file(
        r#"
        [buffer]
        capacity = 3

        [executor]
        io_threads = 1

        [strategy]
        offload = []
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    let bridge = BridgeContext::from_config(&config).unwrap();
    assert_eq!(bridge.capacity(), 3);
    assert!(!bridge.policy().should_offload(OperationKind::ProducePayload));
}
