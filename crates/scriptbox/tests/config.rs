//! Tests for loading engine configuration from TOML files.

use std::{io::Write, time::Duration};

use pretty_assertions::assert_eq;
use scriptbox::{BatchOptions, ConfigError, Engine, EngineConfig, EngineError, RemoteConfig};

#[test]
fn file_settings_reach_the_engine() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "timeout_ms = 250\nmax_operations = 100000\necho_inputs = true\nfixed_seed = 42\nscript_name = \"solution.py\""
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.timeout_ms, 250);
    assert_eq!(config.limits().max_duration, Some(Duration::from_millis(250)));
    assert_eq!(config.limits().max_operations, Some(100_000));

    let mut engine = Engine::new(config).unwrap();
    let result = engine.run_once("print(1 / 0)\n", "", None, &BatchOptions::default()).unwrap();
    assert!(result.stderr.contains("File \"solution.py\", line 1"), "{}", result.stderr);
}

#[test]
fn saved_configuration_loads_back_unchanged() {
    let config = EngineConfig::default()
        .timeout(Duration::from_secs(3))
        .fixed_seed(7)
        .remote(RemoteConfig::new("https://judge0.example.com").auth_token("secret"));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scriptbox.toml");
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let error = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(error, ConfigError::Io { .. }), "{error:?}");
}

#[test]
fn invalid_configuration_is_rejected_by_the_engine() {
    let config = EngineConfig {
        script_name: String::new(),
        ..EngineConfig::default()
    };
    assert!(matches!(Engine::new(config), Err(EngineError::Config(ConfigError::Invalid(_)))));
}
