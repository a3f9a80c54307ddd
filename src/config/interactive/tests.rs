use super::load_existing_config as load_existing_config_impl;
use super::*;
use crate::config::settings::HOME_ENV_VAR;
use serial_test::serial;
use tempfile::TempDir;

#[test]
#[serial]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with every other test touching the environment
    unsafe { std::env::set_var(HOME_ENV_VAR, temp_dir.path()) };
    let config = load_existing_config_impl();
    // SAFETY: as above
    unsafe { std::env::remove_var(HOME_ENV_VAR) };

    let config = config.expect("config loaded successfully");
    assert_eq!(config.base_dir, temp_dir.path());
    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.model.is_empty());
    assert!(config.ollama.batch_size > 0);
}

#[test]
fn model_name_validation() {
    assert!(non_empty(&"all-minilm".to_string()).is_ok());
    assert!(non_empty(&"   ".to_string()).is_err());
}

#[test]
fn unreachable_ollama_reports_failure() {
    let ollama = OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..OllamaConfig::default()
    };
    let reachable = test_ollama_connection(&ollama).expect("connection test never errors");
    assert!(!reachable);
}
