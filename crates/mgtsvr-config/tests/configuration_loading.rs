//! Layered loading through the generated `ortho_config` entry points.

use std::ffi::OsString;
use std::fs;

use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use mgtsvr_config::{AuthPolicy, Config, ConfigError, DEFAULT_TCP_PORT};

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn load_with_file(dir: &TempDir, contents: &str) -> Config {
    let path = dir.path().join("mgtsvr.toml");
    fs::write(&path, contents).expect("write configuration");
    let args = vec![
        OsString::from("fortune-server"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];
    Config::load_from_iter(args).expect("configuration should load")
}

#[rstest]
fn file_values_override_defaults(temp_dir: TempDir) {
    let config = load_with_file(
        &temp_dir,
        "tcp_port = 4242\nauth_policy = 2\nworker_threads = 8\nprompt = true\n",
    );

    assert_eq!(config.tcp_port, 4242);
    assert_eq!(config.policy(), AuthPolicy::Plaintext);
    assert_eq!(config.worker_threads, 8);
    assert!(config.prompt);
    assert!(config.tcp_enabled);
}

#[rstest]
fn omitted_keys_keep_defaults(temp_dir: TempDir) {
    let config = load_with_file(&temp_dir, "banner = false\n");

    assert_eq!(config.tcp_port, DEFAULT_TCP_PORT);
    assert_eq!(config.policy(), AuthPolicy::ChallengeResponse);
    assert_eq!(config.validate(), Ok(()));
}

#[rstest]
fn loaded_zero_worker_configuration_fails_validation(temp_dir: TempDir) {
    let config = load_with_file(&temp_dir, "worker_threads = 0\n");

    assert!(matches!(
        config.validate(),
        Err(ConfigError::WorkerThreads { requested: 0, .. })
    ));
}

#[rstest]
fn malformed_file_is_rejected(temp_dir: TempDir) {
    let path = temp_dir.path().join("mgtsvr.toml");
    fs::write(&path, "tcp_port = \"not a number\"\n").expect("write configuration");
    let args = vec![
        OsString::from("fortune-server"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    assert!(Config::load_from_iter(args).is_err());
}
