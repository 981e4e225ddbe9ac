use job_runner::ExitPolicy;
use runner_config::{ConfigError, ConfigManager, JobFile, RunnerSettings, Schema};
use serde_json::json;
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn setup_config_dir() -> (TempDir, ConfigManager) {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let manager = ConfigManager::with_dir(config_dir);
    (temp_dir, manager)
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn given_no_settings_file_when_load_then_schema_defaults() {
    let (_temp_dir, manager) = setup_config_dir();

    let settings = manager.load_settings_with(no_env).unwrap();

    assert_eq!(settings, RunnerSettings::default());
}

#[test]
fn given_partial_settings_file_when_load_then_missing_keys_default() {
    let (_temp_dir, manager) = setup_config_dir();
    fs::write(
        manager.config_dir().join("runner.json"),
        r#"{ "runtime": "podman", "stopTimeout": "1m 30s", "waitTimeout": "2h" }"#,
    )
    .unwrap();

    let settings = manager.load_settings_with(no_env).unwrap();

    assert_eq!(settings.runtime, "podman");
    assert_eq!(settings.stop_timeout, Duration::from_secs(90));
    assert_eq!(settings.wait_timeout, Some(Duration::from_secs(7200)));
    assert_eq!(settings.exit_policy, ExitPolicy::Ignore);
    assert_eq!(settings.mount_target, "/fenics/home/shared");
}

#[test]
fn given_environment_overrides_when_load_then_they_win_over_file() {
    let (_temp_dir, manager) = setup_config_dir();
    fs::write(
        manager.config_dir().join("runner.json"),
        r#"{ "runtime": "podman", "exitPolicy": "ignore" }"#,
    )
    .unwrap();

    let settings = manager
        .load_settings_with(|key| match key {
            "RUNNER_CONTAINER_RUNTIME" => Some("/usr/local/bin/docker".to_string()),
            "RUNNER_FAIL_ON_NONZERO" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();

    assert_eq!(settings.runtime, "/usr/local/bin/docker");
    assert_eq!(settings.exit_policy, ExitPolicy::FailOnNonZero);
}

#[test]
fn given_invalid_settings_when_load_then_every_violation_is_reported() {
    let (_temp_dir, manager) = setup_config_dir();
    fs::write(
        manager.config_dir().join("runner.json"),
        r#"{ "runtime": "", "exitPolicy": "sometimes", "unknownKey": true }"#,
    )
    .unwrap();

    let err = manager.load_settings_with(no_env).unwrap_err();

    match err {
        ConfigError::ValidationFailed { errors, .. } => {
            assert!(errors.len() >= 3, "{errors:?}");
            assert!(errors.iter().any(|e| e.json_pointer == "/runtime"));
            assert!(errors.iter().any(|e| e.json_pointer == "/exitPolicy"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn given_unparseable_duration_when_load_then_parse_error() {
    let (_temp_dir, manager) = setup_config_dir();
    fs::write(
        manager.config_dir().join("runner.json"),
        r#"{ "stopTimeout": "whenever" }"#,
    )
    .unwrap();

    let err = manager.load_settings_with(no_env).unwrap_err();
    assert!(matches!(err, ConfigError::JsonParsingFailed { .. }), "{err:?}");
}

#[test]
fn given_malformed_json_when_load_then_parse_error() {
    let (_temp_dir, manager) = setup_config_dir();
    fs::write(manager.config_dir().join("runner.json"), "{ not json").unwrap();

    let err = manager.load_settings_with(no_env).unwrap_err();
    assert!(matches!(err, ConfigError::JsonParsingFailed { .. }));
}

#[test]
fn given_job_file_when_load_then_paths_resolve_beside_it() {
    let temp_dir = TempDir::new().unwrap();
    let job_path = temp_dir.path().join("beam.job.json");
    fs::write(
        &job_path,
        r#"{
            "payload": "bending_beam.py",
            "args": ["1.0", "result.json"],
            "workspace": "output",
            "name": "beam-1",
            "labels": { "study": "cantilever" }
        }"#,
    )
    .unwrap();

    let job = ConfigManager::load_job(&job_path).unwrap();

    assert_eq!(job.payload, Some(temp_dir.path().join("bending_beam.py")));
    assert_eq!(job.workspace, Some(temp_dir.path().join("output")));
    assert_eq!(job.args, ["1.0", "result.json"]);
    assert_eq!(job.name.as_deref(), Some("beam-1"));
    assert_eq!(job.labels.get("study").map(String::as_str), Some("cantilever"));
    assert_eq!(job.image, None);
}

#[test]
fn given_job_without_payload_when_load_then_validation_fails() {
    let temp_dir = TempDir::new().unwrap();
    let job_path = temp_dir.path().join("job.json");
    fs::write(&job_path, r#"{ "image": "test/echo" }"#).unwrap();

    let err = ConfigManager::load_job(&job_path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    assert!(err.to_string().contains("payload"), "{err}");
}

#[test]
fn given_job_with_bad_name_when_validate_then_rejected() {
    let result = ConfigManager::validate_value(
        Schema::Job,
        &json!({ "payload": "x.py", "name": "has space", "mountTarget": "relative" }),
    );
    match result {
        Err(ConfigError::ValidationFailed { errors, .. }) => {
            assert!(errors.iter().any(|e| e.json_pointer == "/name"));
            assert!(errors.iter().any(|e| e.json_pointer == "/mountTarget"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn given_missing_job_file_when_load_then_not_found() {
    let err = ConfigManager::load_job(&PathBuf::from("/nonexistent/job.json")).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigFileNotFound { .. }));
}

#[test]
fn given_job_file_and_flags_when_resolved_then_invocation_is_staged() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("bending_beam.py"), "print(1)\n").unwrap();
    let job_path = temp_dir.path().join("job.json");
    fs::write(
        &job_path,
        r#"{ "payload": "bending_beam.py", "image": "from/file", "args": ["1.0"] }"#,
    )
    .unwrap();

    let flags = JobFile {
        workspace: Some(temp_dir.path().join("runs")),
        args: vec!["2.0".into()],
        ..JobFile::default()
    };
    let invocation = ConfigManager::load_job(&job_path)
        .unwrap()
        .overlay(flags)
        .into_invocation(&RunnerSettings::default(), |stem| format!("{stem}-1"))
        .unwrap();

    assert_eq!(invocation.image, "from/file");
    assert_eq!(invocation.args, ["2.0"]);
    assert_eq!(invocation.name, "bending_beam-1");
    assert!(temp_dir.path().join("runs/bending_beam.py").is_file());
}

#[test]
#[serial]
fn given_config_dir_env_when_new_then_it_is_used() {
    let temp_dir = TempDir::new().unwrap();
    std::env::set_var("RUNNER_CONFIG_DIR", temp_dir.path());
    let manager = ConfigManager::new();
    std::env::remove_var("RUNNER_CONFIG_DIR");

    assert_eq!(manager.config_dir(), temp_dir.path());
}

#[test]
#[serial]
fn given_unset_config_dir_env_when_new_then_default_dir() {
    std::env::remove_var("RUNNER_CONFIG_DIR");
    let manager = ConfigManager::new();
    assert_eq!(manager.config_dir(), Path::new(".runner/config"));
}

#[test]
#[serial]
fn given_process_environment_when_load_settings_then_overrides_apply() {
    let (_temp_dir, manager) = setup_config_dir();
    std::env::set_var("RUNNER_STOP_TIMEOUT", "250ms");
    let result = manager.load_settings();
    std::env::remove_var("RUNNER_STOP_TIMEOUT");

    assert_eq!(result.unwrap().stop_timeout, Duration::from_millis(250));
}
