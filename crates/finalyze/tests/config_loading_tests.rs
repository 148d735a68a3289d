//! Table-driven tests for configuration loading and validation.

mod common;

use std::time::Duration;

use finalyze::config::{load_config, load_config_from_str, Config};

use common::TestHarness;

struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Substring expected in the error message when loading fails.
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "empty_object_uses_defaults",
        config_json: "{}",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "full_config",
        config_json: r#"{
            "database_path": "/srv/finalyze/jobs.db",
            "upload_directory": "/srv/finalyze/uploads",
            "async_enabled": true,
            "max_upload_bytes": 1048576,
            "worker": {
                "worker_count": 4,
                "poll_interval_ms": 250,
                "visibility_timeout_secs": 120,
                "heartbeat_interval_secs": 10,
                "analysis_time_limit_secs": 90
            },
            "store_retry": { "max_attempts": 5, "initial_backoff_ms": 20 },
            "enqueue_retry": { "max_attempts": 2, "initial_backoff_ms": 0 },
            "history": { "default_limit": 20, "max_limit": 50 },
            "analyzer": { "command": "/usr/local/bin/analyze", "args": ["--json"], "working_directory": null },
            "logging": { "level": "debug", "json": true }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "unknown_top_level_key",
        config_json: r#"{ "redis_url": "redis://localhost" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "worker": { "worker_count": 0 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "heartbeat_not_below_visibility_timeout",
        config_json: r#"{ "worker": { "visibility_timeout_secs": 30, "heartbeat_interval_secs": 30 } }"#,
        should_succeed: false,
        expected_error: Some("must be below worker.visibility_timeout_secs"),
    },
    ConfigTestCase {
        name: "history_default_above_max",
        config_json: r#"{ "history": { "default_limit": 60, "max_limit": 50 } }"#,
        should_succeed: false,
        expected_error: Some("history limits"),
    },
    ConfigTestCase {
        name: "history_max_above_ceiling",
        config_json: r#"{ "history": { "max_limit": 500 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_log_level",
        config_json: r#"{ "logging": { "level": "verbose" } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "retry_without_attempts",
        config_json: r#"{ "store_retry": { "max_attempts": 0, "initial_backoff_ms": 10 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "blank_analyzer_command",
        config_json: r#"{ "analyzer": { "command": "   " } }"#,
        should_succeed: false,
        expected_error: Some("analyzer.command must not be blank"),
    },
    ConfigTestCase {
        name: "not_json",
        config_json: "worker_count = 2",
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);

        if case.should_succeed {
            assert!(
                result.is_ok(),
                "case '{}' should succeed, got {:?}",
                case.name,
                result.err()
            );
            continue;
        }

        let err = match result {
            Ok(_) => panic!("case '{}' should fail", case.name),
            Err(e) => e.to_string(),
        };
        if let Some(expected) = case.expected_error {
            assert!(
                err.contains(expected),
                "case '{}': expected error containing '{}', got '{}'",
                case.name,
                expected,
                err
            );
        }
    }
}

#[test]
fn test_full_config_values_are_applied() {
    let config = load_config_from_str(CONFIG_TESTS[1].config_json).unwrap();
    assert_eq!(config.worker.worker_count, 4);
    assert_eq!(config.worker.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.worker.visibility_timeout(), Duration::from_secs(120));
    assert_eq!(config.store_retry.policy().max_attempts, 5);
    assert_eq!(config.history.default_limit, 20);
    assert_eq!(config.analyzer.args, vec!["--json".to_string()]);
    assert!(config.logging.json);
}

#[test]
fn test_config_file_round_trip_through_disk() {
    let h = TestHarness::new();
    let config = Config {
        async_enabled: false,
        ..Config::default()
    };
    let path = h.temp_path().join("finalyze.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    assert_eq!(load_config(&path).unwrap(), config);
}

#[test]
fn test_missing_config_file_reports_path() {
    let h = TestHarness::new();
    let path = h.temp_path().join("absent.json");
    let err = load_config(&path).unwrap_err().to_string();
    assert!(err.contains("absent.json"), "{}", err);
}
