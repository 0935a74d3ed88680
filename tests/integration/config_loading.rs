//! Layered configuration: defaults, global file, explicit file, environment

use agent_analytics::config::{global_config_path, AnalyticsConfig, ConfigLoader, ValidationError};
use agent_analytics::telemetry::{DropPolicy, EventKind, SinkConfig};
use tempfile::TempDir;

use crate::integration::test_utils::with_isolated_env;

#[test]
fn test_defaults_without_any_file() {
    let temp_dir = TempDir::new().unwrap();
    let (config, defaults) = with_isolated_env(&temp_dir, &[], || {
        (ConfigLoader::load(None).unwrap(), AnalyticsConfig::default())
    });
    assert_eq!(config, defaults);
    assert!(config.validate().is_ok());
}

#[test]
fn test_explicit_file_then_environment_override() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("analytics.toml");
    std::fs::write(
        &config_file,
        r#"
[pipeline]
max_buffer_events = 500
batch_max_events = 50
event_denylist = ["error"]

[sink]
type = "sled"
path = "/var/lib/agent-analytics/events"
"#,
    )
    .unwrap();

    let config = with_isolated_env(
        &temp_dir,
        &[
            ("AGENT_ANALYTICS__PIPELINE__MAX_BUFFER_EVENTS", "250"),
            ("AGENT_ANALYTICS__PIPELINE__DROP_POLICY", "block"),
        ],
        || ConfigLoader::load(Some(&config_file)).unwrap(),
    );

    assert_eq!(config.pipeline.max_buffer_events, 250);
    assert_eq!(config.pipeline.batch_max_events, 50);
    assert_eq!(config.pipeline.drop_policy, DropPolicy::Block);
    assert_eq!(config.pipeline.event_denylist, vec![EventKind::Error]);
    match &config.sink {
        SinkConfig::Sled { tree, .. } => assert_eq!(tree, "agent_events"),
        other => panic!("expected sled sink, got {:?}", other),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_global_file_is_layered_under_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let explicit = temp_dir.path().join("explicit.toml");
    std::fs::write(&explicit, "[pipeline]\nbatch_max_events = 25\n").unwrap();

    let config = with_isolated_env(&temp_dir, &[], || {
        let global = global_config_path().unwrap();
        assert!(global.starts_with(temp_dir.path()));
        std::fs::create_dir_all(global.parent().unwrap()).unwrap();
        std::fs::write(
            &global,
            "[pipeline]\nbatch_max_events = 10\nmax_retries = 7\n\n[observer]\napp_name = \"sales_app\"\n",
        )
        .unwrap();
        ConfigLoader::load(Some(&explicit)).unwrap()
    });

    assert_eq!(config.pipeline.batch_max_events, 25);
    assert_eq!(config.pipeline.max_retries, 7);
    assert_eq!(config.observer.app_name.as_deref(), Some("sales_app"));
}

#[test]
fn test_validation_collects_every_section() {
    let mut config = AnalyticsConfig::default();
    config.pipeline.batch_max_events = 0;
    config.sink = SinkConfig::Http {
        endpoint: "ftp://warehouse".to_string(),
        project_id: "proj".to_string(),
        dataset_id: "ds".to_string(),
        table_id: "events".to_string(),
        bearer_token_env: None,
        timeout_ms: 30_000,
    };
    config.logging.format = "xml".to_string();

    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(matches!(errors[0], ValidationError::Pipeline(_)));
    assert!(matches!(errors[1], ValidationError::Sink(_)));
    assert!(matches!(errors[2], ValidationError::Logging(_)));
}

#[test]
fn test_resolved_config_renders_and_reloads() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = AnalyticsConfig::default();
    config.pipeline.drop_policy = DropPolicy::DropOldest;
    config.pipeline.custom_tags.insert("env".to_string(), "staging".to_string());

    let path = temp_dir.path().join("rendered.toml");
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();
    let reloaded = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(reloaded.pipeline, config.pipeline);
}
