//! Integration tests for configuration loading and validation.

use fluentcloud::test_support::EnvGuard;
use fluentcloud::{Cloud, CloudConfig, CloudError, config::ConfigError};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_config() -> CloudConfig {
    CloudConfig {
        subscription_id: String::from("11111111-2222-3333-4444-555555555555"),
        access_token: String::from("eyJ0eXAiOiJKV1QiLCJhbGciOi"),
        endpoint: String::from("https://management.azure.com"),
        api_version: String::from("2015-06-15"),
        default_group: None,
        request_timeout_secs: None,
    }
}

#[rstest]
#[case::subscription(
    |cfg: &mut CloudConfig| cfg.subscription_id.clear(),
    "FLUENTCLOUD_SUBSCRIPTION_ID",
    "subscription_id"
)]
#[case::token(
    |cfg: &mut CloudConfig| cfg.access_token.clear(),
    "FLUENTCLOUD_ACCESS_TOKEN",
    "access_token"
)]
#[case::endpoint(
    |cfg: &mut CloudConfig| cfg.endpoint.clear(),
    "FLUENTCLOUD_ENDPOINT",
    "endpoint"
)]
#[case::api_version(
    |cfg: &mut CloudConfig| cfg.api_version.clear(),
    "FLUENTCLOUD_API_VERSION",
    "api_version"
)]
fn validation_errors_are_actionable(
    valid_config: CloudConfig,
    #[case] mutate: fn(&mut CloudConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);
    let Err(error) = cfg.validate() else {
        panic!("validation should fail");
    };
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("fluentcloud.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn authenticate_rejects_incomplete_config(valid_config: CloudConfig) {
    let cfg = CloudConfig {
        access_token: String::new(),
        ..valid_config
    };
    let Err(err) = Cloud::authenticate(&cfg) else {
        panic!("missing token should be rejected");
    };
    assert!(matches!(err, CloudError::Config(_)));
}

#[rstest]
fn authenticate_applies_default_group(valid_config: CloudConfig) {
    let cfg = CloudConfig {
        default_group: Some(String::from(" rg-dev ")),
        ..valid_config
    };
    let cloud = Cloud::authenticate(&cfg).unwrap_or_else(|err| panic!("authenticate: {err}"));
    assert_eq!(cloud.context().default_group(), Some("rg-dev"));
    assert_eq!(
        cloud.context().subscription(),
        "11111111-2222-3333-4444-555555555555"
    );
}

#[rstest]
fn environment_values_are_loaded_with_defaults() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let config_path = tmp.path().join("absent.toml");
    let config_path_text = config_path.to_string_lossy().into_owned();
    let _guard = EnvGuard::set_vars(&[
        ("FLUENTCLOUD_CONFIG_PATH", config_path_text.as_str()),
        ("FLUENTCLOUD_SUBSCRIPTION_ID", "sub-from-env"),
        ("FLUENTCLOUD_ACCESS_TOKEN", "token-from-env"),
        ("FLUENTCLOUD_DEFAULT_GROUP", "rg-env"),
    ]);

    let cfg = CloudConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));

    assert_eq!(cfg.subscription_id, "sub-from-env");
    assert_eq!(cfg.access_token, "token-from-env");
    assert_eq!(cfg.default_group.as_deref(), Some("rg-env"));
    assert_eq!(cfg.endpoint, "https://management.azure.com");
    assert_eq!(cfg.api_version, "2015-06-15");
    assert_eq!(cfg.timeout_secs(), 30);
}
