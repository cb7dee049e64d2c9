use std::env;
use std::fs;
use std::sync::Mutex;

use tempfile::TempDir;

/// Env-mutating tests run under one lock so they cannot race each other.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_VARS: &[&str] = &[
    "STORAGE_BUCKET_PREFIX",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_REGION",
    "S3_KEY",
    "S3_SECRET",
    "S3_ENDPOINT",
    "SIGNED_URL_PUT_EXPIRES",
    "SIGNED_URL_GET_EXPIRES",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

/// Test loading configuration from a YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
bucket_prefix: tenant-a
access_key: AKIATEST
secret_key: secrettest
region: us-west-2
endpoint: http://minio:9000
signed_urls:
  put_expiry_secs: 600
  get_expiry_secs: 7200
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = s3ns::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.bucket_prefix, "tenant-a");
    assert_eq!(config.access_key, "AKIATEST");
    assert_eq!(config.secret_key, "secrettest");
    assert_eq!(config.region, "us-west-2");
    assert_eq!(config.endpoint, Some("http://minio:9000".to_string()));
    assert_eq!(config.signed_urls.put_expiry_secs, 600);
    assert_eq!(config.signed_urls.get_expiry_secs, 7200);
}

/// Test loading configuration from environment variables (AWS standard format)
#[test]
fn test_load_env_config_aws_format() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    env::set_var("STORAGE_BUCKET_PREFIX", "tenant-b");
    env::set_var("AWS_ACCESS_KEY_ID", "AKIAENV");
    env::set_var("AWS_SECRET_ACCESS_KEY", "secretenv");
    env::set_var("AWS_REGION", "eu-west-1");
    env::set_var("SIGNED_URL_PUT_EXPIRES", "120");

    let config = s3ns::config::load_from_env().unwrap();
    clear_env();

    assert_eq!(config.bucket_prefix, "tenant-b");
    assert_eq!(config.access_key, "AKIAENV");
    assert_eq!(config.secret_key, "secretenv");
    assert_eq!(config.region, "eu-west-1");
    assert_eq!(config.endpoint, None);
    assert_eq!(config.signed_urls.put_expiry_secs, 120);
    assert_eq!(config.signed_urls.get_expiry_secs, 3600);
}

/// Test the legacy S3_KEY / S3_SECRET fallback variables
#[test]
fn test_load_env_config_legacy_format() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    env::set_var("STORAGE_BUCKET_PREFIX", "tenant-c");
    env::set_var("S3_KEY", "AKIALEGACY");
    env::set_var("S3_SECRET", "secretlegacy");
    env::set_var("S3_ENDPOINT", "http://localhost:9000");

    let config = s3ns::config::load_from_env().unwrap();
    clear_env();

    assert_eq!(config.access_key, "AKIALEGACY");
    assert_eq!(config.secret_key, "secretlegacy");
    assert_eq!(config.region, "us-east-1");
    assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
}

/// Missing required variables should produce an error, not a panic
#[test]
fn test_load_env_config_missing_prefix() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let result = s3ns::config::load_from_env();
    assert!(result.is_err());
}

/// load_config validates the prefix length on the way through
#[test]
fn test_load_config_rejects_long_prefix() {
    let yaml = format!(
        "bucket_prefix: {}\naccess_key: k\nsecret_key: s\n",
        "x".repeat(33)
    );

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let result = s3ns::config::load_config(Some(config_path.to_str().unwrap()));
    assert!(result.is_err());
}
