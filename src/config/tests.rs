//! Tests for logger configuration and INI loading.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use logtest::Logger;
use rstest::{fixture, rstest};
use serial_test::serial;

use super::*;
use crate::platform::{NoPlatformTags, PlatformInfo};
use crate::test_utils::ScriptedTransport;

struct FixedPlatform;

impl PlatformInfo for FixedPlatform {
    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("platform".to_string(), "testos".to_string()),
            ("arch".to_string(), "z80".to_string()),
        ])
    }
}

#[fixture]
fn builder() -> BatchLoggerBuilder {
    BatchLoggerBuilder::new()
        .with_access_token("token")
        .with_dataspace("space")
        .with_platform(Arc::new(NoPlatformTags))
}

#[rstest]
fn defaults_apply_when_unset(builder: BatchLoggerBuilder) {
    let config = builder.build_config().expect("config");
    assert_eq!(
        config.endpoint,
        "https://cloud.humio.com/api/v1/dataspaces/space/ingest"
    );
    assert_eq!(config.flush_interval, Duration::from_secs(10));
    assert_eq!(config.max_batch_age, Duration::from_secs(604_800));
    assert!(config.allow_metered_network);
    assert!(!config.strip_backslashes);
    assert_eq!(config.session_identifier, DEFAULT_SESSION_IDENTIFIER);
    assert!(config.tags.is_empty());
}

#[rstest]
#[case("my space", "my%20space")]
#[case("a/b", "a%2Fb")]
#[case("x?y#z", "x%3Fy%23z")]
#[case("plain-name_1.2~", "plain-name_1.2~")]
fn dataspace_is_percent_encoded(#[case] dataspace: &str, #[case] encoded: &str) {
    assert_eq!(
        dataspace_endpoint("https://ingest.example/", dataspace),
        format!("https://ingest.example/api/v1/dataspaces/{encoded}/ingest")
    );
}

#[rstest]
fn explicit_endpoint_overrides_dataspace(builder: BatchLoggerBuilder) {
    let config = builder
        .with_endpoint("http://localhost:8080/ingest")
        .build_config()
        .expect("config");
    assert_eq!(config.endpoint, "http://localhost:8080/ingest");
}

#[rstest]
fn ingest_base_changes_derived_host(builder: BatchLoggerBuilder) {
    let config = builder
        .with_ingest_base("https://eu.example.com")
        .build_config()
        .expect("config");
    assert_eq!(
        config.endpoint,
        "https://eu.example.com/api/v1/dataspaces/space/ingest"
    );
}

#[rstest]
#[case(None)]
#[case(Some(""))]
#[case(Some("   "))]
fn token_is_required(#[case] token: Option<&str>) {
    let mut builder = BatchLoggerBuilder::new().with_dataspace("space");
    if let Some(token) = token {
        builder = builder.with_access_token(token);
    }
    assert!(matches!(
        builder.build_config(),
        Err(ConfigError::MissingToken)
    ));
}

#[rstest]
fn destination_is_required() {
    let err = BatchLoggerBuilder::new()
        .with_access_token("token")
        .build_config()
        .expect_err("missing destination");
    assert!(matches!(err, ConfigError::MissingEndpoint));
}

#[rstest]
#[case::empty("")]
#[case::scheme("ftp://example.com/ingest")]
fn bad_endpoint_is_rejected(builder: BatchLoggerBuilder, #[case] endpoint: &str) {
    let err = builder
        .with_endpoint(endpoint)
        .build_config()
        .expect_err("bad endpoint");
    assert!(matches!(err, ConfigError::InvalidConfig(_)));
}

#[rstest]
fn zero_durations_are_rejected(builder: BatchLoggerBuilder) {
    let err = builder
        .clone()
        .with_flush_interval(Duration::ZERO)
        .build_config()
        .expect_err("zero interval");
    assert!(err.to_string().contains("flush_interval must be greater than zero"));

    let err = builder
        .with_max_batch_age(Duration::ZERO)
        .build_config()
        .expect_err("zero age");
    assert!(err.to_string().contains("max_batch_age"));
}

#[rstest]
fn explicit_tags_override_platform_tags() {
    let config = BatchLoggerBuilder::new()
        .with_access_token("token")
        .with_dataspace("space")
        .with_platform(Arc::new(FixedPlatform))
        .with_tag("arch", "arm64")
        .with_tag("env", "test")
        .build_config()
        .expect("config");
    assert_eq!(config.tags["platform"], "testos");
    assert_eq!(config.tags["arch"], "arm64");
    assert_eq!(config.tags["env"], "test");
}

#[rstest]
fn build_reports_unusable_storage_dir(builder: BatchLoggerBuilder) {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let err = builder
        .with_storage_dir(file.path().join("nested"))
        .with_transport(Arc::new(ScriptedTransport::new()))
        .build()
        .expect_err("storage dir under a file");
    assert!(matches!(err, ConfigError::Storage { .. }));
}

const SAMPLE_INI: &str = r#"
[femtobatch]
access_token = secret
dataspace = logs
storage_dir = /var/tmp/femtobatch-test
flush_interval_secs = 3
max_batch_age_secs = 120
allow_metered_network = no
strip_backslashes = yes
request_timeout_ms = 1500
connect_timeout_ms = 250

[femtobatch.tags]
service = checkout
"#;

#[rstest]
fn ini_populates_builder() {
    let config = BatchLoggerBuilder::from_ini_str(SAMPLE_INI)
        .expect("ini")
        .with_platform(Arc::new(NoPlatformTags))
        .build_config()
        .expect("config");

    assert_eq!(config.access_token, "secret");
    assert_eq!(
        config.endpoint,
        "https://cloud.humio.com/api/v1/dataspaces/logs/ingest"
    );
    assert_eq!(
        config.storage_dir,
        std::path::PathBuf::from("/var/tmp/femtobatch-test")
    );
    assert_eq!(config.flush_interval, Duration::from_secs(3));
    assert_eq!(config.max_batch_age, Duration::from_secs(120));
    assert!(!config.allow_metered_network);
    assert!(config.strip_backslashes);
    assert_eq!(config.request_timeout, Duration::from_millis(1500));
    assert_eq!(config.connect_timeout, Duration::from_millis(250));
    assert_eq!(
        config.tags,
        BTreeMap::from([("service".to_string(), "checkout".to_string())])
    );
}

#[rstest]
fn ini_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(SAMPLE_INI.as_bytes()).expect("write ini");
    let builder = BatchLoggerBuilder::from_ini_file(file.path()).expect("ini file");
    let config = builder.build_config().expect("config");
    assert_eq!(config.access_token, "secret");
}

#[rstest]
fn missing_ini_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = BatchLoggerBuilder::from_ini_file(dir.path().join("absent.ini"))
        .expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[rstest]
#[case::missing_section("[other]\nkey = value\n")]
#[case::bad_number("[femtobatch]\nflush_interval_secs = soon\n")]
#[case::bad_bool("[femtobatch]\nstrip_backslashes = maybe\n")]
fn invalid_ini_values_are_rejected(#[case] text: &str) {
    let err = BatchLoggerBuilder::from_ini_str(text).expect_err("invalid ini");
    assert!(matches!(err, ConfigError::InvalidConfig(_)), "{err}");
}

#[rstest]
fn malformed_ini_is_reported() {
    let err = BatchLoggerBuilder::from_ini_str("[femtobatch\naccess_token = x\n")
        .expect_err("malformed");
    assert!(matches!(err, ConfigError::Ini(_)));
}

#[rstest]
#[serial]
fn unknown_ini_keys_are_warned_about() {
    let mut logger = Logger::start();
    let builder =
        BatchLoggerBuilder::from_ini_str("[femtobatch]\naccess_token = x\ncolour = blue\n")
            .expect("ini");
    assert!(builder.build_config().is_err());

    let mut found = false;
    while let Some(record) = logger.pop() {
        if record.level() == log::Level::Warn && record.args().contains("\"colour\"") {
            found = true;
        }
    }
    assert!(found, "expected a warning about the unknown key");
}
