//! Expansion settings loaded from files and the environment

use std::io::Write;

use navexpand::config::{CliOverrides, ConfigError};
use navexpand::navigation_expansion::Pass;
use navexpand::{ExpansionConfig, NavigationExpansionError};
use serial_test::serial;

use super::fixtures::expand_with;

fn settings_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_yaml_settings_drive_expansion() {
    let file = settings_file("emit_include_assignments: false\n");
    let config = ExpansionConfig::from_yaml_file(file.path()).unwrap();

    let rendered = expand_with("Order.Include(o => o.Customer)", &config)
        .unwrap()
        .to_string();
    assert!(!rendered.contains("IncludeAssign"), "{}", rendered);
}

#[test]
fn test_cli_override_beats_file() {
    let file = settings_file("max_navigation_depth: 8\n");
    let mut config = ExpansionConfig::from_yaml_file(file.path()).unwrap();
    config.merge(CliOverrides {
        max_navigation_depth: Some(1),
        max_subquery_depth: None,
    });

    let err = expand_with("Order.Select(o => o.Customer.Address.City)", &config).unwrap_err();
    assert_eq!(
        err,
        NavigationExpansionError::DepthExceeded {
            pass: Pass::Binding,
            what: "navigation chain",
            limit: 1,
        }
    );
}

#[test]
fn test_malformed_yaml_reports_parse_error() {
    let file = settings_file("max_navigation_depth: [\n");
    assert!(matches!(
        ExpansionConfig::from_yaml_file(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
#[serial]
fn test_environment_settings() {
    std::env::set_var("NAVEXPAND_VALIDATE_OUTPUT", "false");
    std::env::set_var("NAVEXPAND_MAX_SUBQUERY_DEPTH", "4");
    let config = ExpansionConfig::from_env();
    std::env::remove_var("NAVEXPAND_VALIDATE_OUTPUT");
    std::env::remove_var("NAVEXPAND_MAX_SUBQUERY_DEPTH");

    let config = config.unwrap();
    assert!(!config.validate_output);
    assert_eq!(config.max_subquery_depth, 4);
    assert_eq!(config.max_navigation_depth, 16);
}

#[test]
#[serial]
fn test_environment_rejects_out_of_range_limit() {
    std::env::set_var("NAVEXPAND_MAX_NAVIGATION_DEPTH", "0");
    let result = ExpansionConfig::from_env();
    std::env::remove_var("NAVEXPAND_MAX_NAVIGATION_DEPTH");

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}
