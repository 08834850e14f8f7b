//! Integration tests for trellis-config

use serde_json::{json, Value};
use std::env;
use std::io::Write;
use trellis_config::*;

const APP_INI: &str = r#"
[app]
package = myapp
debug = true
tangled.app.csrf.enabled = true
tangled.app.tunnel_over_post = PUT, PATCH
tangled.app.handlers =
    myapp.handlers:timing after=notifier
    .handlers:audit name=audit
tangled.app.representation.args = {"application/json": {"pretty": true}}

[logger_root]
level = INFO
"#;

#[test]
fn test_ini_layer_over_defaults() {
    let settings = Settings::builder().ini("app.ini", APP_INI).unwrap().build().unwrap();

    assert!(settings.debug());
    assert_eq!(settings.package(), Some("myapp"));
    assert!(settings.app_bool("csrf.enabled").unwrap());
    assert!(!settings.app_bool("cors.enabled").unwrap());
    assert_eq!(
        settings.app_list("tunnel_over_post").unwrap(),
        vec!["PUT", "PATCH"]
    );
    assert_eq!(settings.app_list("handlers").unwrap().len(), 2);
    assert_eq!(
        settings.get_map("tangled.app.representation.args").unwrap()["application/json"],
        json!({"pretty": true})
    );
    assert_eq!(
        settings.section("logger_root").and_then(|s| s.get("level")),
        Some(&"INFO".to_string())
    );
}

#[test]
fn test_later_layers_win() {
    let settings = Settings::builder()
        .ini("app.ini", APP_INI)
        .unwrap()
        .set("debug", false)
        .build()
        .unwrap();

    assert!(!settings.debug());
    assert_eq!(
        settings.source("debug"),
        Some(&Source::Override("set:debug".to_string()))
    );
    assert_eq!(
        settings.source("package"),
        Some(&Source::Override("app.ini".to_string()))
    );
}

#[test]
fn test_invalid_boolean_in_ini() {
    let result = Settings::builder()
        .ini("bad.ini", "[app]\ntangled.app.cors.enabled = sometimes\n")
        .unwrap()
        .build();

    match result {
        Err(ConfigError::InvalidBoolean { key, value }) => {
            assert_eq!(key, "tangled.app.cors.enabled");
            assert_eq!(value, "sometimes");
        }
        other => panic!("expected InvalidBoolean, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_file_loading_by_extension() {
    let dir = tempfile::tempdir().unwrap();

    let json_path = dir.path().join("app.json");
    std::fs::write(&json_path, r#"{"tangled.app.name": "from-json"}"#).unwrap();

    let toml_path = dir.path().join("app.toml");
    let mut toml_file = std::fs::File::create(&toml_path).unwrap();
    writeln!(toml_file, "[app]").unwrap();
    writeln!(toml_file, "\"tangled.app.cors.enabled\" = true").unwrap();

    let settings = Settings::builder()
        .file(json_path.to_str().unwrap())
        .unwrap()
        .file(toml_path.to_str().unwrap())
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(settings.app_str("name").unwrap(), "from-json");
    assert!(settings.app_bool("cors.enabled").unwrap());
}

#[test]
fn test_unsupported_file_extension() {
    assert!(matches!(
        Settings::builder().file("settings.yaml"),
        Err(ConfigError::LoadError(_))
    ));
}

#[test]
fn test_env_layer() {
    // Unique variable names keep this test independent of the others
    unsafe {
        env::set_var("TRELLISITEST__TANGLED__APP__NAME", "from-env");
    }

    let layer = EnvLoader::new("TRELLISITEST").load();
    let settings = Settings::builder().layer(layer).build().unwrap();
    assert_eq!(settings.app_str("name").unwrap(), "from-env");

    unsafe {
        env::remove_var("TRELLISITEST__TANGLED__APP__NAME");
    }
}

#[test]
fn test_app_setting_lookup() {
    let settings = Settings::with_defaults().unwrap();
    assert_eq!(
        settings.app_setting("default_content_type"),
        Some(&Value::String("application/json".into()))
    );
    assert!(settings.app_setting("no.such.setting").is_none());
}
