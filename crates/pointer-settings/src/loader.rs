use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::Settings;

/// Root directory for pointer state (`~/.pointer`).
pub fn pointer_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pointer")
}

pub fn settings_path() -> PathBuf {
    pointer_home().join("settings.json")
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` and apply env overrides.
///
/// A missing file yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` over `target`: objects recurse, everything else is
/// replaced, and nulls in `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_string("POINTER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_parsed::<u16>("POINTER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("POINTER_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read_env_string("POINTER_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = read_env_parsed::<u32>("POINTER_MAX_ROUNDS", 1, 1_000) {
        settings.agent.max_rounds = v;
    }
    if let Some(v) = read_env_parsed::<u64>("POINTER_READ_AFTER_WRITE_MS", 0, 60_000) {
        settings.agent.read_after_write_delay_ms = v;
    }
    if let Some(v) = read_env_string("POINTER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("ANTHROPIC_API_KEY") {
        settings.secrets.anthropic_api_key = Some(SecretString::from(v));
    }
    if let Some(v) = read_env_string("FIRECRAWL_API_KEY") {
        settings.secrets.firecrawl_api_key = Some(SecretString::from(v));
    }
}

/// Parse `val` as a number within `[min, max]`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use serde_json::json;

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"agent": {"maxRounds": 20, "contextMessages": 10}}),
            json!({"agent": {"maxRounds": 5}}),
        );
        assert_eq!(merged["agent"]["maxRounds"], 5);
        assert_eq!(merged["agent"]["contextMessages"], 10);
    }

    #[test]
    fn merge_null_keeps_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_arrays_replace() {
        let merged = deep_merge(json!({"m": ["a", "b"]}), json!({"m": ["c"]}));
        assert_eq!(merged["m"], json!(["c"]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.agent.context_messages, 10);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"agent": {"contextMessages": 4}, "logging": {"json": false}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.agent.context_messages, 4);
        assert!(!settings.logging.json);
        assert_eq!(settings.agent.max_rounds, 20);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"workflow": {"stepMaxAttempts": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_in_range::<u16>("8080", 1, 65535), Some(8080));
        assert_eq!(parse_in_range::<u16>("0", 1, 65535), None);
        assert_eq!(parse_in_range::<u32>("abc", 1, 10), None);
        assert_eq!(parse_in_range::<u64>(" 250 ", 0, 1000), Some(250));
    }
}
