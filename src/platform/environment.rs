//! Resolution of the default analytics configuration from the hosting environment.

use std::env;
use std::fs;
#[cfg(not(target_arch = "wasm32"))]
use std::path::Path;

use serde_json::{Map, Number, Value};

use crate::analytics::{invalid_argument, AnalyticsConfig, AnalyticsResult};

/// Environment variable read on native targets.
pub const CONFIG_ENV_VAR: &str = "SITE_ANALYTICS_CONFIG";
/// Page global read in the browser.
pub const CONFIG_GLOBAL: &str = "__SITE_ANALYTICS_CONFIG__";

/// Returns the analytics configuration supplied by the environment, if any.
///
/// The page global wins over the environment variable. The variable may hold inline JSON, a
/// path to a JSON file, or comma-separated `key=value` pairs.
pub fn default_analytics_config() -> AnalyticsResult<Option<AnalyticsConfig>> {
    match config_from_global().or_else(config_from_env) {
        Some(value) => parse_config_value(value).map(Some),
        None => Ok(None),
    }
}

/// Deserializes a configuration object, filling unspecified keys with their defaults.
pub fn parse_config_value(value: Value) -> AnalyticsResult<AnalyticsConfig> {
    serde_json::from_value(value)
        .map_err(|err| invalid_argument(format!("invalid analytics configuration: {err}")))
}

fn config_from_env() -> Option<Value> {
    let raw = env::var(CONFIG_ENV_VAR).ok()?;
    parse_config_source(&raw)
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn config_from_global() -> Option<Value> {
    use wasm_bindgen::JsValue;

    let global = js_sys::global();
    let value = js_sys::Reflect::get(&global, &JsValue::from_str(CONFIG_GLOBAL)).ok()?;
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let serialized = js_sys::JSON::stringify(&value).ok()?.as_string()?;
    serde_json::from_str(&serialized).ok()
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn config_from_global() -> Option<Value> {
    None
}

fn parse_config_source(raw: &str) -> Option<Value> {
    if let Ok(json) = serde_json::from_str::<Value>(raw) {
        if json.is_object() {
            return Some(json);
        }
    }

    if let Some(path) = treat_as_path(raw) {
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(json) = serde_json::from_str::<Value>(&contents) {
                if json.is_object() {
                    return Some(json);
                }
            }
        }
    }

    parse_key_value_config(raw)
}

#[cfg(not(target_arch = "wasm32"))]
fn treat_as_path(raw: &str) -> Option<String> {
    if raw.contains('=') {
        return None;
    }
    let trimmed = raw.trim();
    let path = Path::new(trimmed);
    if path.exists() {
        Some(trimmed.to_string())
    } else {
        None
    }
}

#[cfg(target_arch = "wasm32")]
fn treat_as_path(_raw: &str) -> Option<String> {
    None
}

fn parse_key_value_config(raw: &str) -> Option<Value> {
    let mut map = Map::new();
    for entry in raw.split(',') {
        let mut parts = entry.splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.insert(key.to_string(), scalar_value(value));
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

// Flags and delays arrive as text; give them their JSON type so they deserialize.
fn scalar_value(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    match raw.parse::<u64>() {
        Ok(number) => Value::Number(Number::from(number)),
        Err(_) => Value::String(raw.to_string()),
    }
}
