//! Typed form of the gtag command queue.
//!
//! Every interaction with the tag goes through [`GtagBackend::push`]. In the browser the backend
//! defines the usual `window.gtag` shim that appends its `arguments` to `window.dataLayer`; the
//! in-memory [`DataLayer`] keeps the same commands for native builds and tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Primitive value attached to an event parameter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Converts a JSON primitive. Objects, arrays and `null` have no parameter form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(ParamValue::Str(text.clone())),
            Value::Bool(flag) => Some(ParamValue::Bool(*flag)),
            Value::Number(number) => number
                .as_i64()
                .map(ParamValue::Int)
                .or_else(|| number.as_f64().map(ParamValue::Float)),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamValue::Str(value) => Value::String(value.clone()),
            ParamValue::Int(value) => json!(value),
            ParamValue::Float(value) => json!(value),
            ParamValue::Bool(value) => Value::Bool(*value),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(value) => f.write_str(value),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Float(value) => write!(f, "{value}"),
            ParamValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

pub type EventParams = BTreeMap<String, ParamValue>;

/// Options sent with the `config` command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GtagConfigOptions {
    pub anonymize_ip: bool,
    pub allow_google_signals: bool,
    pub allow_ad_personalization_signals: bool,
    pub cookie_flags: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Granted,
    Denied,
}

/// Payload of `["consent", "update", {...}]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ConsentUpdate {
    pub analytics_storage: ConsentStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GtagCommand {
    Js(DateTime<Utc>),
    Config {
        measurement_id: String,
        options: GtagConfigOptions,
    },
    Event {
        name: String,
        params: EventParams,
    },
    ConsentUpdate(ConsentUpdate),
}

impl GtagCommand {
    /// The positional arguments this command is pushed with.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            GtagCommand::Js(timestamp) => vec![
                json!("js"),
                json!(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ],
            GtagCommand::Config {
                measurement_id,
                options,
            } => vec![
                json!("config"),
                json!(measurement_id),
                serde_json::to_value(options).unwrap_or(Value::Null),
            ],
            GtagCommand::Event { name, params } => vec![
                json!("event"),
                json!(name),
                Value::Object(
                    params
                        .iter()
                        .map(|(key, value)| (key.clone(), value.to_json()))
                        .collect(),
                ),
            ],
            GtagCommand::ConsentUpdate(update) => vec![
                json!("consent"),
                json!("update"),
                serde_json::to_value(update).unwrap_or(Value::Null),
            ],
        }
    }
}

/// Receiver of gtag commands; the Backend Handle once initialization succeeded.
pub trait GtagBackend: Send + Sync {
    fn push(&self, command: GtagCommand);
}

/// In-memory command queue.
#[derive(Debug, Default)]
pub struct DataLayer {
    commands: Mutex<Vec<GtagCommand>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<GtagCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Only the `event` commands, as `(name, params)` pairs.
    pub fn events(&self) -> Vec<(String, EventParams)> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|command| match command {
                GtagCommand::Event { name, params } => Some((name.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn arguments(&self) -> Vec<Vec<Value>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(GtagCommand::arguments)
            .collect()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl GtagBackend for DataLayer {
    fn push(&self, command: GtagCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod wasm {
    use js_sys::{Array, Date, Function, Reflect};
    use wasm_bindgen::{JsCast, JsValue};

    use super::{GtagBackend, GtagCommand};
    use crate::analytics::constants::DATA_LAYER_NAME;
    use crate::analytics::error::{internal_error, AnalyticsResult};

    /// Forwards commands to the page's `window.gtag` function, defining the standard
    /// `dataLayer.push(arguments)` shim when the page has none.
    #[derive(Clone, Debug)]
    pub struct GtagFunctionBackend {
        data_layer: String,
    }

    impl Default for GtagFunctionBackend {
        fn default() -> Self {
            Self::new(DATA_LAYER_NAME)
        }
    }

    impl GtagFunctionBackend {
        pub fn new(data_layer: impl Into<String>) -> Self {
            Self {
                data_layer: data_layer.into(),
            }
        }

        fn apply(&self, command: &GtagCommand) -> AnalyticsResult<()> {
            let window = web_sys::window().ok_or_else(|| internal_error("window unavailable"))?;
            let global: JsValue = window.into();
            let gtag = self.ensure_gtag(&global)?;

            let args = Array::new();
            match command {
                GtagCommand::Js(timestamp) => {
                    args.push(&JsValue::from_str("js"));
                    args.push(&Date::new(&JsValue::from_f64(timestamp.timestamp_millis() as f64)));
                }
                other => {
                    for value in other.arguments() {
                        args.push(&to_js(&value)?);
                    }
                }
            }

            gtag.apply(&global, &args)
                .map_err(|err| internal_error(format!("gtag call failed: {err:?}")))?;
            Ok(())
        }

        fn ensure_gtag(&self, global: &JsValue) -> AnalyticsResult<Function> {
            let existing = Reflect::get(global, &JsValue::from_str("gtag"))
                .map_err(|err| internal_error(format!("failed to read window.gtag: {err:?}")))?;
            if let Some(function) = existing.dyn_ref::<Function>() {
                return Ok(function.clone());
            }

            let layer_key = JsValue::from_str(&self.data_layer);
            let layer = Reflect::get(global, &layer_key)
                .map_err(|err| internal_error(format!("failed to read data layer: {err:?}")))?;
            if !Array::is_array(&layer) {
                Reflect::set(global, &layer_key, &Array::new())
                    .map_err(|err| internal_error(format!("failed to create data layer: {err:?}")))?;
            }

            let literal = serde_json::to_string(&self.data_layer)
                .map_err(|err| internal_error(format!("invalid data layer name: {err}")))?;
            let function = Function::new_no_args(&format!("window[{literal}].push(arguments);"));
            Reflect::set(global, &JsValue::from_str("gtag"), &function)
                .map_err(|err| internal_error(format!("failed to install window.gtag: {err:?}")))?;
            Ok(function)
        }
    }

    impl GtagBackend for GtagFunctionBackend {
        fn push(&self, command: GtagCommand) {
            if let Err(err) = self.apply(&command) {
                log::warn!("dropping gtag command: {err}");
            }
        }
    }

    fn to_js(value: &serde_json::Value) -> AnalyticsResult<JsValue> {
        if let Some(text) = value.as_str() {
            return Ok(JsValue::from_str(text));
        }
        js_sys::JSON::parse(&value.to_string())
            .map_err(|err| internal_error(format!("failed to convert gtag argument: {err:?}")))
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub use wasm::GtagFunctionBackend;
