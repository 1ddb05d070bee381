//! Browser wiring: page lifecycle listeners and the functions exported to page scripts.

use std::cell::RefCell;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{ErrorEvent, Event, EventTarget, PromiseRejectionEvent};

use crate::analytics::api::{Analytics, ErrorReport, PageEvent};
use crate::analytics::config::AnalyticsConfig;
use crate::analytics::error::{internal_error, AnalyticsResult};
use crate::analytics::gtag::{EventParams, ParamValue};
use crate::platform::environment::{default_analytics_config, parse_config_value};

thread_local! {
    static ACTIVE: RefCell<Option<Analytics>> = const { RefCell::new(None) };
}

/// Registers document-ready, `load`, `error` and `unhandledrejection` listeners that feed
/// `analytics`. Ready and load hooks whose moment has already passed run immediately.
pub fn attach_page_hooks(analytics: &Analytics) -> AnalyticsResult<()> {
    let window = web_sys::window().ok_or_else(|| internal_error("window unavailable"))?;
    let document = window
        .document()
        .ok_or_else(|| internal_error("document unavailable"))?;
    let window_target: EventTarget = window.into();

    if document.ready_state() == "loading" {
        let ready = analytics.clone();
        listen(document.as_ref(), "DOMContentLoaded", move |_: Event| {
            ready.handle_page_event(PageEvent::DocumentReady);
        })?;
    } else {
        analytics.handle_page_event(PageEvent::DocumentReady);
    }

    if document.ready_state() == "complete" {
        analytics.handle_page_event(PageEvent::Load);
    } else {
        let loaded = analytics.clone();
        listen(&window_target, "load", move |_: Event| {
            loaded.handle_page_event(PageEvent::Load);
        })?;
    }

    let errors = analytics.clone();
    listen(&window_target, "error", move |event: Event| {
        if let Some(event) = event.dyn_ref::<ErrorEvent>() {
            errors.handle_page_event(PageEvent::Error(error_report(event)));
        }
    })?;

    let rejections = analytics.clone();
    listen(&window_target, "unhandledrejection", move |event: Event| {
        let reason = event
            .dyn_ref::<PromiseRejectionEvent>()
            .and_then(|event| rejection_message(&event.reason()));
        rejections.handle_page_event(PageEvent::UnhandledRejection(reason));
    })?;

    Ok(())
}

fn listen<F>(target: &EventTarget, name: &str, handler: F) -> AnalyticsResult<()>
where
    F: FnMut(Event) + 'static,
{
    let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
    target
        .add_event_listener_with_callback(name, closure.as_ref().unchecked_ref())
        .map_err(|err| internal_error(format!("failed to listen for `{name}`: {err:?}")))?;
    // listeners live for the whole page
    closure.forget();
    Ok(())
}

fn error_report(event: &ErrorEvent) -> ErrorReport {
    let filename = event.filename();
    ErrorReport {
        message: event.message(),
        filename: (!filename.is_empty()).then_some(filename),
        line: Some(event.lineno()),
    }
}

fn rejection_message(reason: &JsValue) -> Option<String> {
    if reason.is_null() || reason.is_undefined() {
        return None;
    }
    js_sys::Reflect::get(reason, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
}

fn with_active<F>(f: F)
where
    F: FnOnce(&Analytics),
{
    ACTIVE.with(|slot| match slot.borrow().as_ref() {
        Some(analytics) => f(analytics),
        None => log::debug!("analytics not started; ignoring call"),
    });
}

fn to_js_error(err: crate::analytics::error::AnalyticsError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Starts analytics for the page. `config` is the page configuration object; without one the
/// `__SITE_ANALYTICS_CONFIG__` global is used. Calling it again keeps the first instance.
#[wasm_bindgen(js_name = startAnalytics)]
pub fn start_analytics(config: JsValue) -> Result<(), JsValue> {
    if ACTIVE.with(|slot| slot.borrow().is_some()) {
        return Ok(());
    }

    let provided = (!config.is_null() && !config.is_undefined()).then_some(config);
    let config = match provided {
        Some(value) => {
            let serialized = js_sys::JSON::stringify(&value)?
                .as_string()
                .ok_or_else(|| JsValue::from_str("analytics config is not serializable"))?;
            let json = serde_json::from_str(&serialized)
                .map_err(|err| JsValue::from_str(&format!("invalid analytics config: {err}")))?;
            parse_config_value(json).map_err(to_js_error)?
        }
        None => default_analytics_config()
            .map_err(to_js_error)?
            .unwrap_or_else(AnalyticsConfig::default),
    };

    let analytics = Analytics::new(config).map_err(to_js_error)?;
    attach_page_hooks(&analytics).map_err(to_js_error)?;
    ACTIVE.with(|slot| *slot.borrow_mut() = Some(analytics));
    Ok(())
}

#[wasm_bindgen(js_name = trackToolUsage)]
pub fn track_tool_usage(tool_name: String, action: Option<String>) {
    with_active(|analytics| analytics.track_tool_usage(&tool_name, action.as_deref()));
}

/// Non-primitive parameter values are skipped.
#[wasm_bindgen(js_name = trackCustomEvent)]
pub fn track_custom_event(name: String, params: JsValue) {
    let params = event_params(&params);
    with_active(|analytics| {
        if let Err(err) = analytics.track_custom_event(&name, params) {
            log::warn!("{err}");
        }
    });
}

#[wasm_bindgen(js_name = optOut)]
pub fn opt_out() {
    with_active(|analytics| {
        if let Err(err) = analytics.opt_out() {
            log::warn!("failed to store analytics opt-out: {err}");
        }
    });
}

#[wasm_bindgen(js_name = optIn)]
pub fn opt_in() {
    with_active(|analytics| {
        if let Err(err) = analytics.opt_in() {
            log::warn!("failed to clear analytics opt-out: {err}");
        }
    });
}

#[wasm_bindgen(js_name = isAnalyticsActive)]
pub fn is_analytics_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().as_ref().is_some_and(Analytics::is_active))
}

fn event_params(value: &JsValue) -> EventParams {
    if value.is_null() || value.is_undefined() {
        return EventParams::new();
    }
    let Some(serialized) = js_sys::JSON::stringify(value)
        .ok()
        .and_then(|text| text.as_string())
    else {
        return EventParams::new();
    };
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&serialized) else {
        return EventParams::new();
    };
    map.iter()
        .filter_map(|(key, value)| ParamValue::from_json(value).map(|value| (key.clone(), value)))
        .collect()
}
