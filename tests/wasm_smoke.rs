#![cfg(all(target_arch = "wasm32", feature = "wasm-web"))]

use site_analytics::analytics::constants::OPT_OUT_STORAGE_KEY;
use std::sync::{Arc, Mutex};

use site_analytics::analytics::{
    Analytics, AnalyticsConfig, ConsentState, DomScriptLoader, LocalStoragePreferenceStore,
    PreferenceStore, ScriptLoader,
};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn local_storage_preference_round_trip() {
    let store = LocalStoragePreferenceStore;
    store.set(OPT_OUT_STORAGE_KEY, "true").expect("set preference");
    assert_eq!(
        store.get(OPT_OUT_STORAGE_KEY).expect("get preference").as_deref(),
        Some("true")
    );
    store.remove(OPT_OUT_STORAGE_KEY).expect("remove preference");
    assert_eq!(store.get(OPT_OUT_STORAGE_KEY).expect("get preference"), None);
}

#[wasm_bindgen_test]
fn stored_opt_out_keeps_script_out_of_the_page() {
    LocalStoragePreferenceStore
        .set(OPT_OUT_STORAGE_KEY, "true")
        .expect("set preference");

    let analytics = Analytics::new(AnalyticsConfig::new("G-WASMTEST").with_respect_dnt(false))
        .expect("create analytics");
    assert_eq!(analytics.start(), ConsentState::DeniedByPreference);
    assert!(!analytics.is_active());

    let document = web_sys::window().unwrap().document().unwrap();
    let script = document
        .query_selector("script[src*=\"googletagmanager.com/gtag/js\"]")
        .unwrap();
    assert!(script.is_none());

    LocalStoragePreferenceStore
        .remove(OPT_OUT_STORAGE_KEY)
        .expect("remove preference");
}

#[wasm_bindgen_test]
fn gtag_shim_pushes_onto_data_layer() {
    use site_analytics::analytics::{GtagBackend, GtagCommand, GtagFunctionBackend};

    let backend = GtagFunctionBackend::new("testDataLayer");
    let _ = js_sys::Reflect::delete_property(&js_sys::global(), &JsValue::from_str("gtag"));
    backend.push(GtagCommand::Event {
        name: "tool_usage".into(),
        params: Default::default(),
    });

    let layer = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("testDataLayer")).unwrap();
    let layer = layer.dyn_into::<js_sys::Array>().expect("data layer array");
    assert_eq!(layer.length(), 1);
}


async fn load_outcome(src: &str) -> Option<bool> {
    let outcome = Arc::new(Mutex::new(None));
    let sink = outcome.clone();
    DomScriptLoader.load(
        src,
        Box::new(move |result| *sink.lock().unwrap() = Some(result.is_ok())),
    );
    for _ in 0..50 {
        if let Some(ok) = *outcome.lock().unwrap() {
            return Some(ok);
        }
        gloo_timers::future::TimeoutFuture::new(100).await;
    }
    None
}

#[wasm_bindgen_test]
async fn failed_script_load_is_not_reported_as_loaded_on_retry() {
    let src = "http://127.0.0.1:9/site-analytics-unreachable.js";
    let selector = format!("script[src=\"{src}\"]");
    let document = web_sys::window().unwrap().document().unwrap();

    assert_eq!(load_outcome(src).await, Some(false));
    assert!(document.query_selector(&selector).unwrap().is_none());

    assert_eq!(load_outcome(src).await, Some(false));
    assert!(document.query_selector(&selector).unwrap().is_none());
}
