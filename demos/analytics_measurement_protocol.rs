//! Forwards tool events through the GA4 Measurement Protocol instead of a page tag.
//!
//! Requires `GA_MEASUREMENT_ID` and `GA_API_SECRET`; events go to the debug endpoint so GA
//! validates them without recording.

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use site_analytics::analytics::{
    Analytics, AnalyticsConfig, EventParams, ImmediateScriptLoader, MeasurementProtocolBackend,
    MeasurementProtocolConfig, MeasurementProtocolEndpoint, ParamValue,
};

#[cfg(not(target_arch = "wasm32"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let measurement_id = std::env::var("GA_MEASUREMENT_ID")?;
    let api_secret = std::env::var("GA_API_SECRET")?;

    let backend = MeasurementProtocolBackend::new(
        MeasurementProtocolConfig::new(measurement_id.clone(), api_secret)
            .with_endpoint(MeasurementProtocolEndpoint::DebugCollect),
    )?;

    let analytics = Analytics::builder(AnalyticsConfig::new(measurement_id))
        .backend(Arc::new(backend))
        .script_loader(Arc::new(ImmediateScriptLoader))
        .build()?;
    analytics.start();

    analytics.track_tool_usage("version-compare", None);
    analytics.track_custom_event(
        "download",
        EventParams::from([("format".to_string(), ParamValue::from("csv"))]),
    )?;

    println!("events sent: active = {}", analytics.is_active());
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn main() {}
