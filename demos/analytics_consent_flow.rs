//! Walks through a page session with in-memory collaborators: consent evaluation, gtag
//! bootstrap, tool tracking and an opt-out. Prints every command the data layer received.

use std::sync::Arc;

use site_analytics::analytics::{
    Analytics, AnalyticsConfig, DataLayer, ImmediateScriptLoader, PageEvent,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let layer = Arc::new(DataLayer::new());
    let analytics = Analytics::builder(AnalyticsConfig::new("G-DEMO0001"))
        .backend(layer.clone())
        .script_loader(Arc::new(ImmediateScriptLoader))
        .build()?;

    analytics.handle_page_event(PageEvent::DocumentReady);
    println!("consent: {}", analytics.consent_state().as_str());

    analytics.track_tool_usage("json-to-rust", None);
    analytics.track_tool_usage("guid-generator", Some("copy"));
    analytics.handle_page_event(PageEvent::UnhandledRejection(None));

    analytics.opt_out()?;
    println!("consent after opt-out: {}", analytics.consent_state().as_str());

    for arguments in layer.arguments() {
        println!("dataLayer.push({})", serde_json::Value::Array(arguments));
    }

    Ok(())
}
