#![doc = include_str!("README.md")]
mod api;
mod config;
mod consent;
pub mod constants;
pub mod error;
mod gtag;
mod loader;
mod performance;
mod storage;
#[cfg(not(target_arch = "wasm32"))]
mod transport;
#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub mod web;

#[doc(inline)]
pub use api::{Analytics, AnalyticsBuilder, ErrorReport, InitState, PageEvent};

#[doc(inline)]
pub use config::AnalyticsConfig;

#[doc(inline)]
pub use consent::{ConsentGate, ConsentState, PrivacySignal, StaticSignal};

#[doc(inline)]
pub use error::{
    internal_error, invalid_argument, network_error, script_load_error, storage_error,
    AnalyticsError, AnalyticsErrorCode, AnalyticsResult,
};

#[doc(inline)]
pub use gtag::{
    ConsentStatus, ConsentUpdate, DataLayer, EventParams, GtagBackend, GtagCommand,
    GtagConfigOptions, ParamValue,
};

#[doc(inline)]
pub use loader::{ImmediateScriptLoader, ManualScriptLoader, ScriptCallback, ScriptLoader};

#[doc(inline)]
pub use performance::{NavigationTiming, NavigationTimingSource, StaticTimingSource};

#[doc(inline)]
pub use storage::{InMemoryPreferenceStore, PreferenceStore};

#[cfg(not(target_arch = "wasm32"))]
#[doc(inline)]
pub use transport::{
    MeasurementProtocolBackend, MeasurementProtocolConfig, MeasurementProtocolEndpoint,
};

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
#[doc(inline)]
pub use consent::NavigatorSignal;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
#[doc(inline)]
pub use gtag::GtagFunctionBackend;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
#[doc(inline)]
pub use loader::DomScriptLoader;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
#[doc(inline)]
pub use performance::BrowserTimingSource;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
#[doc(inline)]
pub use storage::LocalStoragePreferenceStore;
