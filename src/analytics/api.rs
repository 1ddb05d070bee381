use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;

use crate::analytics::config::AnalyticsConfig;
use crate::analytics::consent::{ConsentGate, ConsentState, PrivacySignal};
use crate::analytics::constants::{
    DEFAULT_TOOL_ACTION, ERROR_CATEGORY, ERROR_EVENT, PAGE_LOAD_TIMING_NAME, PERFORMANCE_CATEGORY,
    PERFORMANCE_EVENT, TOOL_USAGE_CATEGORY, TOOL_USAGE_EVENT, UNHANDLED_REJECTION_TYPE,
    UNKNOWN_ERROR_MESSAGE,
};
use crate::analytics::error::{invalid_argument, AnalyticsResult};
use crate::analytics::gtag::{
    ConsentStatus, ConsentUpdate, EventParams, GtagBackend, GtagCommand, ParamValue,
};
use crate::analytics::loader::ScriptLoader;
use crate::analytics::performance::{NavigationTiming, NavigationTimingSource};
use crate::analytics::storage::PreferenceStore;
use crate::platform::runtime;

/// Where the one-shot backend initialization stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Active,
}

/// An uncaught page error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub filename: Option<String>,
    pub line: Option<u32>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, filename: impl Into<String>, line: u32) -> Self {
        self.filename = Some(filename.into());
        self.line = Some(line);
        self
    }
}

/// Page lifecycle notifications the facade reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEvent {
    DocumentReady,
    Load,
    Error(ErrorReport),
    /// Carries the rejection message when the reason had one.
    UnhandledRejection(Option<String>),
}

/// Consent-gated analytics facade.
///
/// Cloning is cheap and every clone shares the same backend state.
#[derive(Clone)]
pub struct Analytics {
    inner: Arc<AnalyticsInner>,
}

impl fmt::Debug for Analytics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analytics")
            .field("measurement_id", &self.inner.config.measurement_id)
            .field("state", &self.init_state())
            .finish()
    }
}

struct AnalyticsInner {
    config: AnalyticsConfig,
    gate: ConsentGate,
    loader: Arc<dyn ScriptLoader>,
    backend: Arc<dyn GtagBackend>,
    timing: Arc<dyn NavigationTimingSource>,
    slot: Mutex<BackendSlot>,
}

enum BackendSlot {
    Uninitialized,
    Initializing,
    Active(Arc<dyn GtagBackend>),
}

/// Assembles an [`Analytics`] instance. Collaborators left unset get the platform defaults:
/// browser implementations with `wasm-web` on wasm32, in-memory ones elsewhere.
pub struct AnalyticsBuilder {
    config: AnalyticsConfig,
    preferences: Option<Arc<dyn PreferenceStore>>,
    signal: Option<Arc<dyn PrivacySignal>>,
    loader: Option<Arc<dyn ScriptLoader>>,
    backend: Option<Arc<dyn GtagBackend>>,
    timing: Option<Arc<dyn NavigationTimingSource>>,
}

impl AnalyticsBuilder {
    pub fn preference_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = Some(store);
        self
    }

    pub fn privacy_signal(mut self, signal: Arc<dyn PrivacySignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn script_loader(mut self, loader: Arc<dyn ScriptLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn GtagBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn timing_source(mut self, timing: Arc<dyn NavigationTimingSource>) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> AnalyticsResult<Analytics> {
        self.config.validate()?;
        let gate = ConsentGate::new(
            self.config.respect_dnt,
            self.signal.unwrap_or_else(defaults::privacy_signal),
            self.preferences.unwrap_or_else(defaults::preference_store),
        );
        let inner = AnalyticsInner {
            config: self.config,
            gate,
            loader: self.loader.unwrap_or_else(defaults::script_loader),
            backend: self.backend.unwrap_or_else(defaults::backend),
            timing: self.timing.unwrap_or_else(defaults::timing_source),
            slot: Mutex::new(BackendSlot::Uninitialized),
        };
        Ok(Analytics {
            inner: Arc::new(inner),
        })
    }
}

impl Analytics {
    pub fn builder(config: AnalyticsConfig) -> AnalyticsBuilder {
        AnalyticsBuilder {
            config,
            preferences: None,
            signal: None,
            loader: None,
            backend: None,
            timing: None,
        }
    }

    pub fn new(config: AnalyticsConfig) -> AnalyticsResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.config
    }

    /// Evaluates the consent gate afresh.
    pub fn consent_state(&self) -> ConsentState {
        self.inner.gate.evaluate()
    }

    pub fn init_state(&self) -> InitState {
        match *self.inner.slot.lock().unwrap() {
            BackendSlot::Uninitialized => InitState::Uninitialized,
            BackendSlot::Initializing => InitState::Initializing,
            BackendSlot::Active(_) => InitState::Active,
        }
    }

    /// Whether a backend is present to receive events.
    pub fn is_active(&self) -> bool {
        self.active_backend().is_some()
    }

    /// Document-ready entry point: initializes the backend when the consent gate grants
    /// tracking and returns the evaluated state.
    pub fn start(&self) -> ConsentState {
        let consent = self.consent_state();
        if consent.is_granted() {
            self.initialize();
        } else {
            log::debug!("analytics disabled: {}", consent.as_str());
        }
        consent
    }

    /// Loads the gtag script and activates the backend once it arrives. Only the first call
    /// from [`InitState::Uninitialized`] has an effect; the consent gate is not consulted here.
    pub fn initialize(&self) {
        {
            let mut slot = self.inner.slot.lock().unwrap();
            if !matches!(*slot, BackendSlot::Uninitialized) {
                log::debug!("analytics backend already initialized or loading");
                return;
            }
            *slot = BackendSlot::Initializing;
        }

        let src = match self.inner.config.script_url() {
            Ok(src) => src,
            Err(err) => {
                log::warn!("analytics backend unavailable: {err}");
                *self.inner.slot.lock().unwrap() = BackendSlot::Uninitialized;
                return;
            }
        };

        let weak = Arc::downgrade(&self.inner);
        self.inner.loader.load(
            &src,
            Box::new(move |result| finish_initialization(weak, result)),
        );
    }

    /// Forwards an event to the backend, merging the default `event_category` beneath the
    /// caller's parameters. Dropped when no backend is active.
    pub fn forward(&self, name: &str, params: EventParams) {
        let Some(backend) = self.active_backend() else {
            log::debug!("analytics inactive; dropping event `{name}`");
            return;
        };

        let mut merged = EventParams::new();
        merged.insert(
            "event_category".to_string(),
            ParamValue::from(self.inner.config.default_event_category.as_str()),
        );
        merged.extend(params);

        backend.push(GtagCommand::Event {
            name: name.to_string(),
            params: merged,
        });
    }

    pub fn track_tool_usage(&self, tool_name: &str, action: Option<&str>) {
        if !self.inner.config.track_usage {
            return;
        }
        let params = EventParams::from([
            ("tool_name".to_string(), ParamValue::from(tool_name)),
            (
                "action".to_string(),
                ParamValue::from(action.unwrap_or(DEFAULT_TOOL_ACTION)),
            ),
            ("event_category".to_string(), ParamValue::from(TOOL_USAGE_CATEGORY)),
            ("event_label".to_string(), ParamValue::from(tool_name)),
        ]);
        self.forward(TOOL_USAGE_EVENT, params);
    }

    pub fn track_custom_event(&self, name: &str, params: EventParams) -> AnalyticsResult<()> {
        validate_event_name(name)?;
        self.forward(name, params);
        Ok(())
    }

    /// Sends the page load time derived from `timing`. Nothing is sent without a usable entry.
    pub fn track_page_performance(&self, timing: Option<NavigationTiming>) {
        if !self.inner.config.track_performance {
            return;
        }
        let Some(load_ms) = timing.and_then(|timing| timing.page_load_ms()) else {
            log::debug!("navigation timing unavailable; skipping performance event");
            return;
        };
        let params = EventParams::from([
            ("name".to_string(), ParamValue::from(PAGE_LOAD_TIMING_NAME)),
            ("value".to_string(), ParamValue::Int(load_ms)),
            ("event_category".to_string(), ParamValue::from(PERFORMANCE_CATEGORY)),
        ]);
        self.forward(PERFORMANCE_EVENT, params);
    }

    /// Waits out the sampling delay so late navigation metrics land, then reports the page
    /// load time from the configured timing source.
    pub async fn sample_page_performance(&self) {
        runtime::sleep(self.inner.config.performance_sample_delay()).await;
        let timing = self.inner.timing.navigation_timing();
        self.track_page_performance(timing);
    }

    pub fn track_error(&self, report: &ErrorReport) {
        if !self.inner.config.track_errors {
            return;
        }
        let mut params = EventParams::from([
            ("error_message".to_string(), ParamValue::from(report.message.as_str())),
            ("fatal".to_string(), ParamValue::Bool(false)),
            ("event_category".to_string(), ParamValue::from(ERROR_CATEGORY)),
        ]);
        if let Some(filename) = &report.filename {
            params.insert("error_source".to_string(), ParamValue::from(filename.as_str()));
        }
        if let Some(line) = report.line {
            params.insert("error_line".to_string(), ParamValue::from(line));
        }
        self.forward(ERROR_EVENT, params);
    }

    pub fn track_unhandled_rejection(&self, reason: Option<&str>) {
        if !self.inner.config.track_errors {
            return;
        }
        let params = EventParams::from([
            (
                "error_message".to_string(),
                ParamValue::from(reason.unwrap_or(UNKNOWN_ERROR_MESSAGE)),
            ),
            ("error_type".to_string(), ParamValue::from(UNHANDLED_REJECTION_TYPE)),
            ("fatal".to_string(), ParamValue::Bool(false)),
            ("event_category".to_string(), ParamValue::from(ERROR_CATEGORY)),
        ]);
        self.forward(ERROR_EVENT, params);
    }

    pub fn handle_page_event(&self, event: PageEvent) {
        match event {
            PageEvent::DocumentReady => {
                self.start();
            }
            PageEvent::Load => {
                if self.inner.config.track_performance {
                    let analytics = self.clone();
                    runtime::spawn_detached(async move {
                        analytics.sample_page_performance().await;
                    });
                }
            }
            PageEvent::Error(report) => self.track_error(&report),
            PageEvent::UnhandledRejection(reason) => {
                self.track_unhandled_rejection(reason.as_deref())
            }
        }
    }

    /// Persists the opt-out preference and tells an active backend that analytics storage is
    /// denied. The backend stays in place for the rest of the session.
    pub fn opt_out(&self) -> AnalyticsResult<()> {
        let persisted = self.inner.gate.persist_opt_out();
        if let Some(backend) = self.active_backend() {
            backend.push(GtagCommand::ConsentUpdate(ConsentUpdate {
                analytics_storage: ConsentStatus::Denied,
            }));
        }
        persisted
    }

    /// Clears the opt-out preference. An active backend gets a consent grant; otherwise the
    /// consent gate is evaluated again and initialization starts if it now grants.
    pub fn opt_in(&self) -> AnalyticsResult<()> {
        self.inner.gate.clear_opt_out()?;
        match self.active_backend() {
            Some(backend) => backend.push(GtagCommand::ConsentUpdate(ConsentUpdate {
                analytics_storage: ConsentStatus::Granted,
            })),
            None => {
                self.start();
            }
        }
        Ok(())
    }

    fn active_backend(&self) -> Option<Arc<dyn GtagBackend>> {
        match &*self.inner.slot.lock().unwrap() {
            BackendSlot::Active(backend) => Some(backend.clone()),
            _ => None,
        }
    }
}

fn finish_initialization(inner: Weak<AnalyticsInner>, result: AnalyticsResult<()>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut slot = inner.slot.lock().unwrap();
    if !matches!(*slot, BackendSlot::Initializing) {
        return;
    }

    match result {
        Ok(()) => {
            let backend = inner.backend.clone();
            backend.push(GtagCommand::Js(Utc::now()));
            backend.push(GtagCommand::Config {
                measurement_id: inner.config.measurement_id.trim().to_string(),
                options: inner.config.gtag_options(),
            });
            // an opt-out made while the script was loading found no backend to tell
            if inner.gate.opted_out() {
                backend.push(GtagCommand::ConsentUpdate(ConsentUpdate {
                    analytics_storage: ConsentStatus::Denied,
                }));
            }
            *slot = BackendSlot::Active(backend);
            log::debug!("analytics backend active");
        }
        Err(err) => {
            log::warn!("analytics backend unavailable: {err}");
            *slot = BackendSlot::Uninitialized;
        }
    }
}

fn validate_event_name(name: &str) -> AnalyticsResult<()> {
    if name.trim().is_empty() {
        return Err(invalid_argument("Event name must not be empty"));
    }
    Ok(())
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod defaults {
    use std::sync::Arc;

    use crate::analytics::consent::{NavigatorSignal, PrivacySignal};
    use crate::analytics::gtag::{GtagBackend, GtagFunctionBackend};
    use crate::analytics::loader::{DomScriptLoader, ScriptLoader};
    use crate::analytics::performance::{BrowserTimingSource, NavigationTimingSource};
    use crate::analytics::storage::{LocalStoragePreferenceStore, PreferenceStore};

    pub(super) fn preference_store() -> Arc<dyn PreferenceStore> {
        Arc::new(LocalStoragePreferenceStore)
    }

    pub(super) fn privacy_signal() -> Arc<dyn PrivacySignal> {
        Arc::new(NavigatorSignal)
    }

    pub(super) fn script_loader() -> Arc<dyn ScriptLoader> {
        Arc::new(DomScriptLoader)
    }

    pub(super) fn backend() -> Arc<dyn GtagBackend> {
        Arc::new(GtagFunctionBackend::default())
    }

    pub(super) fn timing_source() -> Arc<dyn NavigationTimingSource> {
        Arc::new(BrowserTimingSource)
    }
}

#[cfg(not(all(feature = "wasm-web", target_arch = "wasm32")))]
mod defaults {
    use std::sync::Arc;

    use crate::analytics::consent::{PrivacySignal, StaticSignal};
    use crate::analytics::gtag::{DataLayer, GtagBackend};
    use crate::analytics::loader::{ImmediateScriptLoader, ScriptLoader};
    use crate::analytics::performance::{NavigationTimingSource, StaticTimingSource};
    use crate::analytics::storage::{InMemoryPreferenceStore, PreferenceStore};

    pub(super) fn preference_store() -> Arc<dyn PreferenceStore> {
        Arc::new(InMemoryPreferenceStore::new())
    }

    pub(super) fn privacy_signal() -> Arc<dyn PrivacySignal> {
        Arc::new(StaticSignal::unset())
    }

    pub(super) fn script_loader() -> Arc<dyn ScriptLoader> {
        Arc::new(ImmediateScriptLoader)
    }

    pub(super) fn backend() -> Arc<dyn GtagBackend> {
        Arc::new(DataLayer::new())
    }

    pub(super) fn timing_source() -> Arc<dyn NavigationTimingSource> {
        Arc::new(StaticTimingSource::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::consent::StaticSignal;
    use crate::analytics::constants::{OPT_OUT_STORAGE_KEY, OPT_OUT_VALUE};
    use crate::analytics::gtag::DataLayer;
    use crate::analytics::loader::{ImmediateScriptLoader, ManualScriptLoader};
    use crate::analytics::performance::StaticTimingSource;
    use crate::analytics::storage::InMemoryPreferenceStore;

    struct Harness {
        analytics: Analytics,
        layer: Arc<DataLayer>,
        store: Arc<InMemoryPreferenceStore>,
        loader: Arc<ManualScriptLoader>,
    }

    fn harness(config: AnalyticsConfig, signal: StaticSignal) -> Harness {
        let layer = Arc::new(DataLayer::new());
        let store = Arc::new(InMemoryPreferenceStore::new());
        let loader = Arc::new(ManualScriptLoader::new());
        let analytics = Analytics::builder(config)
            .backend(layer.clone())
            .preference_store(store.clone())
            .script_loader(loader.clone())
            .privacy_signal(Arc::new(signal))
            .build()
            .unwrap();
        Harness {
            analytics,
            layer,
            store,
            loader,
        }
    }

    fn active(config: AnalyticsConfig) -> Harness {
        let h = harness(config, StaticSignal::unset());
        assert_eq!(h.analytics.start(), ConsentState::Granted);
        h.loader.complete_all();
        assert!(h.analytics.is_active());
        h.layer.clear();
        h
    }

    fn config() -> AnalyticsConfig {
        AnalyticsConfig::new("G-TEST123").with_performance_sample_delay(Default::default())
    }

    fn str_param<'a>(params: &'a EventParams, key: &str) -> Option<&'a str> {
        params.get(key).and_then(ParamValue::as_str)
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = Analytics::new(AnalyticsConfig::default()).unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");
    }

    #[test]
    fn start_loads_tagged_script_and_configures_backend() {
        let h = harness(config(), StaticSignal::unset());
        assert_eq!(h.analytics.start(), ConsentState::Granted);
        assert_eq!(h.analytics.init_state(), InitState::Initializing);
        assert!(!h.analytics.is_active());
        assert_eq!(
            h.loader.requested(),
            vec!["https://www.googletagmanager.com/gtag/js?id=G-TEST123"]
        );

        h.loader.complete_all();
        assert_eq!(h.analytics.init_state(), InitState::Active);

        let commands = h.layer.commands();
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], GtagCommand::Js(_)));
        match &commands[1] {
            GtagCommand::Config {
                measurement_id,
                options,
            } => {
                assert_eq!(measurement_id, "G-TEST123");
                assert!(options.anonymize_ip);
                assert!(!options.allow_google_signals);
                assert!(!options.allow_ad_personalization_signals);
                assert_eq!(options.cookie_flags, "SameSite=None;Secure");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn denied_consent_never_loads_script() {
        let h = harness(config(), StaticSignal::asserted());
        h.store.set(OPT_OUT_STORAGE_KEY, OPT_OUT_VALUE).unwrap();
        assert_eq!(h.analytics.start(), ConsentState::DeniedBySignal);
        assert!(h.loader.requested().is_empty());
        assert_eq!(h.analytics.init_state(), InitState::Uninitialized);

        let h = harness(config(), StaticSignal::unset());
        h.store.set(OPT_OUT_STORAGE_KEY, OPT_OUT_VALUE).unwrap();
        assert_eq!(h.analytics.start(), ConsentState::DeniedByPreference);
        assert!(h.loader.requested().is_empty());
    }

    #[test]
    fn initialize_is_one_shot() {
        let h = harness(config(), StaticSignal::unset());
        h.analytics.initialize();
        h.analytics.initialize();
        assert_eq!(h.loader.requested().len(), 1);

        h.loader.complete_all();
        h.analytics.initialize();
        assert_eq!(h.loader.requested().len(), 1);
        assert_eq!(h.layer.commands().len(), 2);
    }

    #[test]
    fn failed_load_keeps_facade_inactive_and_allows_retry() {
        let h = harness(config(), StaticSignal::unset());
        h.analytics.start();
        h.loader.fail_all("net::ERR_BLOCKED_BY_CLIENT");
        assert_eq!(h.analytics.init_state(), InitState::Uninitialized);
        assert!(!h.analytics.is_active());

        h.analytics.track_tool_usage("uuid-generator", None);
        assert!(h.layer.commands().is_empty());

        h.analytics.opt_in().unwrap();
        assert_eq!(h.loader.requested().len(), 2);
        h.loader.complete_all();
        assert!(h.analytics.is_active());
    }

    #[test]
    fn forward_without_backend_is_noop() {
        let h = harness(config(), StaticSignal::unset());
        h.analytics.forward("custom", EventParams::new());
        h.analytics.track_tool_usage("json-to-go", None);
        h.analytics.track_unhandled_rejection(Some("Boom"));
        assert!(h.layer.commands().is_empty());

        // no replay once the backend arrives
        h.analytics.start();
        h.loader.complete_all();
        assert!(h.layer.events().is_empty());
    }

    #[test]
    fn forward_merges_default_category_under_caller_params() {
        let h = active(config());
        h.analytics.forward("copy", EventParams::new());
        h.analytics.forward(
            "share",
            EventParams::from([("event_category".to_string(), ParamValue::from("Social"))]),
        );

        let events = h.layer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(str_param(&events[0].1, "event_category"), Some("engagement"));
        assert_eq!(str_param(&events[1].1, "event_category"), Some("Social"));
    }

    #[test]
    fn tool_usage_event_shape() {
        let h = active(config());
        h.analytics.track_tool_usage("X", None);

        let events = h.layer.events();
        assert_eq!(events.len(), 1);
        let (name, params) = &events[0];
        assert_eq!(name, "tool_usage");
        assert_eq!(str_param(params, "tool_name"), Some("X"));
        assert_eq!(str_param(params, "action"), Some("use"));
        assert_eq!(str_param(params, "event_category"), Some("Tools"));
        assert_eq!(str_param(params, "event_label"), Some("X"));

        h.analytics.track_tool_usage("X", Some("copy"));
        assert_eq!(str_param(&h.layer.events()[1].1, "action"), Some("copy"));
    }

    #[test]
    fn disabled_trackers_send_nothing() {
        let h = active(
            config()
                .with_track_usage(false)
                .with_track_errors(false)
                .with_track_performance(false),
        );
        h.analytics.track_tool_usage("X", None);
        h.analytics.track_error(&ErrorReport::new("oops"));
        h.analytics.track_unhandled_rejection(None);
        h.analytics
            .track_page_performance(Some(NavigationTiming::new(100.0, 2500.0)));
        assert!(h.layer.events().is_empty());

        h.analytics
            .track_custom_event("still_sent", EventParams::new())
            .unwrap();
        assert_eq!(h.layer.events().len(), 1);
    }

    #[test]
    fn custom_event_requires_name() {
        let h = active(config());
        let err = h
            .analytics
            .track_custom_event("  ", EventParams::new())
            .unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");
        assert!(h.layer.events().is_empty());
    }

    #[test]
    fn performance_value_is_rounded_load_time() {
        let h = active(config());
        h.analytics
            .track_page_performance(Some(NavigationTiming::new(100.0, 2500.0)));
        h.analytics.track_page_performance(None);

        let events = h.layer.events();
        assert_eq!(events.len(), 1);
        let (name, params) = &events[0];
        assert_eq!(name, "timing_complete");
        assert_eq!(params.get("value"), Some(&ParamValue::Int(2400)));
        assert_eq!(str_param(params, "event_category"), Some("Performance"));
    }

    #[test]
    fn error_reports_carry_location() {
        let h = active(config());
        h.analytics
            .track_error(&ErrorReport::new("x is undefined").with_location("/js/app.js", 42));

        let (name, params) = &h.layer.events()[0];
        assert_eq!(name, "exception");
        assert_eq!(str_param(params, "error_message"), Some("x is undefined"));
        assert_eq!(str_param(params, "error_source"), Some("/js/app.js"));
        assert_eq!(params.get("error_line"), Some(&ParamValue::Int(42)));
        assert_eq!(str_param(params, "event_category"), Some("Errors"));
    }

    #[test]
    fn rejection_messages_fall_back_to_unknown() {
        let h = active(config());
        h.analytics
            .handle_page_event(PageEvent::UnhandledRejection(Some("Boom".into())));
        h.analytics
            .handle_page_event(PageEvent::UnhandledRejection(None));

        let events = h.layer.events();
        assert_eq!(str_param(&events[0].1, "error_message"), Some("Boom"));
        assert_eq!(str_param(&events[1].1, "error_message"), Some("Unknown error"));
        assert_eq!(str_param(&events[1].1, "error_type"), Some("unhandled_rejection"));
    }

    #[test]
    fn opt_out_persists_and_revokes_without_removing_backend() {
        let h = active(config());
        h.analytics.opt_out().unwrap();
        assert_eq!(
            h.store.get(OPT_OUT_STORAGE_KEY).unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            h.layer.commands(),
            vec![GtagCommand::ConsentUpdate(ConsentUpdate {
                analytics_storage: ConsentStatus::Denied,
            })]
        );
        assert!(h.analytics.is_active());
        assert_eq!(h.analytics.consent_state(), ConsentState::DeniedByPreference);

        h.analytics.track_tool_usage("X", None);
        assert_eq!(h.layer.events().len(), 1);
    }

    #[test]
    fn opt_out_while_initializing_is_delivered_on_activation() {
        let h = harness(config(), StaticSignal::unset());
        assert_eq!(h.analytics.start(), ConsentState::Granted);
        h.analytics.opt_out().unwrap();
        assert_eq!(h.analytics.consent_state(), ConsentState::DeniedByPreference);
        assert!(h.layer.commands().is_empty());

        h.loader.complete_all();
        assert!(h.analytics.is_active());
        let commands = h.layer.commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], GtagCommand::Js(_)));
        assert!(matches!(commands[1], GtagCommand::Config { .. }));
        assert_eq!(
            commands[2],
            GtagCommand::ConsentUpdate(ConsentUpdate {
                analytics_storage: ConsentStatus::Denied,
            })
        );
    }

    #[test]
    fn opt_in_clears_preference_and_grants_active_backend() {
        let h = active(config());
        h.analytics.opt_out().unwrap();
        h.layer.clear();

        h.analytics.opt_in().unwrap();
        assert_eq!(h.store.get(OPT_OUT_STORAGE_KEY).unwrap(), None);
        assert_eq!(
            h.layer.commands(),
            vec![GtagCommand::ConsentUpdate(ConsentUpdate {
                analytics_storage: ConsentStatus::Granted,
            })]
        );
    }

    #[test]
    fn opt_in_from_disabled_initializes() {
        let h = harness(config(), StaticSignal::unset());
        h.analytics.opt_out().unwrap();
        assert_eq!(h.analytics.start(), ConsentState::DeniedByPreference);
        assert!(h.layer.commands().is_empty());

        h.analytics.opt_in().unwrap();
        assert_eq!(h.analytics.init_state(), InitState::Initializing);
        h.loader.complete_all();
        assert!(h.analytics.is_active());
    }

    #[test]
    fn opt_in_still_respects_do_not_track() {
        let h = harness(config(), StaticSignal::asserted());
        h.analytics.opt_in().unwrap();
        assert!(h.loader.requested().is_empty());
        assert_eq!(h.analytics.init_state(), InitState::Uninitialized);
    }

    #[test]
    fn document_ready_starts_with_default_collaborators() {
        let layer = Arc::new(DataLayer::new());
        let analytics = Analytics::builder(config())
            .backend(layer.clone())
            .script_loader(Arc::new(ImmediateScriptLoader))
            .build()
            .unwrap();
        analytics.handle_page_event(PageEvent::DocumentReady);
        assert!(analytics.is_active());
        assert_eq!(layer.commands().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sample_page_performance_reads_timing_source() {
        let layer = Arc::new(DataLayer::new());
        let analytics = Analytics::builder(config())
            .backend(layer.clone())
            .timing_source(Arc::new(StaticTimingSource::new(Some(NavigationTiming::new(
                100.0, 2500.0,
            )))))
            .build()
            .unwrap();
        analytics.start();
        layer.clear();

        analytics.sample_page_performance().await;
        let events = layer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.get("value"), Some(&ParamValue::Int(2400)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_event_schedules_performance_sample() {
        let layer = Arc::new(DataLayer::new());
        let analytics = Analytics::builder(config())
            .backend(layer.clone())
            .timing_source(Arc::new(StaticTimingSource::new(Some(NavigationTiming::new(
                0.0, 812.4,
            )))))
            .build()
            .unwrap();
        analytics.start();
        layer.clear();

        analytics.handle_page_event(PageEvent::Load);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let events = layer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "timing_complete");
        assert_eq!(events[0].1.get("value"), Some(&ParamValue::Int(812)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_timing_entry_sends_nothing() {
        let layer = Arc::new(DataLayer::new());
        let analytics = Analytics::builder(config())
            .backend(layer.clone())
            .build()
            .unwrap();
        analytics.start();
        layer.clear();

        analytics.sample_page_performance().await;
        assert!(layer.events().is_empty());
    }
}
