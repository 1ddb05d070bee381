use std::sync::Arc;

use crate::analytics::constants::{DO_NOT_TRACK_ASSERTED, OPT_OUT_STORAGE_KEY, OPT_OUT_VALUE};
use crate::analytics::error::AnalyticsResult;
use crate::analytics::storage::PreferenceStore;

/// Outcome of a consent evaluation. Derived on demand and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsentState {
    DeniedBySignal,
    DeniedByPreference,
    Granted,
}

impl ConsentState {
    pub fn is_granted(self) -> bool {
        self == ConsentState::Granted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsentState::DeniedBySignal => "denied-by-signal",
            ConsentState::DeniedByPreference => "denied-by-preference",
            ConsentState::Granted => "granted",
        }
    }
}

/// Source of the browser's do-not-track indicator.
pub trait PrivacySignal: Send + Sync {
    /// Raw indicator value, `None` when the runtime exposes none.
    fn do_not_track(&self) -> Option<String>;
}

/// Fixed signal value, for native builds and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticSignal(Option<String>);

impl StaticSignal {
    pub fn new(value: Option<String>) -> Self {
        Self(value)
    }

    pub fn asserted() -> Self {
        Self(Some(DO_NOT_TRACK_ASSERTED.to_string()))
    }

    pub fn unset() -> Self {
        Self(None)
    }
}

impl PrivacySignal for StaticSignal {
    fn do_not_track(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod web {
    use super::PrivacySignal;

    /// Reads `navigator.doNotTrack`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NavigatorSignal;

    impl PrivacySignal for NavigatorSignal {
        fn do_not_track(&self) -> Option<String> {
            let value = web_sys::window()?.navigator().do_not_track();
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        }
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub use web::NavigatorSignal;

/// Decides whether tracking is permitted from the do-not-track signal and the persisted
/// opt-out preference.
#[derive(Clone)]
pub struct ConsentGate {
    respect_dnt: bool,
    signal: Arc<dyn PrivacySignal>,
    preferences: Arc<dyn PreferenceStore>,
}

impl ConsentGate {
    pub fn new(
        respect_dnt: bool,
        signal: Arc<dyn PrivacySignal>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            respect_dnt,
            signal,
            preferences,
        }
    }

    pub fn evaluate(&self) -> ConsentState {
        if self.respect_dnt
            && self.signal.do_not_track().as_deref() == Some(DO_NOT_TRACK_ASSERTED)
        {
            return ConsentState::DeniedBySignal;
        }

        if self.opted_out() {
            return ConsentState::DeniedByPreference;
        }

        ConsentState::Granted
    }

    /// Whether the persisted preference holds the opt-out value. An unreadable store counts
    /// as no preference.
    pub fn opted_out(&self) -> bool {
        match self.preferences.get(OPT_OUT_STORAGE_KEY) {
            Ok(value) => value.as_deref() == Some(OPT_OUT_VALUE),
            Err(err) => {
                log::warn!("failed to read analytics preference: {err}");
                false
            }
        }
    }

    pub(crate) fn persist_opt_out(&self) -> AnalyticsResult<()> {
        self.preferences.set(OPT_OUT_STORAGE_KEY, OPT_OUT_VALUE)
    }

    pub(crate) fn clear_opt_out(&self) -> AnalyticsResult<()> {
        self.preferences.remove(OPT_OUT_STORAGE_KEY)
    }
}
