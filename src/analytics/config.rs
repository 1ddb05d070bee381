use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::analytics::constants::{
    DEFAULT_COOKIE_FLAGS, DEFAULT_EVENT_CATEGORY, DEFAULT_PERFORMANCE_SAMPLE_DELAY_MS,
    GTAG_SCRIPT_URL,
};
use crate::analytics::error::{internal_error, invalid_argument, AnalyticsResult};
use crate::analytics::gtag::GtagConfigOptions;

/// Deploy-time configuration for the analytics loader.
///
/// Keys deserialize from the camelCase names used by the page configuration object
/// (`measurementId`, `respectDNT`, `anonymizeIP`, ...). Snake case aliases are accepted so the
/// same struct can be filled from `key=value` environment strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsConfig {
    #[serde(alias = "measurement_id")]
    pub measurement_id: String,
    #[serde(rename = "respectDNT", alias = "respect_dnt")]
    pub respect_dnt: bool,
    #[serde(rename = "anonymizeIP", alias = "anonymize_ip")]
    pub anonymize_ip: bool,
    #[serde(alias = "disable_advertising")]
    pub disable_advertising: bool,
    #[serde(alias = "track_usage")]
    pub track_usage: bool,
    #[serde(alias = "track_performance")]
    pub track_performance: bool,
    #[serde(alias = "track_errors")]
    pub track_errors: bool,
    #[serde(alias = "cookie_flags")]
    pub cookie_flags: String,
    #[serde(alias = "default_event_category")]
    pub default_event_category: String,
    #[serde(alias = "performance_sample_delay_ms")]
    pub performance_sample_delay_ms: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            measurement_id: String::new(),
            respect_dnt: true,
            anonymize_ip: true,
            disable_advertising: true,
            track_usage: true,
            track_performance: true,
            track_errors: true,
            cookie_flags: DEFAULT_COOKIE_FLAGS.to_string(),
            default_event_category: DEFAULT_EVENT_CATEGORY.to_string(),
            performance_sample_delay_ms: DEFAULT_PERFORMANCE_SAMPLE_DELAY_MS,
        }
    }
}

impl AnalyticsConfig {
    pub fn new(measurement_id: impl Into<String>) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            ..Default::default()
        }
    }

    pub fn with_respect_dnt(mut self, value: bool) -> Self {
        self.respect_dnt = value;
        self
    }

    pub fn with_anonymize_ip(mut self, value: bool) -> Self {
        self.anonymize_ip = value;
        self
    }

    pub fn with_disable_advertising(mut self, value: bool) -> Self {
        self.disable_advertising = value;
        self
    }

    pub fn with_track_usage(mut self, value: bool) -> Self {
        self.track_usage = value;
        self
    }

    pub fn with_track_performance(mut self, value: bool) -> Self {
        self.track_performance = value;
        self
    }

    pub fn with_track_errors(mut self, value: bool) -> Self {
        self.track_errors = value;
        self
    }

    pub fn with_cookie_flags(mut self, flags: impl Into<String>) -> Self {
        self.cookie_flags = flags.into();
        self
    }

    pub fn with_default_event_category(mut self, category: impl Into<String>) -> Self {
        self.default_event_category = category.into();
        self
    }

    pub fn with_performance_sample_delay(mut self, delay: Duration) -> Self {
        self.performance_sample_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn performance_sample_delay(&self) -> Duration {
        Duration::from_millis(self.performance_sample_delay_ms)
    }

    /// Checks the values that the loader cannot work without.
    pub fn validate(&self) -> AnalyticsResult<()> {
        let id = self.measurement_id.trim();
        if id.is_empty() {
            return Err(invalid_argument("measurementId must not be empty"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(invalid_argument(format!(
                "measurementId `{id}` must not contain whitespace"
            )));
        }
        Ok(())
    }

    /// URL of the gtag.js script tagged with this measurement id.
    pub fn script_url(&self) -> AnalyticsResult<String> {
        let url = Url::parse_with_params(GTAG_SCRIPT_URL, &[("id", self.measurement_id.trim())])
            .map_err(|err| internal_error(format!("invalid gtag script url: {err}")))?;
        Ok(url.into())
    }

    /// Options carried by the `config` command. Advertising signals are the inverse of
    /// `disable_advertising`.
    pub fn gtag_options(&self) -> GtagConfigOptions {
        GtagConfigOptions {
            anonymize_ip: self.anonymize_ip,
            allow_google_signals: !self.disable_advertising,
            allow_ad_personalization_signals: !self.disable_advertising,
            cookie_flags: self.cookie_flags.clone(),
        }
    }
}
