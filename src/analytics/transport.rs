use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;

use crate::analytics::error::{internal_error, invalid_argument, network_error, AnalyticsResult};
use crate::analytics::gtag::{ConsentStatus, EventParams, GtagBackend, GtagCommand};

/// Configuration used to dispatch analytics events through the GA4 Measurement Protocol.
#[derive(Clone, Debug)]
pub struct MeasurementProtocolConfig {
    measurement_id: String,
    api_secret: String,
    endpoint: MeasurementProtocolEndpoint,
    timeout: Duration,
}

impl MeasurementProtocolConfig {
    pub fn new(measurement_id: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            endpoint: MeasurementProtocolEndpoint::Collect,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_endpoint(mut self, endpoint: MeasurementProtocolEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn measurement_id(&self) -> &str {
        &self.measurement_id
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

/// Supported endpoints for the Measurement Protocol.
#[derive(Clone, Debug)]
pub enum MeasurementProtocolEndpoint {
    /// Production collection endpoint: <https://www.google-analytics.com/mp/collect>
    Collect,
    /// Debugging endpoint: <https://www.google-analytics.com/debug/mp/collect>
    DebugCollect,
    /// Custom endpoint (primarily for testing).
    Custom(String),
}

impl MeasurementProtocolEndpoint {
    fn as_str(&self) -> &str {
        match self {
            MeasurementProtocolEndpoint::Collect => "https://www.google-analytics.com/mp/collect",
            MeasurementProtocolEndpoint::DebugCollect => {
                "https://www.google-analytics.com/debug/mp/collect"
            }
            MeasurementProtocolEndpoint::Custom(url) => url,
        }
    }
}

/// Backend that posts `event` commands to the Measurement Protocol instead of a page tag.
///
/// A `consent update` denying analytics storage pauses delivery until a later grant; other
/// commands are only relevant to the browser tag and are ignored.
#[derive(Debug)]
pub struct MeasurementProtocolBackend {
    client: Client,
    config: MeasurementProtocolConfig,
    client_id: Mutex<String>,
    storage_granted: AtomicBool,
}

impl MeasurementProtocolBackend {
    pub fn new(config: MeasurementProtocolConfig) -> AnalyticsResult<Self> {
        if config.measurement_id().trim().is_empty() {
            return Err(invalid_argument(
                "measurement protocol measurement_id must not be empty",
            ));
        }
        if config.api_secret().trim().is_empty() {
            return Err(invalid_argument(
                "measurement protocol api_secret must not be empty",
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| internal_error(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            config,
            client_id: Mutex::new(generate_client_id()),
            storage_granted: AtomicBool::new(true),
        })
    }

    /// Overrides the randomly generated client identifier.
    pub fn set_client_id(&self, client_id: impl Into<String>) {
        *self.client_id.lock().unwrap() = client_id.into();
    }

    pub fn client_id(&self) -> String {
        self.client_id.lock().unwrap().clone()
    }

    pub fn storage_granted(&self) -> bool {
        self.storage_granted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &MeasurementProtocolConfig {
        &self.config
    }

    /// Sends a single analytics event via the measurement protocol.
    pub fn send_event(&self, event_name: &str, params: &EventParams) -> AnalyticsResult<()> {
        let client_id = self.client_id();
        let payload = MeasurementPayload {
            client_id: &client_id,
            events: vec![MeasurementEvent {
                name: event_name,
                params,
            }],
        };

        let response = self
            .client
            .post(self.config.endpoint.as_str())
            .query(&[
                ("measurement_id", self.config.measurement_id()),
                ("api_secret", self.config.api_secret()),
            ])
            .json(&payload)
            .send()
            .map_err(|err| network_error(format!("failed to send analytics event: {err}")))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response
            .text()
            .unwrap_or_else(|_| "<unavailable response body>".to_string());

        let message = match status {
            StatusCode::BAD_REQUEST => {
                format!("measurement protocol rejected the event (400). Response: {body}")
            }
            _ => format!(
                "measurement protocol request failed with status {status}. Response: {body}"
            ),
        };

        Err(network_error(message))
    }
}

impl GtagBackend for MeasurementProtocolBackend {
    fn push(&self, command: GtagCommand) {
        match command {
            GtagCommand::Event { name, params } => {
                if !self.storage_granted() {
                    log::debug!("analytics storage denied; not sending `{name}`");
                    return;
                }
                if let Err(err) = self.send_event(&name, &params) {
                    log::warn!("{err}");
                }
            }
            GtagCommand::ConsentUpdate(update) => {
                let granted = update.analytics_storage == ConsentStatus::Granted;
                self.storage_granted.store(granted, Ordering::SeqCst);
            }
            GtagCommand::Js(_) | GtagCommand::Config { .. } => {}
        }
    }
}

#[derive(Serialize)]
struct MeasurementPayload<'a> {
    client_id: &'a str,
    events: Vec<MeasurementEvent<'a>>,
}

#[derive(Serialize)]
struct MeasurementEvent<'a> {
    name: &'a str,
    #[serde(rename = "params")]
    params: &'a EventParams,
}

fn generate_client_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(32)
        .collect()
}
