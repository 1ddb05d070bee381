/// Local storage key holding the visitor's opt-out preference.
pub const OPT_OUT_STORAGE_KEY: &str = "analytics-opt-out";
/// Value stored under [`OPT_OUT_STORAGE_KEY`] when the visitor opted out.
pub const OPT_OUT_VALUE: &str = "true";
/// `navigator.doNotTrack` value meaning the signal is asserted.
pub const DO_NOT_TRACK_ASSERTED: &str = "1";

pub const GTAG_SCRIPT_URL: &str = "https://www.googletagmanager.com/gtag/js";
pub const DATA_LAYER_NAME: &str = "dataLayer";

pub const DEFAULT_COOKIE_FLAGS: &str = "SameSite=None;Secure";
pub const DEFAULT_EVENT_CATEGORY: &str = "engagement";
pub const DEFAULT_PERFORMANCE_SAMPLE_DELAY_MS: u64 = 1_000;

pub const TOOL_USAGE_EVENT: &str = "tool_usage";
pub const TOOL_USAGE_CATEGORY: &str = "Tools";
pub const DEFAULT_TOOL_ACTION: &str = "use";

pub const PERFORMANCE_EVENT: &str = "timing_complete";
pub const PERFORMANCE_CATEGORY: &str = "Performance";
pub const PAGE_LOAD_TIMING_NAME: &str = "load";

pub const ERROR_EVENT: &str = "exception";
pub const ERROR_CATEGORY: &str = "Errors";
pub const UNHANDLED_REJECTION_TYPE: &str = "unhandled_rejection";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";
