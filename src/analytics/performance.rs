/// Millisecond timestamps from the page's navigation-timing entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavigationTiming {
    pub fetch_start: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    pub fn new(fetch_start: f64, load_event_end: f64) -> Self {
        Self {
            fetch_start,
            load_event_end,
        }
    }

    /// Page load time in whole milliseconds, `None` when the entry is not usable (load not
    /// finished yet, or values that are not finite).
    pub fn page_load_ms(&self) -> Option<i64> {
        let elapsed = (self.load_event_end - self.fetch_start).round();
        if !elapsed.is_finite() || elapsed < 0.0 {
            return None;
        }
        Some(elapsed as i64)
    }
}

pub trait NavigationTimingSource: Send + Sync {
    fn navigation_timing(&self) -> Option<NavigationTiming>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StaticTimingSource(Option<NavigationTiming>);

impl StaticTimingSource {
    pub fn new(timing: Option<NavigationTiming>) -> Self {
        Self(timing)
    }
}

impl NavigationTimingSource for StaticTimingSource {
    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.0
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod web {
    use wasm_bindgen::JsCast;
    use web_sys::PerformanceNavigationTiming;

    use super::{NavigationTiming, NavigationTimingSource};

    /// Reads the single `navigation` entry from `window.performance`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct BrowserTimingSource;

    impl NavigationTimingSource for BrowserTimingSource {
        fn navigation_timing(&self) -> Option<NavigationTiming> {
            let performance = web_sys::window()?.performance()?;
            let entries = performance.get_entries_by_type("navigation");
            if entries.length() == 0 {
                return None;
            }
            let entry = entries
                .get(0)
                .dyn_into::<PerformanceNavigationTiming>()
                .ok()?;
            Some(NavigationTiming::new(
                entry.fetch_start(),
                entry.load_event_end(),
            ))
        }
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub use web::BrowserTimingSource;
