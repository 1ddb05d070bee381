use std::collections::HashMap;
use std::sync::Mutex;

use crate::analytics::error::AnalyticsResult;

/// Key/value storage for the visitor's persisted analytics preference.
///
/// Browser builds use `window.localStorage`; anything else can plug in its own backend.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> AnalyticsResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AnalyticsResult<()>;
    fn remove(&self, key: &str) -> AnalyticsResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get(&self, key: &str) -> AnalyticsResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AnalyticsResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AnalyticsResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod web {
    use wasm_bindgen::JsValue;
    use web_sys::Storage;

    use super::PreferenceStore;
    use crate::analytics::error::{storage_error, AnalyticsError, AnalyticsResult};

    /// Preference store backed by `window.localStorage`. The storage object is looked up on
    /// every call so the store holds no JS handles.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LocalStoragePreferenceStore;

    impl LocalStoragePreferenceStore {
        fn storage() -> AnalyticsResult<Storage> {
            let window = web_sys::window()
                .ok_or_else(|| storage_error("window object is not available in this environment"))?;
            window
                .local_storage()
                .map_err(map_js_error)?
                .ok_or_else(|| storage_error("localStorage is unavailable"))
        }
    }

    impl PreferenceStore for LocalStoragePreferenceStore {
        fn get(&self, key: &str) -> AnalyticsResult<Option<String>> {
            Self::storage()?.get_item(key).map_err(map_js_error)
        }

        fn set(&self, key: &str, value: &str) -> AnalyticsResult<()> {
            Self::storage()?.set_item(key, value).map_err(map_js_error)
        }

        fn remove(&self, key: &str) -> AnalyticsResult<()> {
            Self::storage()?.remove_item(key).map_err(map_js_error)
        }
    }

    fn map_js_error(err: JsValue) -> AnalyticsError {
        let detail = err
            .as_string()
            .or_else(|| {
                js_sys::JSON::stringify(&err)
                    .ok()
                    .and_then(|value| value.as_string())
            })
            .unwrap_or_else(|| format!("{err:?}"));
        storage_error(format!("web storage error: {detail}"))
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub use web::LocalStoragePreferenceStore;
