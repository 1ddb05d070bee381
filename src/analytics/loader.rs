use std::fmt;
use std::sync::Mutex;

use crate::analytics::error::{script_load_error, AnalyticsResult};

/// Called once with the outcome of a script load.
pub type ScriptCallback = Box<dyn FnOnce(AnalyticsResult<()>) + Send + 'static>;

/// Fetches the remote tag script. Loading is fire-and-forget: `load` returns immediately and
/// reports completion through the callback.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, src: &str, on_complete: ScriptCallback);
}

/// Completes every load successfully on the spot. Used where no document exists to inject
/// into.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScriptLoader;

impl ScriptLoader for ImmediateScriptLoader {
    fn load(&self, src: &str, on_complete: ScriptCallback) {
        log::debug!("no document available; treating {src} as loaded");
        on_complete(Ok(()));
    }
}

/// Holds loads until the owner resolves them with [`ManualScriptLoader::complete_all`] or
/// [`ManualScriptLoader::fail_all`].
#[derive(Default)]
pub struct ManualScriptLoader {
    requested: Mutex<Vec<String>>,
    pending: Mutex<Vec<ScriptCallback>>,
}

impl fmt::Debug for ManualScriptLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScriptLoader")
            .field("requested", &self.requested())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every source passed to `load`, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn complete_all(&self) {
        for callback in self.take_pending() {
            callback(Ok(()));
        }
    }

    pub fn fail_all(&self, message: &str) {
        for callback in self.take_pending() {
            callback(Err(script_load_error(message)));
        }
    }

    // Callbacks may start another load, so the lock is released before they run.
    fn take_pending(&self) -> Vec<ScriptCallback> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

impl ScriptLoader for ManualScriptLoader {
    fn load(&self, src: &str, on_complete: ScriptCallback) {
        self.requested.lock().unwrap().push(src.to_string());
        self.pending.lock().unwrap().push(on_complete);
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
mod web {
    use std::cell::RefCell;
    use std::rc::Rc;

    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;

    use super::{ScriptCallback, ScriptLoader};
    use crate::analytics::error::{script_load_error, AnalyticsResult};

    /// Injects an async `<script>` tag into the document head.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct DomScriptLoader;

    impl ScriptLoader for DomScriptLoader {
        fn load(&self, src: &str, on_complete: ScriptCallback) {
            let slot = Rc::new(RefCell::new(Some(on_complete)));
            if let Err(err) = inject(src, slot.clone()) {
                if let Some(callback) = slot.borrow_mut().take() {
                    callback(Err(err));
                }
            }
        }
    }

    fn inject(src: &str, slot: Rc<RefCell<Option<ScriptCallback>>>) -> AnalyticsResult<()> {
        let window = web_sys::window().ok_or_else(|| script_load_error("Window not available"))?;
        let document = window
            .document()
            .ok_or_else(|| script_load_error("Document not available"))?;

        if document
            .query_selector(&format!("script[src=\"{src}\"]"))
            .ok()
            .flatten()
            .is_some()
        {
            log::debug!("gtag script already present: {src}");
            if let Some(callback) = slot.borrow_mut().take() {
                callback(Ok(()));
            }
            return Ok(());
        }

        let script = document
            .create_element("script")
            .map_err(|err| script_load_error(format!("Failed to create script: {err:?}")))?
            .dyn_into::<web_sys::HtmlScriptElement>()
            .map_err(|_| script_load_error("Script element has wrong type"))?;
        script.set_async(true);
        script.set_src(src);

        let success_slot = slot.clone();
        let onload = Closure::wrap(Box::new(move || {
            if let Some(callback) = success_slot.borrow_mut().take() {
                callback(Ok(()));
            }
        }) as Box<dyn FnMut()>);

        let error_slot = slot;
        let src_string = src.to_string();
        let failed = script.clone();
        let onerror = Closure::wrap(Box::new(move || {
            // a dead tag would satisfy the presence check on the next attempt
            failed.remove();
            if let Some(callback) = error_slot.borrow_mut().take() {
                callback(Err(script_load_error(format!(
                    "Failed to load gtag script: {src_string}"
                ))));
            }
        }) as Box<dyn FnMut()>);

        script.set_onload(Some(onload.as_ref().unchecked_ref()));
        script.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onload.forget();
        onerror.forget();

        if let Some(head) = document.head() {
            head.append_child(&script).map_err(|err| {
                script_load_error(format!("Failed to append script to <head>: {err:?}"))
            })?;
        } else if let Some(body) = document.body() {
            body.append_child(&script).map_err(|err| {
                script_load_error(format!("Failed to append script to <body>: {err:?}"))
            })?;
        } else {
            return Err(script_load_error("No <head> or <body> element found"));
        }
        Ok(())
    }
}

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub use web::DomScriptLoader;
