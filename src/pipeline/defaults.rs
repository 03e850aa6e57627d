//! Headers attached to every outbound call unless a call overrides them.

use std::sync::{Arc, RwLock};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "pipeline::defaults";

/// Shared, mutable default header set.
///
/// Cloning yields another handle onto the same headers.
#[derive(Clone, Default)]
pub struct DefaultHeaders {
    inner: Arc<RwLock<HeaderMap>>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: HeaderName, value: HeaderValue) {
        rw_write(&self.inner, SOURCE, "set").insert(name, value);
    }

    pub fn remove(&self, name: &HeaderName) {
        rw_write(&self.inner, SOURCE, "remove").remove(name);
    }

    pub fn get(&self, name: &HeaderName) -> Option<HeaderValue> {
        rw_read(&self.inner, SOURCE, "get").get(name).cloned()
    }

    /// Copy of the current defaults, used as the starting point for one call.
    pub fn snapshot(&self) -> HeaderMap {
        rw_read(&self.inner, SOURCE, "snapshot").clone()
    }
}

impl std::fmt::Debug for DefaultHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = rw_read(&self.inner, SOURCE, "debug")
            .keys()
            .map(|name| name.to_string())
            .collect();
        f.debug_struct("DefaultHeaders").field("names", &names).finish()
    }
}
