use std::sync::RwLock;

use reqwest::header::HeaderName;

use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "auth::csrf";

/// Header carrying the anti-forgery token on state-changing calls.
pub const ANTI_FORGERY_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

/// Holds the most recently fetched anti-forgery token.
#[derive(Debug, Default)]
pub struct AntiForgeryStore {
    token: RwLock<Option<String>>,
}

impl AntiForgeryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        rw_read(&self.token, SOURCE, "get").clone()
    }

    /// Replace the token. Blank values clear it.
    pub fn set(&self, token: Option<String>) {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        *rw_write(&self.token, SOURCE, "set") = token;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}
