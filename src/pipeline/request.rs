use reqwest::Method;
use serde_json::Value;

use crate::cache::QueryParams;

/// What role a call plays in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Idempotent data read.
    Read,
    /// Create, update or delete.
    Write,
    /// Sign-in or sign-up; runs without a credential and is never retried.
    SignIn,
    /// The renewal exchange itself.
    Renewal,
}

impl CallKind {
    /// Whether the access credential is attached and a 401 triggers renewal.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    /// Whether the call goes to the authentication service.
    pub fn targets_auth(self) -> bool {
        matches!(self, Self::SignIn | Self::Renewal)
    }
}

/// One logical call to the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: QueryParams,
    pub body: Option<Value>,
    pub kind: CallKind,
    /// Use the long-running timeout instead of the default one.
    pub long_running: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let kind = if method == Method::GET || method == Method::HEAD {
            CallKind::Read
        } else {
            CallKind::Write
        };
        Self {
            method,
            path: path.into(),
            query: QueryParams::new(),
            body: None,
            kind,
            long_running: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn sign_in(path: impl Into<String>, body: Value) -> Self {
        Self::post(path, body).with_kind(CallKind::SignIn)
    }

    pub fn renewal(path: impl Into<String>, body: Value) -> Self {
        Self::post(path, body).with_kind(CallKind::Renewal)
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    /// Calls that change server state carry the anti-forgery token.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}
