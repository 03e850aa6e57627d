//! Holder for the access and refresh credentials of the current session.
//!
//! Updating or clearing the access credential also updates the default
//! `Authorization` header, so calls issued afterwards pick up the change
//! without consulting the store. When a credentials file is configured, every
//! change is written through to it; write failures are logged and otherwise
//! ignored.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{rw_read, rw_write};
use crate::error::ApiError;
use crate::pipeline::DefaultHeaders;

const SOURCE: &str = "auth::credentials";

/// Short-lived bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value for this credential.
    pub fn bearer(&self) -> Result<HeaderValue, ApiError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0)).map_err(|err| {
            ApiError::invalid_request(format!("access credential is not a valid header: {err}"))
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Long-lived credential exchanged for new access credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(<redacted>)")
    }
}

/// Token pair as returned by sign-in and renewal endpoints and as persisted on disk.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct TokenGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) refresh_token: Option<String>,
}

impl TokenGrant {
    pub(crate) fn access(&self) -> Option<AccessToken> {
        non_empty(self.access_token.as_deref()).map(AccessToken::new)
    }

    pub(crate) fn refresh(&self) -> Option<RefreshToken> {
        non_empty(self.refresh_token.as_deref()).map(RefreshToken::new)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Default)]
struct Credentials {
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
}

pub struct CredentialStore {
    state: RwLock<Credentials>,
    defaults: DefaultHeaders,
    file: Option<PathBuf>,
}

impl CredentialStore {
    /// Store that lives only as long as the process.
    pub fn new(defaults: DefaultHeaders) -> Self {
        Self {
            state: RwLock::new(Credentials::default()),
            defaults,
            file: None,
        }
    }

    /// Store backed by a JSON file; existing credentials are loaded immediately.
    pub fn with_file(defaults: DefaultHeaders, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = load(&path);
        let store = Self {
            state: RwLock::new(Credentials {
                access: loaded.access(),
                refresh: loaded.refresh(),
            }),
            defaults,
            file: Some(path),
        };
        store.sync_defaults(store.access().as_ref());
        store
    }

    pub fn access(&self) -> Option<AccessToken> {
        rw_read(&self.state, SOURCE, "access").access.clone()
    }

    pub fn refresh(&self) -> Option<RefreshToken> {
        rw_read(&self.state, SOURCE, "refresh").refresh.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_signed_in").access.is_some()
    }

    pub fn set_access(&self, token: AccessToken) {
        let mut state = rw_write(&self.state, SOURCE, "set_access");
        self.sync_defaults(Some(&token));
        state.access = Some(token);
        self.persist(&state);
    }

    pub fn set_refresh(&self, token: RefreshToken) {
        let mut state = rw_write(&self.state, SOURCE, "set_refresh");
        state.refresh = Some(token);
        self.persist(&state);
    }

    /// Forget both credentials and drop the default `Authorization` header.
    pub fn clear(&self) {
        let mut state = rw_write(&self.state, SOURCE, "clear");
        self.sync_defaults(None);
        *state = Credentials::default();
        self.persist(&state);
        debug!("credentials cleared");
    }

    fn sync_defaults(&self, access: Option<&AccessToken>) {
        let Some(token) = access else {
            self.defaults.remove(&AUTHORIZATION);
            return;
        };
        match token.bearer() {
            Ok(value) => self.defaults.set(AUTHORIZATION, value),
            Err(err) => {
                warn!(error = %err, "access credential cannot be sent; leaving calls unauthenticated");
                self.defaults.remove(&AUTHORIZATION);
            }
        }
    }

    fn persist(&self, state: &Credentials) {
        let Some(path) = &self.file else {
            return;
        };
        let grant = TokenGrant {
            access_token: state.access.as_ref().map(|t| t.as_str().to_string()),
            refresh_token: state.refresh.as_ref().map(|t| t.as_str().to_string()),
        };
        if let Err(err) = store(path, &grant) {
            warn!(path = %path.display(), error = %err, "failed to persist credentials");
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = rw_read(&self.state, SOURCE, "debug");
        f.debug_struct("CredentialStore")
            .field("access", &state.access)
            .field("refresh", &state.refresh)
            .field("file", &self.file)
            .finish()
    }
}

fn load(path: &Path) -> TokenGrant {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return TokenGrant::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read credentials file");
            return TokenGrant::default();
        }
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "ignoring malformed credentials file");
        TokenGrant::default()
    })
}

fn store(path: &Path, grant: &TokenGrant) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(grant).map_err(io::Error::other)?;
    fs::write(path, bytes)
}
