//! Serialized credential renewal.
//!
//! Many calls can be rejected with 401 at nearly the same time. Only the
//! first starts a renewal; every other rejected call queues a waiter and is
//! settled, in arrival order, with the same outcome. The state returns to
//! idle before any waiter is woken, so a call that fails again after a
//! successful renewal starts a fresh cycle instead of joining a finished one.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::credentials::{AccessToken, CredentialStore, RefreshToken};
use super::navigation::{Navigator, SignOutPolicy};
use crate::cache::mutex_lock;
use crate::error::ApiError;

const SOURCE: &str = "auth::refresh";

pub(crate) const METRIC_REFRESH_STARTED: &str = "fetchwell_refresh_started_total";
pub(crate) const METRIC_REFRESH_FAILED: &str = "fetchwell_refresh_failed_total";
pub(crate) const METRIC_REFRESH_WAITERS: &str = "fetchwell_refresh_waiters";

/// Outcome of a successful renewal exchange.
#[derive(Debug, Clone)]
pub struct RenewedCredentials {
    pub access: AccessToken,
    /// Present when the server rotated the refresh credential.
    pub refresh: Option<RefreshToken>,
}

/// Exchanges a refresh credential for a new access credential.
#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    async fn renew(&self, refresh: &RefreshToken) -> Result<RenewedCredentials, ApiError>;
}

type Waiter = oneshot::Sender<Result<AccessToken, ApiError>>;

/// Runs when a failed renewal ends the session, before any waiter is settled.
pub type SessionEndHook = Box<dyn Fn() + Send + Sync>;

enum Phase {
    Idle,
    Refreshing(VecDeque<Waiter>),
}

struct Inner {
    phase: Mutex<Phase>,
    credentials: Arc<CredentialStore>,
    renewer: Arc<dyn CredentialRenewer>,
    navigator: Arc<dyn Navigator>,
    policy: SignOutPolicy,
    session_end: OnceLock<SessionEndHook>,
}

/// Guarantees at most one renewal is in flight.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        renewer: Arc<dyn CredentialRenewer>,
        navigator: Arc<dyn Navigator>,
        policy: SignOutPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                phase: Mutex::new(Phase::Idle),
                credentials,
                renewer,
                navigator,
                policy,
                session_end: OnceLock::new(),
            }),
        }
    }

    /// Install the hook run when a failed renewal ends the session.
    ///
    /// Only the first hook is kept; returns `false` if one was already set.
    pub fn on_session_end(&self, hook: impl Fn() + Send + Sync + 'static) -> bool {
        self.inner.session_end.set(Box::new(hook)).is_ok()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            *mutex_lock(&self.inner.phase, SOURCE, "is_refreshing"),
            Phase::Refreshing(_)
        )
    }

    /// Number of callers waiting on the current renewal.
    pub fn waiting(&self) -> usize {
        match &*mutex_lock(&self.inner.phase, SOURCE, "waiting") {
            Phase::Refreshing(waiters) => waiters.len(),
            Phase::Idle => 0,
        }
    }

    /// Wait for a renewed access credential, starting a renewal if none is running.
    ///
    /// The renewal itself runs as a separate task, so it completes and settles
    /// every waiter even if this caller stops waiting.
    pub async fn renew(&self) -> Result<AccessToken, ApiError> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut phase = mutex_lock(&self.inner.phase, SOURCE, "enqueue");
            match &mut *phase {
                Phase::Refreshing(waiters) => {
                    waiters.push_back(tx);
                    gauge!(METRIC_REFRESH_WAITERS).set(waiters.len() as f64);
                    false
                }
                Phase::Idle => {
                    *phase = Phase::Refreshing(VecDeque::from([tx]));
                    gauge!(METRIC_REFRESH_WAITERS).set(1.0);
                    true
                }
            }
        };

        if start {
            counter!(METRIC_REFRESH_STARTED).increment(1);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run().await });
        }

        rx.await
            .unwrap_or_else(|_| Err(ApiError::renewal_failed("renewal ended without an outcome")))
    }
}

impl Inner {
    async fn run(&self) {
        let outcome = AssertUnwindSafe(self.attempt())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ApiError::renewal_failed("renewal task panicked")));

        match &outcome {
            Ok(_) => info!("access credential renewed"),
            Err(err) => {
                counter!(METRIC_REFRESH_FAILED).increment(1);
                warn!(error = %err, "credential renewal failed; ending session");
                self.credentials.clear();
                if let Some(hook) = self.session_end.get() {
                    hook();
                }
            }
        }

        let waiters = {
            let mut phase = mutex_lock(&self.phase, SOURCE, "settle");
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Refreshing(waiters) => waiters,
                Phase::Idle => VecDeque::new(),
            }
        };
        gauge!(METRIC_REFRESH_WAITERS).set(0.0);

        for waiter in waiters {
            // a waiter that stopped listening is fine to skip
            let _ = waiter.send(outcome.clone());
        }

        if outcome.is_err() {
            self.policy.force_sign_out(self.navigator.as_ref());
        }
    }

    async fn attempt(&self) -> Result<AccessToken, ApiError> {
        let Some(refresh) = self.credentials.refresh() else {
            return Err(ApiError::renewal_failed("no refresh credential available"));
        };

        let renewed = match self.renewer.renew(&refresh).await {
            Ok(renewed) => renewed,
            Err(err @ ApiError::RenewalFailed { .. }) => return Err(err),
            Err(err) => return Err(ApiError::renewal_failed(err.to_string())),
        };

        if let Some(rotated) = renewed.refresh {
            self.credentials.set_refresh(rotated);
        }
        self.credentials.set_access(renewed.access.clone());
        Ok(renewed.access)
    }
}
