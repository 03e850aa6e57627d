//! Session credentials and their renewal.

mod credentials;
mod csrf;
mod navigation;
mod refresh;

pub use credentials::{AccessToken, CredentialStore, RefreshToken};
pub(crate) use credentials::TokenGrant;
pub use csrf::{ANTI_FORGERY_HEADER, AntiForgeryStore};
pub use navigation::{NavigationSignal, Navigator, SignOutPolicy};
pub use refresh::{CredentialRenewer, RefreshCoordinator, RenewedCredentials, SessionEndHook};

pub(crate) mod metric_names {
    pub(crate) use super::refresh::{
        METRIC_REFRESH_FAILED, METRIC_REFRESH_STARTED, METRIC_REFRESH_WAITERS,
    };
}
