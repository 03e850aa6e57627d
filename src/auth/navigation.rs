//! Forced sign-out navigation.
//!
//! The data-access layer never drives a UI directly. It asks a [`Navigator`]
//! where the user currently is and, when the session ends, where to send them.

use std::sync::RwLock;

use tokio::sync::watch;
use tracing::info;

use crate::cache::{rw_read, rw_write};
use crate::config::AuthSettings;

const SOURCE: &str = "auth::navigation";

/// Host-provided navigation capability.
pub trait Navigator: Send + Sync {
    /// Path the user is on, if known.
    fn current_location(&self) -> Option<String>;

    fn redirect(&self, target: &str);
}

/// Where to send the user when the session ends, and where not to.
#[derive(Debug, Clone)]
pub struct SignOutPolicy {
    sign_in_path: String,
    entry_points: Vec<String>,
}

impl SignOutPolicy {
    pub fn new(sign_in_path: impl Into<String>, entry_points: Vec<String>) -> Self {
        Self {
            sign_in_path: sign_in_path.into(),
            entry_points,
        }
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// Users already on an entry point (sign-in, sign-up) are left where they are.
    pub fn should_redirect(&self, location: Option<&str>) -> bool {
        match location {
            Some(location) => !self
                .entry_points
                .iter()
                .any(|entry| location.contains(entry.as_str())),
            None => true,
        }
    }

    /// Redirect to the sign-in location unless suppressed. Returns whether it redirected.
    pub fn force_sign_out(&self, navigator: &dyn Navigator) -> bool {
        let location = navigator.current_location();
        if !self.should_redirect(location.as_deref()) {
            info!(
                location = location.as_deref().unwrap_or_default(),
                "session ended on an entry point; not redirecting"
            );
            return false;
        }
        info!(redirect_to = %self.sign_in_path, "session ended; redirecting to sign-in");
        navigator.redirect(&self.sign_in_path);
        true
    }
}

impl From<&AuthSettings> for SignOutPolicy {
    fn from(settings: &AuthSettings) -> Self {
        Self::new(settings.sign_in_redirect.clone(), settings.entry_points.clone())
    }
}

/// Navigator that records the location and publishes redirect requests.
///
/// Hosts subscribe to learn when the session has been forcibly ended.
#[derive(Debug)]
pub struct NavigationSignal {
    location: RwLock<Option<String>>,
    redirects: watch::Sender<Option<String>>,
}

impl Default for NavigationSignal {
    fn default() -> Self {
        let (redirects, _) = watch::channel(None);
        Self {
            location: RwLock::new(None),
            redirects,
        }
    }
}

impl NavigationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *rw_write(&self.location, SOURCE, "set_location") = Some(location.into());
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.redirects.subscribe()
    }

    /// Most recent redirect target, if a redirect was ever requested.
    pub fn last_redirect(&self) -> Option<String> {
        self.redirects.borrow().clone()
    }
}

impl Navigator for NavigationSignal {
    fn current_location(&self) -> Option<String> {
        rw_read(&self.location, SOURCE, "current_location").clone()
    }

    fn redirect(&self, target: &str) {
        self.redirects.send_replace(Some(target.to_string()));
        *rw_write(&self.location, SOURCE, "redirect") = Some(target.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SignOutPolicy {
        SignOutPolicy::new("/en/login", vec!["/login".into(), "/register".into()])
    }

    #[test]
    fn redirects_from_ordinary_pages() {
        let nav = NavigationSignal::new();
        nav.set_location("/en/cars/42");

        assert!(policy().force_sign_out(&nav));
        assert_eq!(nav.last_redirect().as_deref(), Some("/en/login"));
        assert_eq!(nav.current_location().as_deref(), Some("/en/login"));
    }

    #[test]
    fn entry_points_suppress_redirect() {
        for location in ["/en/login", "/de/register?next=/cars"] {
            let nav = NavigationSignal::new();
            nav.set_location(location);
            assert!(!policy().force_sign_out(&nav));
            assert!(nav.last_redirect().is_none());
        }
    }

    #[test]
    fn unknown_location_redirects() {
        let nav = NavigationSignal::new();
        assert!(policy().force_sign_out(&nav));
    }

    #[tokio::test]
    async fn subscribers_observe_redirects() {
        let nav = NavigationSignal::new();
        let mut rx = nav.subscribe();
        nav.redirect("/en/login");
        rx.changed().await.expect("sender alive");
        assert_eq!(rx.borrow().as_deref(), Some("/en/login"));
    }
}
