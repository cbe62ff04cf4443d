//! Route Guard
//!
//! Consulted before each navigation. It revalidates the session (errors are
//! logged and never block the navigation), then keeps anonymous visitors out
//! of protected views and sends signed-in users past the entry view.

use crate::session::SessionManager;
use crate::types::{NavigationDecision, Route};
use core_runtime::config::NavigationTargets;
use std::sync::Arc;
use tracing::{debug, error, instrument};

pub struct RouteGuard {
    session: Arc<SessionManager>,
    navigation: NavigationTargets,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionManager>, navigation: NavigationTargets) -> Self {
        Self {
            session,
            navigation,
        }
    }

    /// Decides whether `route` may be entered.
    ///
    /// In server context only the entry view is checked; other paths proceed
    /// without any network call.
    #[instrument(skip(self, route), fields(path = %route.path))]
    pub async fn before_each(&self, route: &Route) -> NavigationDecision {
        let is_entry = route.view_path() == self.navigation.entry_path;

        if self.session.context().is_server() && !is_entry {
            return NavigationDecision::Proceed;
        }

        if let Err(e) = self.session.check_auth().await {
            error!(error = %e, "Auth check failed");
        }

        let authenticated = self.session.is_authenticated();
        if route.requires_auth && !authenticated {
            debug!("Protected view requires sign-in, redirecting to entry view");
            return NavigationDecision::Redirect(self.navigation.entry_path.clone());
        }
        if authenticated && is_entry {
            debug!("Already signed in, skipping entry view");
            return NavigationDecision::Redirect(
                self.navigation.default_authenticated_path.clone(),
            );
        }

        NavigationDecision::Proceed
    }

    pub fn navigation(&self) -> &NavigationTargets {
        &self.navigation
    }
}

impl std::fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGuard")
            .field("navigation", &self.navigation)
            .field("context", &self.session.context())
            .finish()
    }
}
