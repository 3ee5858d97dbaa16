//! Navigation gate backed by the coordinator.
//!
//! This is a UX guard: it decides whether a page transition goes ahead or is
//! sent to sign-in. Real access control stays with the API.

use crate::auth::{coordinator::AuthCoordinator, endpoint::RefreshEndpoint};
use tracing::debug;
use url::form_urlencoded;

pub const DEFAULT_SIGN_IN_PATH: &str = "/auth/sign-in";
pub const DEFAULT_PUBLIC_PREFIX: &str = "/auth/";
pub const REDIRECT_PARAM: &str = "redirect";

#[derive(Debug, Clone)]
pub struct GuardConfig {
    sign_in_path: String,
    public_prefixes: Vec<String>,
    network: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            public_prefixes: vec![DEFAULT_PUBLIC_PREFIX.to_string()],
            network: true,
        }
    }
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sign_in_path(mut self, path: String) -> Self {
        self.sign_in_path = path;
        self
    }

    #[must_use]
    pub fn with_public_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.public_prefixes = prefixes;
        self
    }

    /// Whether the guard runs where it can reach the refresh endpoint. A
    /// guard without network access (server-side rendering) lets every
    /// navigation through and leaves the decision to the client.
    #[must_use]
    pub fn with_network(mut self, network: bool) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    #[must_use]
    pub fn public_prefixes(&self) -> &[String] {
        &self.public_prefixes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct RouteGuard<E> {
    coordinator: AuthCoordinator<E>,
    config: GuardConfig,
}

impl<E: RefreshEndpoint> RouteGuard<E> {
    #[must_use]
    pub fn new(coordinator: AuthCoordinator<E>, config: GuardConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &AuthCoordinator<E> {
        &self.coordinator
    }

    /// Decide a navigation to `full_path` (path plus query).
    pub async fn check(&self, full_path: &str) -> GuardDecision {
        let path = full_path.split(['?', '#']).next().unwrap_or(full_path);

        if path == self.config.sign_in_path
            || self
                .config
                .public_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return GuardDecision::Allow;
        }

        if !self.config.network {
            return GuardDecision::Allow;
        }

        if self.coordinator.is_authenticated() {
            return GuardDecision::Allow;
        }

        // a refresh started elsewhere may be about to restore the session
        self.coordinator.wait_for_refresh().await;
        if self.coordinator.is_authenticated() {
            return GuardDecision::Allow;
        }

        if self.coordinator.refresh().await {
            return GuardDecision::Allow;
        }

        debug!(path, "navigation requires sign-in");

        GuardDecision::Redirect(self.sign_in_location(full_path))
    }

    /// Sign-in location that carries `full_path` for restoration after login.
    #[must_use]
    pub fn sign_in_location(&self, full_path: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(REDIRECT_PARAM, full_path)
            .finish();

        format!("{}?{query}", self.config.sign_in_path)
    }
}

/// Where to go after sign-in given the current `location` (path plus query).
///
/// Follows the `redirect` parameter when it names a local path and keeps the
/// remaining query parameters. Returns `None` when there is nothing safe to
/// follow.
#[must_use]
pub fn restore_redirect(location: &str) -> Option<String> {
    let query = location.split_once('?').map(|(_, q)| q)?;
    let query = query.split('#').next().unwrap_or(query);

    let mut target = None;
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut has_rest = false;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == REDIRECT_PARAM {
            if target.is_none() {
                target = Some(value.into_owned());
            }
        } else {
            rest.append_pair(&key, &value);
            has_rest = true;
        }
    }

    let target = target.filter(|t| is_local_path(t))?;

    if !has_rest {
        return Some(target);
    }

    let separator = if target.contains('?') { '&' } else { '?' };
    Some(format!("{target}{separator}{}", rest.finish()))
}

fn is_local_path(target: &str) -> bool {
    // "//host" and "/\host" are protocol-relative in browsers
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}
