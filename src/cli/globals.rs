use crate::auth::{
    endpoint::{DEFAULT_API_BASE_URL, DEFAULT_REFRESH_PATH, DEFAULT_TIMEOUT},
    AuthCoordinator, CoordinatorConfig, GuardConfig, HttpRefreshEndpoint, RouteGuard,
    SessionStore,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub session_file: PathBuf,
    pub api_base_url: String,
    pub refresh_path: String,
    pub timeout: Duration,
    pub cooldown: Duration,
    pub max_attempts: u32,
    pub group_claim: String,
    pub sign_in_path: String,
    pub public_prefixes: Vec<String>,
    pub auto_refresh: bool,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(session_file: PathBuf) -> Self {
        let coordinator = CoordinatorConfig::default();
        let guard = GuardConfig::default();
        Self {
            session_file,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            cooldown: coordinator.cooldown(),
            max_attempts: coordinator.max_attempts(),
            group_claim: coordinator.group_claim().to_string(),
            sign_in_path: guard.sign_in_path().to_string(),
            public_prefixes: guard.public_prefixes().to_vec(),
            auto_refresh: coordinator.auto_refresh(),
        }
    }

    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .with_cooldown(self.cooldown)
            .with_max_attempts(self.max_attempts)
            .with_group_claim(self.group_claim.clone())
            .with_auto_refresh(self.auto_refresh)
    }

    #[must_use]
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig::new()
            .with_sign_in_path(self.sign_in_path.clone())
            .with_public_prefixes(self.public_prefixes.clone())
    }

    /// Open the session file and wire the coordinator to the HTTP endpoint.
    ///
    /// # Errors
    /// Returns an error if the session file is unreadable or the endpoint URL is invalid.
    pub fn coordinator(&self) -> Result<AuthCoordinator<HttpRefreshEndpoint>> {
        let store = Arc::new(SessionStore::open(&self.session_file).with_context(|| {
            format!("failed to open session {}", self.session_file.display())
        })?);

        let endpoint = HttpRefreshEndpoint::new(
            &self.api_base_url,
            &self.refresh_path,
            self.timeout,
            Arc::clone(&store),
        )
        .context("invalid refresh endpoint")?;

        Ok(AuthCoordinator::new(
            self.coordinator_config(),
            endpoint,
            store,
        ))
    }

    /// # Errors
    /// Same as [`GlobalArgs::coordinator`].
    pub fn guard(&self) -> Result<RouteGuard<HttpRefreshEndpoint>> {
        Ok(RouteGuard::new(self.coordinator()?, self.guard_config()))
    }
}
