//! The authentication-state coordinator.
//!
//! One [`AuthCoordinator`] exists per session. It is the only writer of the
//! refresh state and the only place that decides whether a refresh call goes
//! out. Callers get a plain `bool` back; endpoint failures are logged and
//! never propagated.
//!
//! Refresh admission, in order:
//! 1. a refresh already in flight is joined, never duplicated;
//! 2. a call within `cooldown` of the last attempt start returns `false`;
//! 3. once `max_attempts` attempts have been counted the call returns `false`
//!    and the counter starts over;
//! 4. otherwise a new attempt is spawned and published in the in-flight slot
//!    before the state lock is released.

use crate::auth::{
    claims::{self, Profile, DEFAULT_GROUP_CLAIM},
    endpoint::RefreshEndpoint,
    store::{ChangeSource, SessionStore},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    cooldown: Duration,
    max_attempts: u32,
    group_claim: String,
    auto_refresh: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            group_claim: DEFAULT_GROUP_CLAIM.to_string(),
            auto_refresh: false,
        }
    }
}

impl CoordinatorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Zero is treated as one: at least one attempt per cycle.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_group_claim(mut self, claim: String) -> Self {
        self.group_claim = claim;
        self
    }

    /// Allow the session watcher to refresh on its own when the persisted
    /// flag is cleared from outside.
    #[must_use]
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn group_claim(&self) -> &str {
        &self.group_claim
    }

    #[must_use]
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }
}

/// What UI consumers observe through [`AuthCoordinator::subscribe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub authenticated: bool,
    pub optimistic: bool,
    pub refreshing: bool,
}

/// Copy of the transient refresh bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStatus {
    pub in_progress: bool,
    pub attempt_count: u32,
    pub last_attempt_at: Option<Instant>,
}

type Settled = watch::Receiver<Option<bool>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<Settled>,
    attempt_count: u32,
    last_attempt_at: Option<Instant>,
    // keeps the optimistic flag up for one cooldown after a failed attempt
    // that left retries in the cycle
    hold_until: Option<Instant>,
}

struct CachedProfile {
    token: SecretString,
    profile: Option<Arc<Profile>>,
}

enum Admission {
    Join(Settled),
    Started(Settled),
    Throttled,
    Exhausted,
}

struct Inner<E> {
    config: CoordinatorConfig,
    endpoint: E,
    store: Arc<SessionStore>,
    state: Mutex<RefreshState>,
    profile: Mutex<Option<CachedProfile>>,
    snapshots: watch::Sender<AuthSnapshot>,
}

impl<E> Inner<E> {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, state: &RefreshState) -> AuthSnapshot {
        let authenticated = self.store.is_authenticated();
        AuthSnapshot {
            authenticated,
            optimistic: authenticated
                || state.in_flight.is_some()
                || state.hold_until.is_some_and(|until| Instant::now() < until),
            refreshing: state.in_flight.is_some(),
        }
    }

    fn publish(&self, state: &RefreshState) {
        let snapshot = self.snapshot_of(state);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Shared handle to the session's coordinator. Cloning is cheap and every
/// clone drives the same state.
pub struct AuthCoordinator<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for AuthCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for AuthCoordinator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("config", &self.inner.config)
            .field("snapshot", &self.snapshot())
            .field("refresh", &self.refresh_status())
            .finish_non_exhaustive()
    }
}

impl<E: RefreshEndpoint> AuthCoordinator<E> {
    /// Hydrate a coordinator from the persisted session.
    pub fn new(config: CoordinatorConfig, endpoint: E, store: Arc<SessionStore>) -> Self {
        let authenticated = store.is_authenticated();
        let (snapshots, _) = watch::channel(AuthSnapshot {
            authenticated,
            optimistic: authenticated,
            refreshing: false,
        });

        debug!(authenticated, "auth coordinator hydrated");

        Self {
            inner: Arc::new(Inner {
                config,
                endpoint,
                store,
                state: Mutex::new(RefreshState::default()),
                profile: Mutex::new(None),
                snapshots,
            }),
        }
    }

    /// Refresh the session, sharing any attempt already in flight.
    ///
    /// Returns `true` only when the endpoint accepted the refresh. Throttled
    /// and exhausted calls return `false` without touching the network.
    pub async fn refresh(&self) -> bool {
        match self.admit() {
            Admission::Join(settled) => {
                debug!("joining refresh in flight");
                wait_settled(settled).await
            }
            Admission::Started(settled) => wait_settled(settled).await,
            Admission::Throttled | Admission::Exhausted => false,
        }
    }

    /// Check-and-set of the in-flight slot. Runs entirely under the state
    /// lock so a second caller either joins the published attempt or starts
    /// its own, never both.
    fn admit(&self) -> Admission {
        let mut state = self.inner.lock_state();

        if let Some(settled) = &state.in_flight {
            return Admission::Join(settled.clone());
        }

        let now = Instant::now();
        if let Some(last) = state.last_attempt_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.inner.config.cooldown {
                debug!(
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "refresh throttled"
                );
                return Admission::Throttled;
            }
        }

        if state.attempt_count >= self.inner.config.max_attempts {
            info!(
                attempts = state.attempt_count,
                "refresh attempts exhausted, starting a new cycle"
            );
            state.attempt_count = 0;
            state.hold_until = None;
            self.inner.publish(&state);
            return Admission::Exhausted;
        }

        state.attempt_count += 1;
        state.last_attempt_at = Some(now);
        state.hold_until = None;

        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());
        let attempt = state.attempt_count;

        self.inner.publish(&state);
        drop(state);

        tokio::spawn(run_attempt(Arc::clone(&self.inner), tx, attempt));

        Admission::Started(rx)
    }

    /// Resolve once the refresh in flight (if any) has settled.
    pub async fn wait_for_refresh(&self) {
        let settled = self.inner.lock_state().in_flight.clone();
        if let Some(settled) = settled {
            wait_settled(settled).await;
        }
    }
}

impl<E> AuthCoordinator<E> {
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn endpoint(&self) -> &E {
        &self.inner.endpoint
    }

    /// The persisted flag.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_authenticated()
    }

    /// Flicker-free flag for rendering: stays up while an attempt is in
    /// flight and for one cooldown after a failed attempt that left retries,
    /// then falls back to the persisted flag.
    #[must_use]
    pub fn is_optimistically_authenticated(&self) -> bool {
        let state = self.inner.lock_state();
        self.inner.snapshot_of(&state).optimistic
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        let state = self.inner.lock_state();
        self.inner.snapshot_of(&state)
    }

    #[must_use]
    pub fn refresh_status(&self) -> RefreshStatus {
        let state = self.inner.lock_state();
        RefreshStatus {
            in_progress: state.in_flight.is_some(),
            attempt_count: state.attempt_count,
            last_attempt_at: state.last_attempt_at,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Republish the snapshot after the store changed underneath us.
    pub fn sync(&self) {
        let state = self.inner.lock_state();
        self.inner.publish(&state);
    }

    /// Profile decoded from the current identity token. Decoded again only
    /// when the token changes; a token that fails to decode yields `None`.
    #[must_use]
    pub fn profile(&self) -> Option<Arc<Profile>> {
        let Some(token) = self.inner.store.id_token() else {
            *self.lock_profile() = None;
            return None;
        };

        let mut cache = self.lock_profile();
        if let Some(cached) = cache.as_ref() {
            if cached.token.expose_secret() == token.expose_secret() {
                return cached.profile.clone();
            }
        }

        let profile = claims::decode_profile(token.expose_secret()).map(Arc::new);
        *cache = Some(CachedProfile {
            token,
            profile: profile.clone(),
        });

        profile
    }

    /// True only when the profile's group claim is a list containing `group`.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.profile()
            .map_or(false, |profile| {
                profile.has_group(&self.inner.config.group_claim, group)
            })
    }

    /// Record a sign-in completed by another component that already stored
    /// the session cookies.
    pub fn mark_signed_in(&self) {
        self.inner
            .store
            .set_authenticated(true, ChangeSource::Coordinator);

        let mut state = self.inner.lock_state();
        state.attempt_count = 0;
        state.hold_until = None;
        self.inner.publish(&state);
        info!("session signed in");
    }

    /// Tear the session down: flag, cookies, profile and attempt counter.
    pub fn sign_out(&self) {
        self.inner.store.clear(ChangeSource::Coordinator);
        *self.lock_profile() = None;

        let mut state = self.inner.lock_state();
        state.attempt_count = 0;
        state.hold_until = None;
        self.inner.publish(&state);
        info!("session signed out");
    }

    fn lock_profile(&self) -> MutexGuard<'_, Option<CachedProfile>> {
        self.inner
            .profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn wait_settled(mut settled: Settled) -> bool {
    match settled.wait_for(Option::is_some).await {
        Ok(result) => (*result).unwrap_or(false),
        Err(_) => false,
    }
}

/// Clears the in-flight slot and wakes every waiter when an attempt ends,
/// including when the attempt task panics or is cancelled.
struct AttemptGuard<'a, E> {
    inner: &'a Inner<E>,
    settled: watch::Sender<Option<bool>>,
    succeeded: bool,
}

impl<E> Drop for AttemptGuard<'_, E> {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        state.in_flight = None;
        self.inner.publish(&state);
        drop(state);

        self.settled.send_replace(Some(self.succeeded));
    }
}

async fn run_attempt<E: RefreshEndpoint>(
    inner: Arc<Inner<E>>,
    settled: watch::Sender<Option<bool>>,
    attempt: u32,
) {
    let mut guard = AttemptGuard {
        inner: &inner,
        settled,
        succeeded: false,
    };

    let max_attempts = inner.config.max_attempts;

    match inner.endpoint.refresh().await {
        Ok(()) => {
            inner
                .store
                .set_authenticated(true, ChangeSource::Coordinator);

            let mut state = inner.lock_state();
            state.attempt_count = 0;
            state.hold_until = None;
            drop(state);

            info!(attempt, "session refreshed");
            guard.succeeded = true;
        }
        Err(e) => {
            inner
                .store
                .set_authenticated(false, ChangeSource::Coordinator);

            let mut state = inner.lock_state();
            let exhausted = state.attempt_count >= max_attempts;
            state.hold_until = if exhausted {
                None
            } else {
                Instant::now().checked_add(inner.config.cooldown)
            };
            let hold_until = state.hold_until;
            drop(state);

            if let Some(until) = hold_until {
                tokio::spawn(expire_hold(Arc::clone(&inner), until));
            }

            if exhausted {
                warn!(attempt, max_attempts, "refresh failed, no attempts left: {}", e);
            } else {
                warn!(attempt, max_attempts, "refresh failed: {}", e);
            }
        }
    }

    drop(guard);
}

/// Republish once a failure hold runs out so subscribers see the optimistic
/// flag fall back to the persisted one.
async fn expire_hold<E: RefreshEndpoint>(inner: Arc<Inner<E>>, until: Instant) {
    sleep_until(until).await;

    let mut state = inner.lock_state();
    if state.hold_until == Some(until) {
        state.hold_until = None;
        inner.publish(&state);
    }
}
