use crate::auth::{
    coordinator::AuthCoordinator,
    endpoint::RefreshEndpoint,
    store::{ChangeSource, SessionStore},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Follow the session store for as long as it exists.
///
/// Every change republishes the coordinator snapshot. When the persisted flag
/// goes from set to cleared by someone other than the coordinator, and the
/// coordinator is configured for auto refresh, exactly one `refresh()` is
/// issued; dedup and throttling still apply to it.
pub fn spawn_watcher<E: RefreshEndpoint>(coordinator: AuthCoordinator<E>) -> JoinHandle<()> {
    let mut changes = coordinator.store().subscribe();

    tokio::spawn(async move {
        let mut was_authenticated = changes.borrow_and_update().authenticated;

        while changes.changed().await.is_ok() {
            let (authenticated, source) = {
                let record = changes.borrow_and_update();
                (record.authenticated, record.source)
            };

            coordinator.sync();

            let lost = was_authenticated && !authenticated;
            was_authenticated = authenticated;

            if !lost || source != ChangeSource::External {
                continue;
            }

            if !coordinator.config().auto_refresh() {
                debug!("session flag cleared externally, auto refresh disabled");
                continue;
            }

            info!("session flag cleared externally, refreshing");
            let refreshed = coordinator.refresh().await;
            debug!(refreshed, "auto refresh settled");
        }

        debug!("session store closed, watcher exiting");
    })
}

/// Re-read a file-backed store on a fixed period so changes made by other
/// processes reach this one.
pub fn spawn_reloader(store: Arc<SessionStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match store.reload() {
                Ok(true) => debug!("session file changed"),
                Ok(false) => {}
                Err(e) => error!("Failed to reload session: {:#}", e),
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::{coordinator::CoordinatorConfig, error::RefreshError};
    use anyhow::Result;
    use reqwest::StatusCode;
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::time::sleep;

    #[derive(Default)]
    struct CountingEndpoint {
        calls: AtomicUsize,
    }

    impl RefreshEndpoint for CountingEndpoint {
        async fn refresh(&self) -> Result<(), RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RefreshError::Rejected {
                status: StatusCode::UNAUTHORIZED,
            })
        }
    }

    fn coordinator(
        auto_refresh: bool,
    ) -> (AuthCoordinator<Arc<CountingEndpoint>>, Arc<CountingEndpoint>) {
        let store = Arc::new(SessionStore::in_memory());
        store.set_authenticated(true, ChangeSource::Hydrate);
        let endpoint = Arc::new(CountingEndpoint::default());
        let coordinator = AuthCoordinator::new(
            CoordinatorConfig::new().with_auto_refresh(auto_refresh),
            Arc::clone(&endpoint),
            store,
        );
        (coordinator, endpoint)
    }

    #[tokio::test(start_paused = true)]
    async fn external_clear_triggers_one_refresh() {
        let (auth, endpoint) = coordinator(true);
        let watcher = spawn_watcher(auth.clone());
        sleep(Duration::from_millis(10)).await;

        auth.store().set_authenticated(false, ChangeSource::External);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert!(!auth.is_authenticated());

        // the failed refresh wrote the flag itself; that must not loop
        sleep(Duration::from_secs(5)).await;
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_writes_do_not_trigger_refresh() {
        let (auth, endpoint) = coordinator(true);
        let watcher = spawn_watcher(auth.clone());
        sleep(Duration::from_millis(10)).await;

        auth.sign_out();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_disabled_only_syncs() {
        let (auth, endpoint) = coordinator(false);
        let mut snapshots = auth.subscribe();
        snapshots.borrow_and_update();
        let watcher = spawn_watcher(auth.clone());
        sleep(Duration::from_millis(10)).await;

        auth.store().set_authenticated(false, ChangeSource::External);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert!(snapshots.has_changed().unwrap());
        assert!(!snapshots.borrow_and_update().authenticated);
        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reloader_picks_up_file_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{"is_authenticated": true}"#)?;

        let store = Arc::new(SessionStore::open(&path)?);
        assert!(store.is_authenticated());

        let reloader = spawn_reloader(Arc::clone(&store), Duration::from_secs(1));

        fs::write(&path, r#"{"is_authenticated": false}"#)?;
        sleep(Duration::from_millis(1500)).await;

        assert!(!store.is_authenticated());
        assert_eq!(store.snapshot().source, ChangeSource::External);

        reloader.abort();
        Ok(())
    }
}
