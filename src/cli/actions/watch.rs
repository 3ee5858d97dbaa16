use crate::{
    auth::watcher::{spawn_reloader, spawn_watcher},
    cli::globals::GlobalArgs,
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

/// Follow the session file until interrupted, printing every snapshot change.
///
/// # Errors
/// Returns an error if the session or the endpoint cannot be set up.
pub async fn execute(globals: &GlobalArgs, interval: Duration) -> Result<bool> {
    let coordinator = globals.coordinator()?;
    let mut snapshots = coordinator.subscribe();

    let watcher = spawn_watcher(coordinator.clone());
    let reloader = spawn_reloader(Arc::clone(coordinator.store()), interval);

    info!(
        session = %globals.session_file.display(),
        interval_secs = interval.as_secs(),
        auto_refresh = globals.auto_refresh,
        "watching session"
    );

    println!("{}", serde_json::to_string(&*snapshots.borrow_and_update())?);

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            _ = &mut shutdown => {
                info!("interrupted, stopping watch");
                break;
            }
        }
    }

    watcher.abort();
    reloader.abort();

    Ok(true)
}
