use crate::cli::globals::GlobalArgs;
use anyhow::Result;
use tracing::info;

/// Run one refresh against the configured endpoint and report the outcome.
///
/// # Errors
/// Returns an error if the session or the endpoint cannot be set up.
pub async fn execute(globals: &GlobalArgs) -> Result<bool> {
    let coordinator = globals.coordinator()?;

    info!(url = %coordinator.endpoint().url(), "refreshing session");

    let refreshed = coordinator.refresh().await;

    println!("{}", if refreshed { "refreshed" } else { "not refreshed" });

    Ok(refreshed)
}
