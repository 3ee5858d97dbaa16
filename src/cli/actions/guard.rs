use crate::{auth::GuardDecision, cli::globals::GlobalArgs};
use anyhow::Result;

/// Print where a navigation to `path` ends up: the path itself or the
/// sign-in location.
///
/// # Errors
/// Returns an error if the session or the endpoint cannot be set up.
pub async fn execute(globals: &GlobalArgs, path: &str) -> Result<bool> {
    let guard = globals.guard()?;

    match guard.check(path).await {
        GuardDecision::Allow => {
            println!("{path}");
            Ok(true)
        }
        GuardDecision::Redirect(location) => {
            println!("{location}");
            Ok(false)
        }
    }
}
