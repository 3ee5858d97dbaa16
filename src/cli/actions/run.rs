use crate::cli::{
    actions::{guard, refresh, session, status, watch, Action},
    globals::GlobalArgs,
};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
///
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action, globals: &GlobalArgs) -> Result<bool> {
    match action {
        Action::Status => status::execute(globals),
        Action::Refresh => refresh::execute(globals).await,
        Action::Guard { path } => guard::execute(globals, &path).await,
        Action::HasGroup { group } => session::has_group(globals, &group),
        Action::Restore { location } => Ok(session::restore(&location)),
        Action::SignOut => session::sign_out(globals),
        Action::Watch { interval } => watch::execute(globals, interval).await,
    }
}
