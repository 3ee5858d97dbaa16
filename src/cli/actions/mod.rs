pub mod guard;
pub mod refresh;
pub mod session;
pub mod status;
pub mod watch;

mod run;

use crate::cli::globals::GlobalArgs;
use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Status,
    Refresh,
    Guard { path: String },
    HasGroup { group: String },
    Restore { location: String },
    SignOut,
    Watch { interval: Duration },
}

impl Action {
    /// Execute the action. The returned flag becomes the exit status.
    ///
    /// # Errors
    /// Returns an error if the session or the endpoint cannot be set up.
    pub async fn execute(self, globals: &GlobalArgs) -> anyhow::Result<bool> {
        run::execute(self, globals).await
    }
}
