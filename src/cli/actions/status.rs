use crate::{
    auth::{AuthCoordinator, RefreshEndpoint},
    cli::globals::GlobalArgs,
};
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub authenticated: bool,
    pub optimistic: bool,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

#[must_use]
pub fn report<E: RefreshEndpoint>(coordinator: &AuthCoordinator<E>) -> StatusReport {
    let snapshot = coordinator.snapshot();
    let profile = coordinator.profile();

    StatusReport {
        authenticated: snapshot.authenticated,
        optimistic: snapshot.optimistic,
        subject: profile.as_ref().and_then(|p| p.subject()).map(str::to_string),
        email: profile.as_ref().and_then(|p| p.email()).map(str::to_string),
        groups: profile.as_ref().map_or_else(Vec::new, |p| {
            p.groups(coordinator.config().group_claim())
                .into_iter()
                .map(str::to_string)
                .collect()
        }),
    }
}

/// Print the session state as JSON. Succeeds only for an authenticated session.
///
/// # Errors
/// Returns an error if the session file cannot be opened.
pub fn execute(globals: &GlobalArgs) -> Result<bool> {
    let coordinator = globals.coordinator()?;
    let report = report(&coordinator);

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(report.authenticated)
}
