use crate::{auth::restore_redirect, cli::globals::GlobalArgs};
use anyhow::Result;

/// # Errors
/// Returns an error if the session file cannot be opened.
pub fn has_group(globals: &GlobalArgs, group: &str) -> Result<bool> {
    let coordinator = globals.coordinator()?;
    let member = coordinator.has_group(group);

    println!("{member}");

    Ok(member)
}

/// Print the post sign-in destination carried by `location`, or `location`
/// itself when there is nothing safe to follow.
#[must_use]
pub fn restore(location: &str) -> bool {
    match restore_redirect(location) {
        Some(target) => {
            println!("{target}");
            true
        }
        None => {
            println!("{location}");
            false
        }
    }
}

/// # Errors
/// Returns an error if the session file cannot be opened.
pub fn sign_out(globals: &GlobalArgs) -> Result<bool> {
    globals.coordinator()?.sign_out();
    Ok(true)
}
