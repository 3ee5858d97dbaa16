use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<(Action, GlobalArgs)> {
    let globals = global_args(matches)?;

    let action = match matches.subcommand_name() {
        Some("status") => Action::Status,
        Some("refresh") => Action::Refresh,
        Some("guard") => Action::Guard {
            path: required(matches, "guard", "path")?,
        },
        Some("has-group") => Action::HasGroup {
            group: required(matches, "has-group", "group")?,
        },
        Some("restore") => Action::Restore {
            location: required(matches, "restore", "location")?,
        },
        Some("sign-out") => Action::SignOut,
        Some("watch") => Action::Watch {
            interval: Duration::from_secs(
                sub_matches(matches, "watch")?
                    .get_one::<u64>("interval")
                    .copied()
                    .unwrap_or(5),
            ),
        },
        _ => anyhow::bail!("unknown subcommand"),
    };

    Ok((action, globals))
}

fn sub_matches<'a>(
    matches: &'a clap::ArgMatches,
    subcommand: &str,
) -> Result<&'a clap::ArgMatches> {
    matches
        .subcommand_matches(subcommand)
        .context("arguments not found")
}

fn required(matches: &clap::ArgMatches, subcommand: &str, name: &str) -> Result<String> {
    sub_matches(matches, subcommand)?
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: {name}"))
}

fn global_args(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let session_file = matches
        .get_one::<String>("session-file")
        .map(PathBuf::from)
        .context("missing required argument: --session-file")?;

    let mut globals = GlobalArgs::new(session_file);

    if let Some(url) = matches.get_one::<String>("api-base-url") {
        globals.api_base_url.clone_from(url);
    }

    if let Some(path) = matches.get_one::<String>("refresh-path") {
        globals.refresh_path.clone_from(path);
    }

    if let Some(secs) = matches.get_one::<u64>("timeout") {
        globals.timeout = Duration::from_secs(*secs);
    }

    if let Some(ms) = matches.get_one::<u64>("cooldown-ms") {
        globals.cooldown = Duration::from_millis(*ms);
    }

    if let Some(max) = matches.get_one::<u32>("max-attempts") {
        globals.max_attempts = *max;
    }

    if let Some(claim) = matches.get_one::<String>("group-claim") {
        globals.group_claim.clone_from(claim);
    }

    if let Some(path) = matches.get_one::<String>("sign-in-path") {
        globals.sign_in_path.clone_from(path);
    }

    if let Some(prefixes) = matches.get_many::<String>("public-prefix") {
        globals.public_prefixes = prefixes
            .filter(|prefix| !prefix.is_empty())
            .cloned()
            .collect();
    }

    globals.auto_refresh = matches.get_flag("auto-refresh");

    Ok(globals)
}
