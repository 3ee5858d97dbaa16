use crate::auth::{
    claims::DEFAULT_GROUP_CLAIM,
    endpoint::{DEFAULT_API_BASE_URL, DEFAULT_REFRESH_PATH},
    guard::{DEFAULT_PUBLIC_PREFIX, DEFAULT_SIGN_IN_PATH},
};
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn long_version() -> &'static str {
    let hash = crate::GIT_COMMIT_HASH;
    let short = hash.get(..7).unwrap_or(hash);
    Box::leak(format!("{} ({short})", env!("CARGO_PKG_VERSION")).into_boxed_str())
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("authgate")
        .about("Client-side authentication state coordinator")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version())
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("session-file")
                .short('s')
                .long("session-file")
                .help("Path of the persisted session (flag and cookies)")
                .default_value("session.json")
                .env("AUTHGATE_SESSION_FILE")
                .global(true),
        )
        .arg(
            Arg::new("api-base-url")
                .long("api-base-url")
                .help("Base URL of the identity API, example: https://api.tld/api/v1")
                .default_value(DEFAULT_API_BASE_URL)
                .env("AUTHGATE_API_BASE_URL")
                .global(true),
        )
        .arg(
            Arg::new("refresh-path")
                .long("refresh-path")
                .help("Refresh endpoint path, relative to the API base URL")
                .default_value(DEFAULT_REFRESH_PATH)
                .env("AUTHGATE_REFRESH_PATH")
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Refresh request timeout in seconds")
                .default_value("10")
                .env("AUTHGATE_TIMEOUT")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("cooldown-ms")
                .long("cooldown-ms")
                .help("Minimum milliseconds between refresh attempt starts")
                .default_value("1000")
                .env("AUTHGATE_COOLDOWN_MS")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .help("Failed refresh attempts before a cycle gives up")
                .default_value("3")
                .env("AUTHGATE_MAX_ATTEMPTS")
                .global(true)
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("group-claim")
                .long("group-claim")
                .help("Identity token claim listing the user's groups")
                .default_value(DEFAULT_GROUP_CLAIM)
                .env("AUTHGATE_GROUP_CLAIM")
                .global(true),
        )
        .arg(
            Arg::new("sign-in-path")
                .long("sign-in-path")
                .help("Where unauthenticated navigation is sent")
                .default_value(DEFAULT_SIGN_IN_PATH)
                .env("AUTHGATE_SIGN_IN_PATH")
                .global(true),
        )
        .arg(
            Arg::new("public-prefix")
                .long("public-prefix")
                .help("Path prefix that bypasses the guard, may be repeated")
                .default_value(DEFAULT_PUBLIC_PREFIX)
                .env("AUTHGATE_PUBLIC_PREFIX")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("auto-refresh")
                .long("auto-refresh")
                .help("Refresh on its own when the session flag is cleared externally")
                .env("AUTHGATE_AUTO_REFRESH")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .help("Emit logs as JSON lines")
                .env("AUTHGATE_LOG_JSON")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("AUTHGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(Command::new("status").about("Show the session state and profile"))
        .subcommand(Command::new("refresh").about("Refresh the session once"))
        .subcommand(
            Command::new("guard")
                .about("Decide a navigation to PATH")
                .arg(
                    Arg::new("path")
                        .help("Full path of the navigation target, query included")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("has-group")
                .about("Check the identity token for a group")
                .arg(Arg::new("group").required(true)),
        )
        .subcommand(
            Command::new("restore")
                .about("Resolve the post sign-in destination of LOCATION")
                .arg(
                    Arg::new("location")
                        .help("Current location, example: /auth/sign-in?redirect=%2Fboards")
                        .required(true),
                ),
        )
        .subcommand(Command::new("sign-out").about("Clear the session"))
        .subcommand(
            Command::new("watch")
                .about("Follow the session file and react to external sign-outs")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .help("Seconds between session file checks")
                        .default_value("5")
                        .env("AUTHGATE_WATCH_INTERVAL")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                ),
        )
}
