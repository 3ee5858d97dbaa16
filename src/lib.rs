//! # Authgate
//!
//! `authgate` keeps a single answer to "is this session authenticated" for a
//! client that talks to a cookie-based identity backend. It owns the persisted
//! `is_authenticated` flag, derives the user profile from the `id_token`
//! cookie, and coordinates token refreshes so that concurrent callers share
//! one network call, repeated attempts are throttled, and a run of failures is
//! bounded.
//!
//! Route guards and UI code consume the [`auth::AuthCoordinator`]; the CLI in
//! [`cli`] drives the same coordinator against a session file.

pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
