//! Session authentication state: the coordinator and its collaborators.
//!
//! Flow Overview: a route guard asks the coordinator whether the session is
//! authenticated. If not, it waits for any refresh already running and then
//! asks for one itself. The coordinator calls the refresh endpoint at most
//! once at a time, updates the persisted flag in the session store, and
//! publishes a snapshot for UI consumers. The profile is decoded lazily from
//! the `id_token` cookie. Nothing here verifies tokens or enforces access;
//! that belongs to the API.

pub mod claims;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod guard;
pub mod store;
pub mod watcher;

pub use self::claims::Profile;
pub use self::coordinator::{AuthCoordinator, AuthSnapshot, CoordinatorConfig, RefreshStatus};
pub use self::endpoint::{HttpRefreshEndpoint, RefreshEndpoint};
pub use self::error::RefreshError;
pub use self::guard::{restore_redirect, GuardConfig, GuardDecision, RouteGuard};
pub use self::store::{ChangeSource, SessionStore};
