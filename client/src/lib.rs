//! Offline-first sync client for the nosh nutrition tracker.
//!
//! Wires the pure core (`nosh-core`) to the two persistence targets: a
//! local sqlite cache for anonymous use and the remote HTTP store once
//! authenticated. The [`tracker::Tracker`] is the single owner of
//! in-memory state and the only component that writes to either target;
//! the [`session::SessionManager`] owns the bearer token and drives the
//! switch between targets.

pub mod error;
pub mod remote;
pub mod session;
pub mod store;
pub mod tracker;

pub use error::{AuthError, SyncError};
pub use remote::{RemoteClient, User};
pub use session::{AuthState, SessionManager};
pub use store::{LocalStore, MemoryStore, SqliteStore};
pub use tracker::Tracker;
