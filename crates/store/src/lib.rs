//! Remote store boundary for tether handles.
//!
//! Handles never talk to a network or a database directly. They consume the narrow
//! [`Reference`] trait defined here: value subscriptions, ordered child-event
//! subscriptions, acknowledged writes and optimistic transactions against one remote path.
//!
//! The crate also provides:
//! - [`Scheduler`]: the single-threaded task queue every "next tick" deferral is posted to.
//! - [`MemoryStore`]: an in-process backend implementing [`Reference`], with priority
//!   ordering of children, previous-sibling anchors and a bounded optimistic transaction loop.
//!
//! Everything here is `!Send` by construction. A store, its references and the handles built
//! on top of them belong to one event loop.

mod config;
mod memory;
mod reference;
mod scheduler;

pub use config::StoreConfig;
pub use memory::{MemoryRef, MemoryStore};
pub use reference::{
	Ack, ChildEvent, ChildFn, ErrorFn, Priority, Proposal, Reference, Snapshot, SnapshotFn, SubscriptionToken,
	TransactionFuture, TransactionOutcome,
};
pub use scheduler::Scheduler;
pub use serde_json::{Map, Value};

/// A convenient type alias for `Result` with `E` = [`RemoteError`].
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;

/// Failures reported by the remote layer.
///
/// Clonable so a single failure can be fanned out to every waiter and observer that
/// depends on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
	/// The remote rejected the operation (rules, authentication).
	#[error("permission denied: {0}")]
	Denied(String),
	/// The remote could not be reached or dropped the operation.
	#[error("remote unavailable: {0}")]
	Unavailable(String),
	/// The operation was malformed for the remote (bad path, bad payload).
	#[error("invalid operation: {0}")]
	Invalid(String),
	/// Any other backend-reported failure.
	#[error("{0}")]
	Backend(String),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The configuration text is not valid TOML or does not match the schema.
	#[error("config parse error: {0}")]
	Parse(#[from] toml::de::Error),
	/// A field holds a value outside its accepted range.
	#[error("invalid config value: {0}")]
	Invalid(String),
}
