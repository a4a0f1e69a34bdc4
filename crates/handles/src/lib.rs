//! Live local handles bound to remote records and ordered lists.
//!
//! A handle is a local proxy for one remote path. It owns the remote subscriptions feeding it
//! and an [`ObserverRegistry`] of named events. Subscriptions start with
//! [`Handle::activate`] and stop when the last observer of the handle's gating events is
//! removed, so observer bookkeeping alone decides what stays streaming.
//!
//! - [`RecordHandle`]: one record, with validated replace, merge and delete.
//! - [`StreamListHandle`]: an ordered list maintained from child inserted/removed/moved
//!   events anchored on the previous sibling.
//! - [`IndexListHandle`]: an ordered list rebuilt from a whole index blob, announcing a settled
//!   projection only after every child reported, plus optimistic reorders.
//! - [`HandleRegistry`]: at most one handle per kind and argument list, with bulk teardown.
//! - [`Service`]: the facade tying a registry to a scheduler, activating handles on the next
//!   tick after lookup.
//!
//! # Threading
//!
//! Everything is single-threaded (`Rc`/`RefCell`). State mutation happens synchronously inside
//! one notification handler; remote I/O completes later through the
//! [`Scheduler`](tether_store::Scheduler) or through the returned futures.
//!
//! # Events
//!
//! Event names are plain strings; the ones handles emit themselves live in [`events`].

mod config;
mod error;
mod handle;
mod list;
mod observer;
mod record;
mod registry;
mod service;

#[cfg(test)]
mod testing;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use handle::{Handle, HandleContext};
pub use list::{IndexListHandle, ListEntry, ListEvent, ListSchema, MoveOutcome, StreamListHandle};
pub use observer::{Callback, ObserverRegistry, callback};
pub use record::{Lazy, RecordEvent, RecordHandle, RecordSchema, Untyped};
pub use registry::HandleRegistry;
pub use service::{Refs, Service, WeakService};

/// Names of the events emitted by the built-in handles.
pub mod events {
	/// Current state changed. Records carry the value, lists the ordered projection.
	pub const CHANGE: &str = "change";
	/// A child entered an ordered stream list.
	pub const ADDED: &str = "added";
	/// A child left an ordered stream list.
	pub const REMOVED: &str = "removed";
	/// The last gating observer left and the remote subscriptions were torn down.
	pub const UNWATCHED: &str = "unwatched";
	/// A long-lived subscription failed.
	pub const DISCONNECT: &str = "disconnect";
}
