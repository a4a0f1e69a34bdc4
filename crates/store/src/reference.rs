use std::cmp::Ordering;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::{Map, Value};

use crate::RemoteError;

/// Opaque token identifying one live subscription on a [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
	/// Wraps a backend-assigned identifier.
	pub const fn new(id: u64) -> Self {
		Self(id)
	}

	/// The backend-assigned identifier.
	pub const fn get(self) -> u64 {
		self.0
	}
}

/// The value found at one remote path, together with that path's own key.
///
/// An absent node is represented by [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
	key: Option<String>,
	value: Value,
}

impl Snapshot {
	pub fn new(key: Option<String>, value: Value) -> Self {
		Self { key, value }
	}

	/// Key of the node this snapshot was taken at. `None` for the root.
	pub fn key(&self) -> Option<&str> {
		self.key.as_deref()
	}

	pub fn value(&self) -> &Value {
		&self.value
	}

	pub fn into_value(self) -> Value {
		self.value
	}

	/// Returns `true` when the node holds data.
	pub fn exists(&self) -> bool {
		!self.value.is_null()
	}
}

/// Ordered child-event kinds. Inserted and moved events carry the key of the previous sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildEvent {
	Added,
	Removed,
	Moved,
}

/// Sort priority attached to a node. Children are ordered by priority, then by key.
#[derive(Debug, Clone, PartialEq)]
pub enum Priority {
	Number(f64),
	Text(String),
}

impl Priority {
	/// Orders optional priorities: none first, then numbers ascending, then text ascending.
	pub fn compare(a: Option<&Priority>, b: Option<&Priority>) -> Ordering {
		match (a, b) {
			(None, None) => Ordering::Equal,
			(None, Some(_)) => Ordering::Less,
			(Some(_), None) => Ordering::Greater,
			(Some(Priority::Number(x)), Some(Priority::Number(y))) => x.total_cmp(y),
			(Some(Priority::Number(_)), Some(Priority::Text(_))) => Ordering::Less,
			(Some(Priority::Text(_)), Some(Priority::Number(_))) => Ordering::Greater,
			(Some(Priority::Text(x)), Some(Priority::Text(y))) => x.cmp(y),
		}
	}
}

impl From<f64> for Priority {
	fn from(value: f64) -> Self {
		Priority::Number(value)
	}
}

impl From<&str> for Priority {
	fn from(value: &str) -> Self {
		Priority::Text(value.to_owned())
	}
}

/// Result of an optimistic transaction once the remote layer is done retrying.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
	/// Whether a proposed value was written.
	pub committed: bool,
	/// The value at the path after the transaction settled.
	pub value: Value,
}

/// Receives every value snapshot of a value subscription.
pub type SnapshotFn = Box<dyn Fn(Snapshot)>;
/// Receives the error that ended a subscription.
pub type ErrorFn = Box<dyn Fn(RemoteError)>;
/// Receives a child snapshot plus the key of its previous sibling (`None` = first).
pub type ChildFn = Box<dyn Fn(Snapshot, Option<String>)>;
/// Maps the current value to the value to commit. `None` aborts the transaction.
pub type Proposal = Box<dyn FnMut(Value) -> Option<Value>>;
/// Write acknowledgement.
pub type Ack = LocalBoxFuture<'static, Result<(), RemoteError>>;
/// Transaction settlement.
pub type TransactionFuture = LocalBoxFuture<'static, Result<TransactionOutcome, RemoteError>>;

/// Locator for one remote path.
///
/// Callbacks handed to the subscription methods are invoked by the remote layer on a later
/// tick, never from inside the subscribe call itself for a well-behaved backend. Handles
/// still tolerate synchronous delivery, including being unwatched from inside it.
pub trait Reference {
	/// Last path segment, or `None` for the root.
	fn key(&self) -> Option<String>;

	/// Slash-separated absolute path, used in logs.
	fn path(&self) -> String;

	/// Derives the locator of a direct child.
	fn child(&self, segment: &str) -> Rc<dyn Reference>;

	/// Streams the value at this path.
	fn subscribe_value(&self, on_snapshot: SnapshotFn, on_error: ErrorFn) -> SubscriptionToken;

	/// Streams one kind of ordered child event at this path.
	fn subscribe_child(&self, event: ChildEvent, on_event: ChildFn, on_error: ErrorFn) -> SubscriptionToken;

	/// Ends a subscription. Unknown tokens are ignored.
	fn unsubscribe(&self, token: SubscriptionToken);

	/// Replaces the value at this path.
	fn write(&self, value: Value, priority: Option<Priority>) -> Ack;

	/// Shallow-patches the children named in `partial`.
	fn patch(&self, partial: Map<String, Value>) -> Ack;

	/// Removes the value at this path.
	fn delete(&self) -> Ack;

	/// Runs an optimistic read-modify-write. The remote layer owns retry on conflict and
	/// reports `committed: false` if it gives up or the proposal aborts.
	fn transact(&self, propose: Proposal) -> TransactionFuture;
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(None, None, Ordering::Equal)]
	#[case(None, Some(Priority::Number(0.0)), Ordering::Less)]
	#[case(Some(Priority::Number(2.0)), Some(Priority::Number(1.5)), Ordering::Greater)]
	#[case(Some(Priority::Number(9.0)), Some(Priority::Text("a".into())), Ordering::Less)]
	#[case(Some(Priority::Text("b".into())), Some(Priority::Text("a".into())), Ordering::Greater)]
	fn priority_ordering(#[case] a: Option<Priority>, #[case] b: Option<Priority>, #[case] expected: Ordering) {
		assert_eq!(Priority::compare(a.as_ref(), b.as_ref()), expected);
	}

	#[test]
	fn null_snapshot_does_not_exist() {
		assert!(!Snapshot::new(Some("a".into()), Value::Null).exists());
		assert!(Snapshot::new(None, Value::Bool(false)).exists());
	}
}
