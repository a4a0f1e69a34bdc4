//! Ordered list handles.
//!
//! Two reconciliation strategies share the event vocabulary and child factory defined here:
//!
//! - [`StreamListHandle`] follows per-child inserted/removed/moved notifications anchored on the
//!   previous sibling and edits its order in place.
//! - [`IndexListHandle`] watches one index blob, rebuilds its children wholesale when the key
//!   sequence changes and announces the result only once every child reported.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::handle::{Handle, HandleContext};

mod index;
mod order;
mod stream;

pub use index::IndexListHandle;
pub use stream::StreamListHandle;

/// Child factory and index layout of a list kind.
pub trait ListSchema: 'static {
	/// Handle type of the list's children.
	type Child: Handle;

	/// Field holding the key when index entries are objects.
	const KEY_FIELD: &'static str = "key";

	/// Builds the child handle for `key`. The list activates it once it is in place.
	///
	/// The default binds the child to `key` under the list's own path. Kinds whose children
	/// live elsewhere rebind with [`HandleContext::at`], or go through
	/// [`HandleContext::service`] to share registry instances.
	fn child(ctx: &HandleContext, key: &str) -> Rc<Self::Child> {
		Self::Child::construct(ctx.child(key))
	}
}

/// A key together with its child handle.
pub struct ListEntry<C> {
	pub key: String,
	pub child: Rc<C>,
}

impl<C> Clone for ListEntry<C> {
	fn clone(&self) -> Self {
		Self {
			key: self.key.clone(),
			child: self.child.clone(),
		}
	}
}

impl<C> fmt::Debug for ListEntry<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ListEntry").field("key", &self.key).finish_non_exhaustive()
	}
}

/// Events of the list handles.
pub enum ListEvent<C> {
	/// `"change"`: the children in list order.
	Change(Vec<Rc<C>>),
	/// `"added"`: a child entered the list. Stream lists only.
	Added(ListEntry<C>),
	/// `"removed"`: the key of a child that left the list. Stream lists only.
	Removed(String),
	/// `"disconnect"`: a subscription failed.
	Disconnect(Error),
	/// `"unwatched"`: the subscriptions were torn down.
	Unwatched,
}

impl<C> Clone for ListEvent<C> {
	fn clone(&self) -> Self {
		match self {
			Self::Change(children) => Self::Change(children.clone()),
			Self::Added(entry) => Self::Added(entry.clone()),
			Self::Removed(key) => Self::Removed(key.clone()),
			Self::Disconnect(err) => Self::Disconnect(err.clone()),
			Self::Unwatched => Self::Unwatched,
		}
	}
}

impl<C> fmt::Debug for ListEvent<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Change(children) => f.debug_tuple("Change").field(&children.len()).finish(),
			Self::Added(entry) => f.debug_tuple("Added").field(&entry.key).finish(),
			Self::Removed(key) => f.debug_tuple("Removed").field(key).finish(),
			Self::Disconnect(err) => f.debug_tuple("Disconnect").field(err).finish(),
			Self::Unwatched => f.write_str("Unwatched"),
		}
	}
}

/// Result of a committed or abandoned reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
	/// The index was rewritten; carries the committed key sequence.
	Moved(Vec<String>),
	/// The reference key was not in the index, so nothing was written.
	Unchanged,
}
