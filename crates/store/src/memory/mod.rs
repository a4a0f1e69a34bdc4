//! In-process backend for the [`Reference`] boundary.
//!
//! [`MemoryStore`] keeps one JSON tree plus per-node priorities. Every mutation is applied
//! synchronously and acknowledged immediately; listeners are notified through the shared
//! [`Scheduler`], so notifications always arrive on a later tick, in mutation order.
//!
//! Children are ordered by priority, then by key (integer-like keys first, numerically).
//! Child events carry the key of the previous sibling in that order.

mod tree;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};
use tree::Path;

use crate::{
	Ack, ChildEvent, ChildFn, ErrorFn, Priority, Proposal, Reference, RemoteError, Scheduler, Snapshot, SnapshotFn,
	StoreConfig, SubscriptionToken, TransactionFuture, TransactionOutcome,
};

type SnapshotCallback = Rc<dyn Fn(Snapshot)>;
type ChildCallback = Rc<dyn Fn(Snapshot, Option<String>)>;
type ErrorCallback = Rc<dyn Fn(RemoteError)>;

enum ListenerKind {
	Value(SnapshotCallback),
	Child(ChildEvent, ChildCallback),
}

struct Listener {
	path: Path,
	kind: ListenerKind,
	on_error: ErrorCallback,
}

/// One pending edit: path, new value (null deletes), priority for the edited node.
type Edit = (Path, Value, Option<Priority>);

#[derive(Default)]
struct StoreState {
	root: Value,
	priorities: HashMap<Path, Priority>,
	listeners: BTreeMap<SubscriptionToken, Listener>,
	next_token: u64,
	write_failures: VecDeque<RemoteError>,
	subscription_failure: Option<RemoteError>,
}

struct StoreInner {
	scheduler: Scheduler,
	config: StoreConfig,
	state: RefCell<StoreState>,
}

/// In-memory remote store.
///
/// Clones share the same tree, listeners and scheduler.
#[derive(Clone)]
pub struct MemoryStore {
	inner: Rc<StoreInner>,
}

impl fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.borrow();
		f.debug_struct("MemoryStore")
			.field("root", &state.root)
			.field("listeners", &state.listeners.len())
			.finish_non_exhaustive()
	}
}

impl MemoryStore {
	/// Creates an empty store with the default configuration.
	pub fn new(scheduler: Scheduler) -> Self {
		Self::with_config(scheduler, StoreConfig::default())
	}

	pub fn with_config(scheduler: Scheduler, config: StoreConfig) -> Self {
		Self {
			inner: Rc::new(StoreInner {
				scheduler,
				config,
				state: RefCell::new(StoreState::default()),
			}),
		}
	}

	/// Reference to the root of the tree.
	pub fn root(&self) -> Rc<dyn Reference> {
		Rc::new(self.reference("/"))
	}

	/// Reference to a slash-separated path.
	pub fn reference(&self, path: &str) -> MemoryRef {
		MemoryRef {
			inner: self.inner.clone(),
			path: tree::parse_path(path),
		}
	}

	/// Current value at a slash-separated path (`Null` when absent).
	pub fn value_at(&self, path: &str) -> Value {
		tree::value_at(&self.inner.state.borrow().root, &tree::parse_path(path))
	}

	/// Number of live subscriptions across all paths.
	pub fn listener_count(&self) -> usize {
		self.inner.state.borrow().listeners.len()
	}

	/// Makes the next write, patch, delete or transaction fail with `error`.
	pub fn fail_next_write(&self, error: RemoteError) {
		self.inner.state.borrow_mut().write_failures.push_back(error);
	}

	/// While set, every new subscription is cancelled with `error` on its first tick.
	pub fn fail_subscriptions(&self, error: Option<RemoteError>) {
		self.inner.state.borrow_mut().subscription_failure = error;
	}

	pub fn scheduler(&self) -> &Scheduler {
		&self.inner.scheduler
	}
}

impl StoreInner {
	fn register(self: &Rc<Self>, path: Path, kind: ListenerKind, on_error: ErrorFn) -> (SubscriptionToken, Option<RemoteError>) {
		let mut state = self.state.borrow_mut();
		state.next_token += 1;
		let token = SubscriptionToken::new(state.next_token);
		let failure = state.subscription_failure.clone();
		debug!(path = %tree::render_path(&path), token = token.get(), "memory store: subscribe");
		state.listeners.insert(
			token,
			Listener {
				path,
				kind,
				on_error: Rc::from(on_error),
			},
		);
		(token, failure)
	}

	fn is_listening(&self, token: SubscriptionToken) -> bool {
		self.state.borrow().listeners.contains_key(&token)
	}

	/// Runs `task` on a later tick, unless the subscription is gone by then.
	fn deliver(self: &Rc<Self>, token: SubscriptionToken, task: impl FnOnce() + 'static) {
		let weak: Weak<Self> = Rc::downgrade(self);
		self.scheduler.defer(move || {
			if weak.upgrade().is_some_and(|inner| inner.is_listening(token)) {
				task();
			}
		});
	}

	fn cancel_with(self: &Rc<Self>, token: SubscriptionToken, error: RemoteError) {
		let weak: Weak<Self> = Rc::downgrade(self);
		self.scheduler.defer(move || {
			let Some(inner) = weak.upgrade() else {
				return;
			};
			let listener = inner.state.borrow_mut().listeners.remove(&token);
			if let Some(listener) = listener {
				warn!(path = %tree::render_path(&listener.path), %error, "memory store: subscription cancelled");
				(listener.on_error)(error);
			}
		});
	}

	fn take_write_failure(&self) -> Option<RemoteError> {
		self.state.borrow_mut().write_failures.pop_front()
	}

	/// Applies `edits` in order, then schedules notifications for every affected listener.
	fn apply(self: &Rc<Self>, edits: Vec<Edit>) {
		let (before_root, before_priorities) = {
			let state = self.state.borrow();
			(state.root.clone(), state.priorities.clone())
		};
		let mut changed = Vec::with_capacity(edits.len());
		{
			let mut state = self.state.borrow_mut();
			for (path, value, priority) in edits {
				trace!(path = %tree::render_path(&path), "memory store: apply edit");
				tree::clear_priorities(&mut state.priorities, &path);
				tree::set(&mut state.root, &path, value);
				if let Some(priority) = priority
					&& tree::get(&state.root, &path).is_some()
				{
					state.priorities.insert(path.clone(), priority);
				}
				changed.push(path);
			}
		}
		self.notify(&before_root, &before_priorities, &changed);
	}

	fn notify(self: &Rc<Self>, before_root: &Value, before_priorities: &HashMap<Path, Priority>, changed: &[Path]) {
		let state = self.state.borrow();
		for (&token, listener) in &state.listeners {
			let related = changed
				.iter()
				.any(|c| c.starts_with(&listener.path) || listener.path.starts_with(c));
			if !related {
				continue;
			}
			match &listener.kind {
				ListenerKind::Value(callback) => {
					let old = tree::value_at(before_root, &listener.path);
					let new = tree::value_at(&state.root, &listener.path);
					if old != new {
						let callback = callback.clone();
						let snapshot = Snapshot::new(listener.path.last().cloned(), new);
						self.deliver(token, move || callback(snapshot));
					}
				}
				ListenerKind::Child(event, callback) => {
					let old = tree::ordered_children(before_root, before_priorities, &listener.path);
					let new = tree::ordered_children(&state.root, &state.priorities, &listener.path);
					let events = child_events(*event, &listener.path, &old, &new, before_priorities, &state.priorities);
					for (key, prev) in events {
						let source = if *event == ChildEvent::Removed { before_root } else { &state.root };
						let mut child_path = listener.path.clone();
						child_path.push(key.clone());
						let snapshot = Snapshot::new(Some(key), tree::value_at(source, &child_path));
						let callback = callback.clone();
						self.deliver(token, move || callback(snapshot, prev));
					}
				}
			}
		}
	}

	fn path_value(&self, path: &[String]) -> Value {
		tree::value_at(&self.state.borrow().root, path)
	}
}

/// Computes `(key, previous sibling)` pairs of one event kind between two orderings.
fn child_events(
	event: ChildEvent,
	parent: &[String],
	old: &[String],
	new: &[String],
	old_priorities: &HashMap<Path, Priority>,
	new_priorities: &HashMap<Path, Priority>,
) -> Vec<(String, Option<String>)> {
	let old_set: HashSet<&String> = old.iter().collect();
	let new_set: HashSet<&String> = new.iter().collect();
	let prev_in_new = |i: usize| if i == 0 { None } else { Some(new[i - 1].clone()) };

	match event {
		ChildEvent::Removed => old
			.iter()
			.filter(|k| !new_set.contains(k))
			.map(|k| (k.clone(), None))
			.collect(),
		ChildEvent::Added => new
			.iter()
			.enumerate()
			.filter(|(_, k)| !old_set.contains(k))
			.map(|(i, k)| (k.clone(), prev_in_new(i)))
			.collect(),
		ChildEvent::Moved => {
			let old_common: Vec<&String> = old.iter().filter(|k| new_set.contains(k)).collect();
			let new_common: Vec<&String> = new.iter().filter(|k| old_set.contains(k)).collect();
			new.iter()
				.enumerate()
				.filter(|(_, k)| {
					let mut path = parent.to_vec();
					path.push((*k).clone());
					let reprioritized = old_priorities.get(&path) != new_priorities.get(&path);
					reprioritized
						&& old_common.iter().position(|o| o == k) != new_common.iter().position(|n| n == k)
				})
				.map(|(i, k)| (k.clone(), prev_in_new(i)))
				.collect()
		}
	}
}

/// [`Reference`] into a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryRef {
	inner: Rc<StoreInner>,
	path: Path,
}

impl fmt::Debug for MemoryRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("MemoryRef").field(&tree::render_path(&self.path)).finish()
	}
}

impl MemoryRef {
	fn edit(&self, value: Value, priority: Option<Priority>) -> Ack {
		if let Some(error) = self.inner.take_write_failure() {
			warn!(path = %self.path(), %error, "memory store: injected write failure");
			return future::ready(Err(error)).boxed_local();
		}
		self.inner.apply(vec![(self.path.clone(), value, priority)]);
		future::ready(Ok(())).boxed_local()
	}
}

impl Reference for MemoryRef {
	fn key(&self) -> Option<String> {
		self.path.last().cloned()
	}

	fn path(&self) -> String {
		tree::render_path(&self.path)
	}

	fn child(&self, segment: &str) -> Rc<dyn Reference> {
		let mut path = self.path.clone();
		path.extend(tree::parse_path(segment));
		Rc::new(MemoryRef {
			inner: self.inner.clone(),
			path,
		})
	}

	fn subscribe_value(&self, on_snapshot: SnapshotFn, on_error: ErrorFn) -> SubscriptionToken {
		let on_snapshot: SnapshotCallback = Rc::from(on_snapshot);
		let (token, failure) = self
			.inner
			.register(self.path.clone(), ListenerKind::Value(on_snapshot.clone()), on_error);
		if let Some(error) = failure {
			self.inner.cancel_with(token, error);
		} else if self.inner.config.deliver_initial_snapshots {
			let snapshot = Snapshot::new(self.key(), self.inner.path_value(&self.path));
			self.inner.deliver(token, move || on_snapshot(snapshot));
		}
		token
	}

	fn subscribe_child(&self, event: ChildEvent, on_event: ChildFn, on_error: ErrorFn) -> SubscriptionToken {
		let on_event: ChildCallback = Rc::from(on_event);
		let (token, failure) = self
			.inner
			.register(self.path.clone(), ListenerKind::Child(event, on_event.clone()), on_error);
		if let Some(error) = failure {
			self.inner.cancel_with(token, error);
			return token;
		}
		if event == ChildEvent::Added && self.inner.config.deliver_initial_snapshots {
			let state = self.inner.state.borrow();
			let keys = tree::ordered_children(&state.root, &state.priorities, &self.path);
			let mut prev = None;
			for key in keys {
				let mut child_path = self.path.clone();
				child_path.push(key.clone());
				let snapshot = Snapshot::new(Some(key.clone()), tree::value_at(&state.root, &child_path));
				let on_event = on_event.clone();
				let anchor = prev.replace(key);
				self.inner.deliver(token, move || on_event(snapshot, anchor));
			}
		}
		token
	}

	fn unsubscribe(&self, token: SubscriptionToken) {
		if self.inner.state.borrow_mut().listeners.remove(&token).is_some() {
			debug!(path = %self.path(), token = token.get(), "memory store: unsubscribe");
		}
	}

	fn write(&self, value: Value, priority: Option<Priority>) -> Ack {
		self.edit(value, priority)
	}

	fn patch(&self, partial: Map<String, Value>) -> Ack {
		if let Some(error) = self.inner.take_write_failure() {
			warn!(path = %self.path(), %error, "memory store: injected patch failure");
			return future::ready(Err(error)).boxed_local();
		}
		let edits = partial
			.into_iter()
			.map(|(key, value)| {
				let mut path = self.path.clone();
				path.extend(tree::parse_path(&key));
				(path, value, None)
			})
			.collect();
		self.inner.apply(edits);
		future::ready(Ok(())).boxed_local()
	}

	fn delete(&self) -> Ack {
		self.edit(Value::Null, None)
	}

	fn transact(&self, mut propose: Proposal) -> TransactionFuture {
		if let Some(error) = self.inner.take_write_failure() {
			warn!(path = %self.path(), %error, "memory store: injected transaction failure");
			return future::ready(Err(error)).boxed_local();
		}
		let attempts = self.inner.config.max_transaction_attempts;
		for attempt in 1..=attempts {
			let current = self.inner.path_value(&self.path);
			let Some(next) = propose(current.clone()) else {
				debug!(path = %self.path(), attempt, "memory store: transaction aborted by proposal");
				return future::ready(Ok(TransactionOutcome {
					committed: false,
					value: current,
				}))
				.boxed_local();
			};
			if self.inner.path_value(&self.path) != current {
				debug!(path = %self.path(), attempt, "memory store: transaction conflict, retrying");
				continue;
			}
			let priority = self.inner.state.borrow().priorities.get(&self.path).cloned();
			self.inner.apply(vec![(self.path.clone(), next, priority)]);
			return future::ready(Ok(TransactionOutcome {
				committed: true,
				value: self.inner.path_value(&self.path),
			}))
			.boxed_local();
		}
		warn!(path = %self.path(), attempts, "memory store: transaction gave up");
		future::ready(Ok(TransactionOutcome {
			committed: false,
			value: self.inner.path_value(&self.path),
		}))
		.boxed_local()
	}
}
