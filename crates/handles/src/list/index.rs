use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tether_store::{Proposal, RemoteError, Snapshot, SubscriptionToken};
use tracing::{debug, trace, warn};

use super::order::{Placement, index_keys, propose_move};
use super::{ListEvent, ListSchema, MoveOutcome};
use crate::events::{CHANGE, DISCONNECT, UNWATCHED};
use crate::handle::{Handle, HandleContext};
use crate::observer::{Callback, ObserverRegistry, callback};
use crate::{Error, Result};

/// A child of the current index and the observer the list keeps on its `"change"`.
struct Member<C: Handle> {
	child: Rc<C>,
	observer: Callback<C::Payload>,
}

struct IndexState<C: Handle> {
	index: Vec<String>,
	members: HashMap<String, Member<C>>,
	/// Members that reported their first change since the last rebuild.
	reported: HashSet<String>,
	settled: bool,
	/// Set before subscribing, so a snapshot delivered from inside the subscribe call already
	/// sees an active list.
	active: bool,
	token: Option<SubscriptionToken>,
	/// Bumped on deactivation; guards the index subscription.
	session: u64,
	/// Bumped on every rebuild and deactivation; guards child observers.
	rebuild: u64,
}

impl<C: Handle> Default for IndexState<C> {
	fn default() -> Self {
		Self {
			index: Vec::new(),
			members: HashMap::new(),
			reported: HashSet::new(),
			settled: false,
			active: false,
			token: None,
			session: 0,
			rebuild: 0,
		}
	}
}

/// Ordered list rebuilt from a whole index blob.
///
/// When the key sequence of the index changes, every child is rebuilt and activated; the list
/// announces `"change"` once all of them reported their first change. After that, any child
/// change re-announces the list. An empty index is announced right away.
pub struct IndexListHandle<S: ListSchema> {
	ctx: HandleContext,
	observers: ObserverRegistry<ListEvent<S::Child>>,
	state: RefCell<IndexState<S::Child>>,
	this: Weak<Self>,
}

impl<S: ListSchema> fmt::Debug for IndexListHandle<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("IndexListHandle")
			.field("path", &self.ctx.reference().path())
			.field("index", &state.index)
			.field("settled", &state.settled)
			.finish_non_exhaustive()
	}
}

impl<S: ListSchema> IndexListHandle<S> {
	/// Children in index order.
	pub fn data(&self) -> Vec<Rc<S::Child>> {
		let state = self.state.borrow();
		state
			.index
			.iter()
			.filter_map(|key| state.members.get(key).map(|m| m.child.clone()))
			.collect()
	}

	/// The applied key sequence.
	pub fn keys(&self) -> Vec<String> {
		self.state.borrow().index.clone()
	}

	pub fn get(&self, key: &str) -> Option<Rc<S::Child>> {
		self.state.borrow().members.get(key).map(|m| m.child.clone())
	}

	/// Whether every child of the applied index has reported.
	pub fn is_settled(&self) -> bool {
		self.state.borrow().settled
	}

	/// Moves `moved` right before `reference` in the remote index.
	pub fn move_before(&self, moved: &str, reference: &str) -> impl Future<Output = Result<MoveOutcome>> + use<S> {
		self.reorder(moved, reference, Placement::Before)
	}

	/// Moves `moved` right after `reference` in the remote index.
	pub fn move_after(&self, moved: &str, reference: &str) -> impl Future<Output = Result<MoveOutcome>> + use<S> {
		self.reorder(moved, reference, Placement::After)
	}

	fn reorder(
		&self,
		moved: &str,
		reference: &str,
		placement: Placement,
	) -> impl Future<Output = Result<MoveOutcome>> + use<S> {
		let aborted = Rc::new(Cell::new(false));
		let propose: Proposal = {
			let (moved, reference, aborted) = (moved.to_owned(), reference.to_owned(), aborted.clone());
			Box::new(move |current: Value| {
				let next = propose_move(&current, &moved, &reference, placement, S::KEY_FIELD);
				aborted.set(next.is_none());
				next
			})
		};
		debug!(path = %self.ctx.reference().path(), moved, reference, ?placement, "reordering index");
		let transaction = self.ctx.reference().transact(propose);
		let path = self.ctx.reference().path();

		async move {
			let outcome = transaction.await.map_err(|error| {
				warn!(%path, %error, "reorder failed");
				Error::RemoteWrite(error)
			})?;
			if outcome.committed {
				Ok(MoveOutcome::Moved(index_keys(&outcome.value, S::KEY_FIELD)))
			} else if aborted.get() {
				trace!(%path, "reorder had nothing to do");
				Ok(MoveOutcome::Unchanged)
			} else {
				warn!(%path, "reorder was not committed");
				Err(Error::Conflict)
			}
		}
	}

	fn emit_change(&self) {
		let data = self.data();
		self.observers.emit(CHANGE, &ListEvent::Change(data));
	}

	fn apply_snapshot(&self, session: u64, snapshot: Snapshot) {
		let keys = index_keys(snapshot.value(), S::KEY_FIELD);
		{
			let state = self.state.borrow();
			if state.session != session {
				return;
			}
			if !keys.is_empty() && state.index == keys {
				trace!(path = %self.ctx.reference().path(), "index unchanged");
				return;
			}
		}
		if keys.is_empty() {
			self.clear_index();
			self.emit_change();
		} else {
			self.rebuild(keys);
		}
	}

	fn clear_index(&self) {
		let old = {
			let mut state = self.state.borrow_mut();
			state.rebuild += 1;
			state.index.clear();
			state.reported.clear();
			state.settled = true;
			std::mem::take(&mut state.members)
		};
		release(old);
	}

	fn rebuild(&self, keys: Vec<String>) {
		let rebuild = {
			let mut state = self.state.borrow_mut();
			state.rebuild += 1;
			state.rebuild
		};
		debug!(path = %self.ctx.reference().path(), len = keys.len(), "rebuilding index children");

		let mut members = HashMap::with_capacity(keys.len());
		for key in &keys {
			if members.contains_key(key) {
				continue;
			}
			let child = S::child(&self.ctx, key);
			let observer = {
				let (this, key) = (self.this.clone(), key.clone());
				callback(move |_: &<S::Child as Handle>::Payload| {
					if let Some(list) = this.upgrade() {
						list.child_changed(rebuild, &key);
					}
				})
			};
			if let Err(error) = child.on(CHANGE, observer.clone()) {
				warn!(key, %error, "could not observe index child");
				continue;
			}
			members.insert(key.clone(), Member { child, observer });
		}
		let children: Vec<Rc<S::Child>> = members.values().map(|m| m.child.clone()).collect();

		let old = {
			let mut state = self.state.borrow_mut();
			state.index = keys;
			state.reported.clear();
			state.settled = members.is_empty();
			std::mem::replace(&mut state.members, members)
		};
		release(old);

		// Every member is in place before any of them can report.
		for child in children {
			child.activate();
		}
	}

	fn child_changed(&self, rebuild: u64, key: &str) {
		let announce = {
			let mut state = self.state.borrow_mut();
			if state.rebuild != rebuild {
				return;
			}
			if state.settled {
				true
			} else {
				state.reported.insert(key.to_owned());
				state.settled = state.reported.len() == state.members.len();
				state.settled
			}
		};
		if announce {
			trace!(path = %self.ctx.reference().path(), key, "index list settled or child changed");
			self.emit_change();
		}
	}

	fn subscription_failed(&self, session: u64, error: RemoteError) {
		if self.state.borrow().session != session {
			return;
		}
		warn!(path = %self.ctx.reference().path(), %error, "index subscription failed");
		self.observers
			.emit(DISCONNECT, &ListEvent::Disconnect(Error::Subscription(error)));
	}
}

/// Drops the list's observer from each former child, letting unobserved children wind down.
fn release<C: Handle>(members: HashMap<String, Member<C>>) {
	for (_, member) in members {
		member.child.off(CHANGE, &member.observer);
	}
}

impl<S: ListSchema> Handle for IndexListHandle<S> {
	type Payload = ListEvent<S::Child>;

	const GATING_EVENTS: &'static [&'static str] = &[CHANGE];

	fn construct(ctx: HandleContext) -> Rc<Self> {
		let handle = Rc::new_cyclic(|this| Self {
			ctx,
			observers: ObserverRegistry::new(),
			state: RefCell::default(),
			this: this.clone(),
		});
		Self::watch_teardown(&handle);
		handle
	}

	fn context(&self) -> &HandleContext {
		&self.ctx
	}

	fn observers(&self) -> &ObserverRegistry<Self::Payload> {
		&self.observers
	}

	fn activate(&self) {
		if self.is_active() {
			let this = self.this.clone();
			self.ctx.scheduler().defer(move || {
				if let Some(handle) = this.upgrade()
					&& handle.is_settled()
				{
					handle.emit_change();
				}
			});
			return;
		}

		let session = {
			let mut state = self.state.borrow_mut();
			state.active = true;
			state.session
		};
		debug!(kind = type_name::<S>(), path = %self.ctx.reference().path(), "activating index list");
		let on_snapshot = {
			let this = self.this.clone();
			Box::new(move |snapshot: Snapshot| {
				if let Some(handle) = this.upgrade() {
					handle.apply_snapshot(session, snapshot);
				}
			})
		};
		let on_error = {
			let this = self.this.clone();
			Box::new(move |error: RemoteError| {
				if let Some(handle) = this.upgrade() {
					handle.subscription_failed(session, error);
				}
			})
		};
		let token = self.ctx.reference().subscribe_value(on_snapshot, on_error);
		{
			let mut state = self.state.borrow_mut();
			if state.session == session {
				state.token = Some(token);
				return;
			}
		}
		trace!(path = %self.ctx.reference().path(), "index list unwatched while subscribing");
		self.ctx.reference().unsubscribe(token);
	}

	fn is_active(&self) -> bool {
		self.state.borrow().active
	}

	fn deactivate(&self) {
		let (token, old) = {
			let mut state = self.state.borrow_mut();
			if !std::mem::take(&mut state.active) {
				return;
			}
			state.session += 1;
			state.rebuild += 1;
			state.index.clear();
			state.reported.clear();
			state.settled = false;
			(state.token.take(), std::mem::take(&mut state.members))
		};
		if let Some(token) = token {
			self.ctx.reference().unsubscribe(token);
		}
		release(old);
		debug!(path = %self.ctx.reference().path(), "index list unwatched");
		self.observers.emit(UNWATCHED, &ListEvent::Unwatched);
	}
}
