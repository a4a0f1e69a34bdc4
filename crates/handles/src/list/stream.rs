use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_store::{ChildEvent, RemoteError, Snapshot, SubscriptionToken};
use tracing::{debug, trace, warn};

use super::order::ChildOrder;
use super::{ListEntry, ListEvent, ListSchema};
use crate::Error;
use crate::events::{ADDED, CHANGE, DISCONNECT, REMOVED, UNWATCHED};
use crate::handle::{Handle, HandleContext};
use crate::observer::ObserverRegistry;

struct StreamState<C> {
	order: ChildOrder<C>,
	active: bool,
	tokens: Vec<SubscriptionToken>,
	/// Bumped on deactivation so notifications of dead subscriptions are dropped.
	generation: u64,
	disconnected: bool,
}

impl<C> Default for StreamState<C> {
	fn default() -> Self {
		Self {
			order: ChildOrder::default(),
			active: false,
			tokens: Vec::new(),
			generation: 0,
			disconnected: false,
		}
	}
}

/// Ordered list kept in sync from child inserted/removed/moved notifications.
///
/// Each notification carries the key of the previous sibling in the new order; an absent or
/// unknown anchor puts the child first. A repeated insert of a present key is treated as a
/// move. Removing or moving an absent key changes nothing and emits nothing.
///
/// The list owns its children: each one is activated when it is added, and destroyed and
/// deactivated when it leaves the order or the list itself is unwatched.
pub struct StreamListHandle<S: ListSchema> {
	ctx: HandleContext,
	observers: ObserverRegistry<ListEvent<S::Child>>,
	state: RefCell<StreamState<S::Child>>,
	this: Weak<Self>,
}

impl<S: ListSchema> fmt::Debug for StreamListHandle<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("StreamListHandle")
			.field("path", &self.ctx.reference().path())
			.field("order", &state.order.keys())
			.finish_non_exhaustive()
	}
}

impl<S: ListSchema> StreamListHandle<S> {
	/// Children in list order.
	pub fn data(&self) -> Vec<Rc<S::Child>> {
		self.state.borrow().order.data()
	}

	/// Keys in list order.
	pub fn keys(&self) -> Vec<String> {
		self.state.borrow().order.keys().to_vec()
	}

	pub fn get(&self, key: &str) -> Option<Rc<S::Child>> {
		self.state.borrow().order.get(key)
	}

	pub fn len(&self) -> usize {
		self.state.borrow().order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn emit_change(&self) {
		let data = self.data();
		self.observers.emit(CHANGE, &ListEvent::Change(data));
	}

	fn is_current(&self, generation: u64) -> bool {
		self.state.borrow().generation == generation
	}

	fn on_added(&self, generation: u64, key: &str, prev: Option<&str>) {
		if !self.is_current(generation) {
			return;
		}
		if self.state.borrow_mut().order.move_after(prev, key) {
			trace!(path = %self.ctx.reference().path(), key, "repeated insert treated as move");
			self.emit_change();
			return;
		}

		let child = S::child(&self.ctx, key);
		self.state.borrow_mut().order.insert_after(prev, key, child.clone());
		child.activate();
		trace!(path = %self.ctx.reference().path(), key, ?prev, "child added");
		self.observers.emit(
			ADDED,
			&ListEvent::Added(ListEntry {
				key: key.to_owned(),
				child,
			}),
		);
		self.emit_change();
	}

	fn on_removed(&self, generation: u64, key: &str) {
		if !self.is_current(generation) {
			return;
		}
		let Some(child) = self.state.borrow_mut().order.remove(key) else {
			return;
		};
		retire(&child);
		trace!(path = %self.ctx.reference().path(), key, "child removed");
		self.observers.emit(REMOVED, &ListEvent::Removed(key.to_owned()));
		self.emit_change();
	}

	fn on_moved(&self, generation: u64, key: &str, prev: Option<&str>) {
		if !self.is_current(generation) {
			return;
		}
		if self.state.borrow_mut().order.move_after(prev, key) {
			trace!(path = %self.ctx.reference().path(), key, ?prev, "child moved");
			self.emit_change();
		}
	}

	fn subscription_failed(&self, generation: u64, error: RemoteError) {
		{
			let mut state = self.state.borrow_mut();
			if state.generation != generation || state.disconnected {
				return;
			}
			state.disconnected = true;
		}
		warn!(path = %self.ctx.reference().path(), %error, "list subscription failed");
		self.observers
			.emit(DISCONNECT, &ListEvent::Disconnect(Error::Subscription(error)));
	}

	fn subscribe(&self, event: ChildEvent, generation: u64) -> SubscriptionToken {
		let on_event = {
			let this = self.this.clone();
			Box::new(move |snapshot: Snapshot, prev: Option<String>| {
				let (Some(handle), Some(key)) = (this.upgrade(), snapshot.key()) else {
					return;
				};
				match event {
					ChildEvent::Added => handle.on_added(generation, key, prev.as_deref()),
					ChildEvent::Removed => handle.on_removed(generation, key),
					ChildEvent::Moved => handle.on_moved(generation, key, prev.as_deref()),
				}
			})
		};
		let on_error = {
			let this = self.this.clone();
			Box::new(move |error: RemoteError| {
				if let Some(handle) = this.upgrade() {
					handle.subscription_failed(generation, error);
				}
			})
		};
		self.ctx.reference().subscribe_child(event, on_event, on_error)
	}
}

impl<S: ListSchema> Handle for StreamListHandle<S> {
	type Payload = ListEvent<S::Child>;

	const GATING_EVENTS: &'static [&'static str] = &[CHANGE, ADDED, REMOVED];

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
				if let Some(handle) = this.upgrade() {
					handle.emit_change();
				}
			});
			return;
		}

		let generation = {
			let mut state = self.state.borrow_mut();
			state.active = true;
			state.disconnected = false;
			state.generation
		};
		debug!(kind = type_name::<S>(), path = %self.ctx.reference().path(), "activating stream list");
		let tokens: Vec<_> = [ChildEvent::Added, ChildEvent::Removed, ChildEvent::Moved]
			.into_iter()
			.map(|event| self.subscribe(event, generation))
			.collect();
		{
			let mut state = self.state.borrow_mut();
			if state.generation == generation {
				state.tokens = tokens;
				return;
			}
		}
		trace!(path = %self.ctx.reference().path(), "stream list unwatched while subscribing");
		for token in tokens {
			self.ctx.reference().unsubscribe(token);
		}
	}

	fn is_active(&self) -> bool {
		self.state.borrow().active
	}

	fn deactivate(&self) {
		let (tokens, children) = {
			let mut state = self.state.borrow_mut();
			if !std::mem::take(&mut state.active) {
				return;
			}
			state.generation += 1;
			(std::mem::take(&mut state.tokens), state.order.drain())
		};
		for token in tokens {
			self.ctx.reference().unsubscribe(token);
		}
		for child in &children {
			retire(child);
		}
		debug!(path = %self.ctx.reference().path(), "stream list unwatched");
		self.observers.emit(UNWATCHED, &ListEvent::Unwatched);
	}
}

/// Tears down a child that left the list, observers included.
fn retire<C: Handle>(child: &Rc<C>) {
	child.destroy();
	child.deactivate();
}
