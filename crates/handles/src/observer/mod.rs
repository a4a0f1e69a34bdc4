//! Named-event observer registry shared by every handle.
//!
//! # Invariants
//!
//! 1. Callbacks of one event run in registration order.
//! 2. An emission dispatches to the callbacks registered when it started. Callbacks added
//!    during the emission wait for the next one; callbacks removed during it do not shift
//!    their siblings.
//! 3. A `once` callback runs at most once, even when it re-enters the same event.
//! 4. Every removal, including the ones done by `once` and `destroy`, goes through
//!    [`ObserverRegistry::off`] and then runs the removal hook. Handles hang their
//!    subscription teardown on that hook.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::{Error, Result};

/// An observer callback. Identity (pointer equality) is what [`ObserverRegistry::off`] matches.
pub type Callback<P> = Rc<dyn Fn(&P)>;

/// Wraps a closure as a [`Callback`].
pub fn callback<P>(f: impl Fn(&P) + 'static) -> Callback<P> {
	Rc::new(f)
}

struct Inner<P> {
	events: RefCell<IndexMap<String, Vec<Callback<P>>>>,
	removal_hook: RefCell<Option<Rc<dyn Fn()>>>,
}

/// Per-handle mapping from event name to an ordered list of callbacks.
///
/// Clones share the same registrations.
pub struct ObserverRegistry<P> {
	inner: Rc<Inner<P>>,
}

impl<P> Clone for ObserverRegistry<P> {
	fn clone(&self) -> Self {
		Self {
			inner: Rc::clone(&self.inner),
		}
	}
}

impl<P> Default for ObserverRegistry<P> {
	fn default() -> Self {
		Self {
			inner: Rc::new(Inner {
				events: RefCell::new(IndexMap::new()),
				removal_hook: RefCell::new(None),
			}),
		}
	}
}

impl<P> fmt::Debug for ObserverRegistry<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let events = self.inner.events.borrow();
		f.debug_map()
			.entries(events.iter().map(|(name, callbacks)| (name, callbacks.len())))
			.finish()
	}
}

impl<P: 'static> ObserverRegistry<P> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs the hook run after every [`off`](Self::off). Replaces any previous hook.
	pub fn set_removal_hook(&self, hook: impl Fn() + 'static) {
		*self.inner.removal_hook.borrow_mut() = Some(Rc::new(hook));
	}

	/// Registers `callback` for `event` and hands it back for later removal.
	pub fn on(&self, event: &str, callback: Callback<P>) -> Result<Callback<P>> {
		if event.is_empty() {
			return Err(Error::InvalidArgument("observer registration requires an event name".into()));
		}
		self.inner
			.events
			.borrow_mut()
			.entry(event.to_owned())
			.or_default()
			.push(callback.clone());
		Ok(callback)
	}

	/// Registers `callback` for the first dispatch of `event` only.
	///
	/// The returned wrapper is what is actually registered; pass it to [`off`](Self::off) to
	/// cancel before it fires. On first dispatch the wrapper removes itself, then runs
	/// `callback`.
	pub fn once(&self, event: &str, callback: Callback<P>) -> Result<Callback<P>> {
		let registry: Weak<Inner<P>> = Rc::downgrade(&self.inner);
		let this: Rc<OnceCell<Weak<dyn Fn(&P)>>> = Rc::new(OnceCell::new());
		let fired = Cell::new(false);
		let name = event.to_owned();

		let wrapper: Callback<P> = Rc::new({
			let this = this.clone();
			move |payload: &P| {
				if fired.replace(true) {
					return;
				}
				if let (Some(inner), Some(me)) = (registry.upgrade(), this.get().and_then(Weak::upgrade)) {
					ObserverRegistry { inner }.off(&name, &me);
				}
				callback(payload);
			}
		});
		let _ = this.set(Rc::downgrade(&wrapper));
		self.on(event, wrapper)
	}

	/// Removes the first registration of `callback` for `event`, then runs the removal hook.
	///
	/// Removing a callback that is not registered is not an error.
	pub fn off(&self, event: &str, callback: &Callback<P>) {
		{
			let mut events = self.inner.events.borrow_mut();
			if let Some(callbacks) = events.get_mut(event)
				&& let Some(pos) = callbacks.iter().position(|c| Rc::ptr_eq(c, callback))
			{
				callbacks.remove(pos);
			}
		}
		let hook = self.inner.removal_hook.borrow().clone();
		if let Some(hook) = hook {
			hook();
		}
	}

	/// Dispatches `payload` to every callback registered for `event` when the call starts.
	pub fn emit(&self, event: &str, payload: &P) {
		let snapshot: Vec<Callback<P>> = self.inner.events.borrow().get(event).cloned().unwrap_or_default();
		for callback in snapshot {
			callback(payload);
		}
	}

	/// Returns `true` if any of `events` has at least one registration.
	pub fn has_observers_for(&self, events: &[&str]) -> bool {
		let registered = self.inner.events.borrow();
		events
			.iter()
			.any(|event| registered.get(*event).is_some_and(|callbacks| !callbacks.is_empty()))
	}

	/// Number of registrations for `event`.
	pub fn count(&self, event: &str) -> usize {
		self.inner.events.borrow().get(event).map_or(0, Vec::len)
	}

	/// Removes every registration of every event, one [`off`](Self::off) at a time.
	pub fn destroy(&self) {
		let registrations: Vec<(String, Callback<P>)> = self
			.inner
			.events
			.borrow()
			.iter()
			.flat_map(|(name, callbacks)| callbacks.iter().map(move |c| (name.clone(), c.clone())))
			.collect();
		for (name, callback) in registrations {
			self.off(&name, &callback);
		}
	}
}
