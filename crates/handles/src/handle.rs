//! The subscription-lifecycle contract shared by every handle kind.

use std::any::type_name;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_store::{Reference, Scheduler};
use tracing::debug;

use crate::observer::{Callback, ObserverRegistry};
use crate::service::{Service, WeakService};
use crate::{Result, ServiceConfig};

/// Everything a handle needs from the outside world, fixed at construction.
#[derive(Clone)]
pub struct HandleContext {
	reference: Rc<dyn Reference>,
	scheduler: Scheduler,
	config: Rc<ServiceConfig>,
	service: WeakService,
}

impl fmt::Debug for HandleContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandleContext")
			.field("path", &self.reference.path())
			.field("service", &self.config.name)
			.finish_non_exhaustive()
	}
}

impl HandleContext {
	/// Context for a handle that does not belong to a [`Service`].
	pub fn new(reference: Rc<dyn Reference>, scheduler: Scheduler, config: Rc<ServiceConfig>) -> Self {
		Self {
			reference,
			scheduler,
			config,
			service: WeakService::detached(),
		}
	}

	pub(crate) fn with_service(mut self, service: WeakService) -> Self {
		self.service = service;
		self
	}

	/// Same scheduler, configuration and service, bound to the child path `segment`.
	pub fn child(&self, segment: &str) -> Self {
		self.at(self.reference.child(segment))
	}

	/// Same scheduler, configuration and service, bound to `reference`.
	pub fn at(&self, reference: Rc<dyn Reference>) -> Self {
		Self {
			reference,
			scheduler: self.scheduler.clone(),
			config: self.config.clone(),
			service: self.service.clone(),
		}
	}

	pub fn reference(&self) -> &Rc<dyn Reference> {
		&self.reference
	}

	pub fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}

	pub fn config(&self) -> &ServiceConfig {
		&self.config
	}

	/// The owning service, if the handle was built by one that is still alive.
	pub fn service(&self) -> Option<Service> {
		self.service.upgrade()
	}
}

/// A live local proxy for one remote path.
///
/// Implementors own an [`ObserverRegistry`] and zero or more remote subscriptions. The
/// provided methods forward to the registry; the registry's removal hook, installed by
/// [`Handle::watch_teardown`], deactivates the handle once no observer of
/// [`GATING_EVENTS`](Handle::GATING_EVENTS) remains.
pub trait Handle: 'static {
	/// Payload carried by every event of this handle.
	type Payload: 'static;

	/// Events whose observers keep the remote subscriptions alive.
	const GATING_EVENTS: &'static [&'static str];

	/// Builds the handle. Must not start any subscription.
	fn construct(ctx: HandleContext) -> Rc<Self>
	where
		Self: Sized;

	fn context(&self) -> &HandleContext;

	fn observers(&self) -> &ObserverRegistry<Self::Payload>;

	/// Starts the remote subscriptions, or schedules a re-emission of the current state on
	/// the next tick if they are already running.
	fn activate(&self);

	/// Whether the remote subscriptions are running.
	fn is_active(&self) -> bool;

	/// Tears down the remote subscriptions, clears cached state and emits `"unwatched"`.
	///
	/// Called by the teardown hook; calling it on an inactive handle does nothing.
	fn deactivate(&self);

	fn on(&self, event: &str, callback: Callback<Self::Payload>) -> Result<Callback<Self::Payload>> {
		self.observers().on(event, callback)
	}

	fn once(&self, event: &str, callback: Callback<Self::Payload>) -> Result<Callback<Self::Payload>> {
		self.observers().once(event, callback)
	}

	fn off(&self, event: &str, callback: &Callback<Self::Payload>) {
		self.observers().off(event, callback);
	}

	fn emit(&self, event: &str, payload: &Self::Payload) {
		self.observers().emit(event, payload);
	}

	fn has_observers_for(&self, events: &[&str]) -> bool {
		self.observers().has_observers_for(events)
	}

	/// Removes every observer through the gated removal path.
	///
	/// A handle that is active but has no observers at all stays active.
	fn destroy(&self) {
		self.observers().destroy();
	}

	/// Key of the remote path this handle is bound to.
	fn key(&self) -> Option<String> {
		self.context().reference().key()
	}

	/// Installs the removal hook that deactivates `handle` when its gating observers are gone.
	fn watch_teardown(handle: &Rc<Self>)
	where
		Self: Sized,
	{
		let weak: Weak<Self> = Rc::downgrade(handle);
		handle.observers().set_removal_hook(move || {
			if let Some(handle) = weak.upgrade() {
				release_if_unobserved(&*handle);
			}
		});
	}
}

fn release_if_unobserved<H: Handle>(handle: &H) {
	if handle.is_active() && !handle.has_observers_for(H::GATING_EVENTS) {
		debug!(
			kind = type_name::<H>(),
			path = %handle.context().reference().path(),
			"last gating observer removed, deactivating"
		);
		handle.deactivate();
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;
	use crate::callback;
	use crate::testing::MockReference;

	struct Probe {
		ctx: HandleContext,
		observers: ObserverRegistry<()>,
		active: Cell<bool>,
		deactivations: Cell<usize>,
	}

	impl Handle for Probe {
		type Payload = ();
		const GATING_EVENTS: &'static [&'static str] = &["change", "added"];

		fn construct(ctx: HandleContext) -> Rc<Self> {
			let handle = Rc::new(Probe {
				ctx,
				observers: ObserverRegistry::new(),
				active: Cell::new(false),
				deactivations: Cell::new(0),
			});
			Self::watch_teardown(&handle);
			handle
		}

		fn context(&self) -> &HandleContext {
			&self.ctx
		}

		fn observers(&self) -> &ObserverRegistry<()> {
			&self.observers
		}

		fn activate(&self) {
			self.active.set(true);
		}

		fn is_active(&self) -> bool {
			self.active.get()
		}

		fn deactivate(&self) {
			self.active.set(false);
			self.deactivations.set(self.deactivations.get() + 1);
		}
	}

	fn probe() -> Rc<Probe> {
		Probe::construct(HandleContext::new(MockReference::root(), Scheduler::new(), Rc::default()))
	}

	#[test]
	fn teardown_waits_for_every_gating_event() {
		let handle = probe();
		handle.activate();
		let change = handle.on("change", callback(|_| {})).unwrap();
		let added = handle.on("added", callback(|_| {})).unwrap();
		let other = handle.on("other", callback(|_| {})).unwrap();

		handle.off("change", &change);
		assert!(handle.is_active());
		handle.off("added", &added);
		assert!(!handle.is_active());
		handle.off("other", &other);
		assert_eq!(handle.deactivations.get(), 1);
	}

	#[test]
	fn destroy_deactivates_only_an_observed_handle() {
		let observed = probe();
		observed.activate();
		observed.on("change", callback(|_| {})).unwrap();
		observed.destroy();
		assert!(!observed.is_active());

		let unobserved = probe();
		unobserved.activate();
		unobserved.destroy();
		assert!(unobserved.is_active());
	}

	#[test]
	fn key_comes_from_the_reference() {
		let ctx = HandleContext::new(MockReference::root(), Scheduler::new(), Rc::default());
		let handle = Probe::construct(ctx.child("users").child("ada"));
		assert_eq!(handle.key().as_deref(), Some("ada"));
		assert_eq!(handle.context().reference().path(), "/users/ada");
	}
}
