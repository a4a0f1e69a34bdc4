//! Service facade and path resolution.

use std::fmt;
use std::rc::{Rc, Weak};

use tether_store::{Reference, Scheduler};
use tracing::info;

use crate::handle::Handle;
use crate::registry::HandleRegistry;
use crate::{Result, ServiceConfig};

struct ServiceInner {
	registry: HandleRegistry,
	scheduler: Scheduler,
	config: Rc<ServiceConfig>,
}

/// Owns a [`HandleRegistry`] and activates looked-up handles on the next scheduler tick.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct Service {
	inner: Rc<ServiceInner>,
}

impl fmt::Debug for Service {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Service")
			.field("name", &self.inner.config.name)
			.field("registry", &self.inner.registry)
			.finish_non_exhaustive()
	}
}

impl Service {
	pub fn new(scheduler: Scheduler, config: ServiceConfig) -> Self {
		let config = Rc::new(config);
		let inner = Rc::new_cyclic(|weak| ServiceInner {
			registry: HandleRegistry::new(scheduler.clone(), config.clone()).owned_by(WeakService(weak.clone())),
			scheduler,
			config,
		});
		info!(name = %inner.config.name, agent = %inner.config.client_agent, "service created");
		Self { inner }
	}

	/// See [`HandleRegistry::register`].
	pub fn register<H: Handle>(&self, resolver: impl Fn(&[String]) -> Rc<dyn Reference> + 'static) {
		self.inner.registry.register::<H>(resolver);
	}

	/// Looks up the shared `H` for `args` and activates it on the next tick.
	///
	/// # Errors
	///
	/// [`Error::NotRegistered`](crate::Error::NotRegistered) if `H` was never registered.
	pub fn get<H: Handle>(&self, args: &[&str]) -> Result<Rc<H>> {
		let handle = self.inner.registry.get::<H>(args)?;
		let weak = Rc::downgrade(&handle);
		self.inner.scheduler.defer(move || {
			if let Some(handle) = weak.upgrade() {
				handle.activate();
			}
		});
		Ok(handle)
	}

	/// Destroys every cached handle. Call on session end.
	pub fn off(&self) {
		self.inner.registry.off();
	}

	pub fn registry(&self) -> &HandleRegistry {
		&self.inner.registry
	}

	pub fn scheduler(&self) -> &Scheduler {
		&self.inner.scheduler
	}

	pub fn config(&self) -> &ServiceConfig {
		&self.inner.config
	}

	pub fn downgrade(&self) -> WeakService {
		WeakService(Rc::downgrade(&self.inner))
	}
}

/// Non-owning reference to a [`Service`], held by the handles it builds.
#[derive(Clone, Default)]
pub struct WeakService(Weak<ServiceInner>);

impl fmt::Debug for WeakService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("WeakService").field(&self.0.strong_count()).finish()
	}
}

impl WeakService {
	/// A reference that never upgrades.
	pub fn detached() -> Self {
		Self::default()
	}

	pub fn upgrade(&self) -> Option<Service> {
		self.0.upgrade().map(|inner| Service { inner })
	}
}

/// Resolves segment lists against a root reference.
#[derive(Clone)]
pub struct Refs {
	root: Rc<dyn Reference>,
}

impl fmt::Debug for Refs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Refs").field("root", &self.root.path()).finish()
	}
}

impl Refs {
	pub fn new(root: Rc<dyn Reference>) -> Self {
		Self { root }
	}

	pub fn root(&self) -> &Rc<dyn Reference> {
		&self.root
	}

	/// The reference reached by following `segments` from the root.
	pub fn get<S: AsRef<str>>(&self, segments: &[S]) -> Rc<dyn Reference> {
		descend(self.root.clone(), segments)
	}

	/// Registry resolver placing each argument list under `prefix`.
	pub fn resolver(&self, prefix: &[&str]) -> impl Fn(&[String]) -> Rc<dyn Reference> + 'static {
		let base = self.get(prefix);
		move |args: &[String]| descend(base.clone(), args)
	}
}

fn descend<S: AsRef<str>>(from: Rc<dyn Reference>, segments: &[S]) -> Rc<dyn Reference> {
	segments.iter().fold(from, |node, segment| node.child(segment.as_ref()))
}
