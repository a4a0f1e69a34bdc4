//! Handle cache.
//!
//! Guarantees at most one live handle per `(kind, arguments)` pair. A kind is a concrete
//! handle type, so `RecordHandle<Profile>` and `RecordHandle<Settings>` are cached apart even
//! when their arguments match. Lookups never activate; [`Service::get`](crate::Service::get)
//! does that on the next tick.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tether_store::{Reference, Scheduler};
use tracing::{debug, info};

use crate::handle::{Handle, HandleContext};
use crate::service::WeakService;
use crate::{Error, Result, ServiceConfig};

/// Maps an argument list to the remote reference a handle binds to.
type Resolver = Rc<dyn Fn(&[String]) -> Rc<dyn Reference>>;

/// Type-erased view of a cached handle.
trait AnyHandle {
	fn destroy_handle(&self);

	fn path(&self) -> String;

	fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<H: Handle> AnyHandle for H {
	fn destroy_handle(&self) {
		self.destroy();
	}

	fn path(&self) -> String {
		self.context().reference().path()
	}

	fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
		self
	}
}

struct Kind {
	name: &'static str,
	resolver: Resolver,
	/// Keyed by the argument list itself, so no separator can make two lists collide.
	instances: IndexMap<Vec<String>, Rc<dyn AnyHandle>>,
}

/// Per-service cache of handles, one instance per kind and argument list.
pub struct HandleRegistry {
	kinds: RefCell<HashMap<TypeId, Kind>>,
	scheduler: Scheduler,
	config: Rc<ServiceConfig>,
	owner: WeakService,
}

impl fmt::Debug for HandleRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let kinds = self.kinds.borrow();
		f.debug_map()
			.entries(kinds.values().map(|kind| (kind.name, kind.instances.len())))
			.finish()
	}
}

impl HandleRegistry {
	/// Registry whose handles do not belong to a [`Service`](crate::Service).
	pub fn new(scheduler: Scheduler, config: Rc<ServiceConfig>) -> Self {
		Self {
			kinds: RefCell::default(),
			scheduler,
			config,
			owner: WeakService::detached(),
		}
	}

	pub(crate) fn owned_by(mut self, owner: WeakService) -> Self {
		self.owner = owner;
		self
	}

	/// Registers the kind `H` with the resolver turning argument lists into references.
	///
	/// Registering a kind again replaces its resolver and destroys its cached instances.
	pub fn register<H: Handle>(&self, resolver: impl Fn(&[String]) -> Rc<dyn Reference> + 'static) {
		let kind = Kind {
			name: type_name::<H>(),
			resolver: Rc::new(resolver),
			instances: IndexMap::new(),
		};
		let previous = self.kinds.borrow_mut().insert(TypeId::of::<H>(), kind);
		debug!(kind = type_name::<H>(), replaced = previous.is_some(), "registered handle kind");
		if let Some(previous) = previous {
			for handle in previous.instances.into_values() {
				handle.destroy_handle();
			}
		}
	}

	pub fn is_registered<H: Handle>(&self) -> bool {
		self.kinds.borrow().contains_key(&TypeId::of::<H>())
	}

	/// Returns the cached `H` for `args`, constructing it on first use.
	///
	/// The handle is not activated.
	///
	/// # Errors
	///
	/// [`Error::NotRegistered`] if `H` was never registered.
	pub fn get<H: Handle>(&self, args: &[&str]) -> Result<Rc<H>> {
		let key: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
		let resolver = {
			let kinds = self.kinds.borrow();
			let kind = kinds
				.get(&TypeId::of::<H>())
				.ok_or(Error::NotRegistered(type_name::<H>()))?;
			if let Some(cached) = kind.instances.get(&key) {
				return downcast(cached.clone());
			}
			kind.resolver.clone()
		};

		// The resolver and the constructor run unborrowed; either may reach back into the registry.
		let reference = resolver(&key);
		let ctx = HandleContext::new(reference, self.scheduler.clone(), self.config.clone())
			.with_service(self.owner.clone());
		let handle = H::construct(ctx);
		debug!(kind = type_name::<H>(), path = %handle.context().reference().path(), "constructed handle");

		if let Some(kind) = self.kinds.borrow_mut().get_mut(&TypeId::of::<H>()) {
			let cached = kind.instances.entry(key).or_insert_with(|| handle.clone() as Rc<dyn AnyHandle>);
			return downcast(cached.clone());
		}
		Ok(handle)
	}

	/// Number of cached handles across every kind.
	pub fn len(&self) -> usize {
		self.kinds.borrow().values().map(|kind| kind.instances.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Destroys every cached handle of every kind and empties the cache.
	///
	/// Kinds stay registered; later lookups construct fresh handles.
	pub fn off(&self) {
		let handles: Vec<Rc<dyn AnyHandle>> = self
			.kinds
			.borrow_mut()
			.values_mut()
			.flat_map(|kind| kind.instances.drain(..).map(|(_, handle)| handle))
			.collect();
		info!(service = %self.config.name, count = handles.len(), "destroying cached handles");
		for handle in handles {
			debug!(path = %handle.path(), "destroying handle");
			handle.destroy_handle();
		}
	}
}

fn downcast<H: Handle>(handle: Rc<dyn AnyHandle>) -> Result<Rc<H>> {
	handle
		.into_any()
		.downcast::<H>()
		.map_err(|_| Error::InvalidArgument(format!("cached handle is not a `{}`", type_name::<H>())))
}
