//! Single-record handle.
//!
//! `Idle -> Active` on [`Handle::activate`]; stays `Active` while snapshots arrive; back to
//! `Idle` once the last `"change"` observer leaves.

use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tether_store::{Priority, RemoteError, Snapshot, SubscriptionToken};
use tracing::{debug, trace, warn};

use crate::events::{CHANGE, DISCONNECT, UNWATCHED};
use crate::handle::{Handle, HandleContext};
use crate::observer::ObserverRegistry;
use crate::{Error, Result};

/// Validation and emission policy of a record kind.
///
/// Each schema type is a distinct handle kind for the [`HandleRegistry`](crate::HandleRegistry).
pub trait RecordSchema: 'static {
	/// Emit `"change"` even when the snapshot is empty.
	const EMIT_EMPTY: bool = false;

	/// Judges a mutation. Any returned value rejects it and becomes the error payload.
	///
	/// Must not have side effects beyond producing the verdict.
	fn validate(old: Option<&Value>, new: &Value) -> Option<Value> {
		let _ = (old, new);
		None
	}
}

/// No validation, empty snapshots suppressed.
#[derive(Debug)]
pub struct Untyped;

impl RecordSchema for Untyped {}

/// No validation, empty snapshots emitted too.
#[derive(Debug)]
pub struct Lazy;

impl RecordSchema for Lazy {
	const EMIT_EMPTY: bool = true;
}

/// Events of a [`RecordHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
	/// `"change"`: the latest value.
	Change(Value),
	/// `"disconnect"`: the value subscription failed.
	Disconnect(Error),
	/// `"unwatched"`: the value subscription was torn down.
	Unwatched,
}

#[derive(Default)]
struct RecordState {
	value: Option<Value>,
	/// Set before subscribing, so a snapshot delivered from inside the subscribe call already
	/// sees an active handle.
	active: bool,
	token: Option<SubscriptionToken>,
	/// Bumped on deactivation so late snapshots of a dead subscription are dropped.
	generation: u64,
}

/// Live projection of one remote record.
pub struct RecordHandle<S: RecordSchema = Untyped> {
	ctx: HandleContext,
	observers: ObserverRegistry<RecordEvent>,
	state: RefCell<RecordState>,
	this: Weak<Self>,
	_schema: PhantomData<S>,
}

impl<S: RecordSchema> fmt::Debug for RecordHandle<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("RecordHandle")
			.field("path", &self.ctx.reference().path())
			.field("active", &state.active)
			.field("value", &state.value)
			.finish()
	}
}

impl<S: RecordSchema> RecordHandle<S> {
	/// Key of the record, taken from its reference.
	pub fn id(&self) -> Option<String> {
		self.ctx.reference().key()
	}

	/// Latest value, if active and at least one snapshot arrived.
	pub fn value(&self) -> Option<Value> {
		self.state.borrow().value.clone()
	}

	/// Replaces the record. Rejected by the validator before any remote call.
	pub fn replace(&self, value: Value, priority: Option<Priority>) -> impl Future<Output = Result<()>> + use<S> {
		let ack = self
			.check(&value)
			.map(|()| self.ctx.reference().write(value, priority));
		async move { ack?.await.map_err(Error::RemoteWrite) }
	}

	/// Patches the record with `partial`.
	///
	/// The validator sees the current value shallow-merged with `partial`; the remote only
	/// receives `partial`.
	pub fn merge(&self, partial: Map<String, Value>) -> impl Future<Output = Result<()>> + use<S> {
		let mut merged = match self.value() {
			Some(Value::Object(map)) => map,
			_ => Map::new(),
		};
		merged.extend(partial.clone());
		let ack = self
			.check(&Value::Object(merged))
			.map(|()| self.ctx.reference().patch(partial));
		async move { ack?.await.map_err(Error::RemoteWrite) }
	}

	/// Deletes the record.
	pub fn delete(&self) -> impl Future<Output = Result<()>> + use<S> {
		let ack = self.ctx.reference().delete();
		async move { ack.await.map_err(Error::RemoteWrite) }
	}

	fn check(&self, new: &Value) -> Result<()> {
		let current = self.value();
		match S::validate(current.as_ref(), new) {
			Some(errors) => {
				debug!(path = %self.ctx.reference().path(), %errors, "record mutation rejected by validator");
				Err(Error::Validation(errors))
			}
			None => Ok(()),
		}
	}

	fn emits_empty(&self) -> bool {
		S::EMIT_EMPTY || self.ctx.config().emit_empty_records
	}

	fn emit_change(&self) {
		let value = self.value();
		let value = match value {
			Some(value) if !value.is_null() => value,
			Some(_) | None if self.emits_empty() => Value::Null,
			_ => return,
		};
		self.observers.emit(CHANGE, &RecordEvent::Change(value));
	}

	fn apply_snapshot(&self, generation: u64, snapshot: Snapshot) {
		{
			let mut state = self.state.borrow_mut();
			if state.generation != generation {
				return;
			}
			state.value = Some(snapshot.into_value());
		}
		trace!(path = %self.ctx.reference().path(), "record snapshot");
		self.emit_change();
	}

	fn subscription_failed(&self, generation: u64, error: RemoteError) {
		if self.state.borrow().generation != generation {
			return;
		}
		warn!(path = %self.ctx.reference().path(), %error, "record subscription failed");
		self.observers
			.emit(DISCONNECT, &RecordEvent::Disconnect(Error::Subscription(error)));
	}
}

impl<S: RecordSchema> Handle for RecordHandle<S> {
	type Payload = RecordEvent;

	const GATING_EVENTS: &'static [&'static str] = &[CHANGE];

	fn construct(ctx: HandleContext) -> Rc<Self> {
		let handle = Rc::new_cyclic(|this| Self {
			ctx,
			observers: ObserverRegistry::new(),
			state: RefCell::default(),
			this: this.clone(),
			_schema: PhantomData,
		});
		Self::watch_teardown(&handle);
		handle
	}

	fn context(&self) -> &HandleContext {
		&self.ctx
	}

	fn observers(&self) -> &ObserverRegistry<RecordEvent> {
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
			state.generation
		};
		debug!(kind = type_name::<S>(), path = %self.ctx.reference().path(), "activating record");
		let on_snapshot = {
			let this = self.this.clone();
			Box::new(move |snapshot: Snapshot| {
				if let Some(handle) = this.upgrade() {
					handle.apply_snapshot(generation, snapshot);
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
		let token = self.ctx.reference().subscribe_value(on_snapshot, on_error);
		{
			let mut state = self.state.borrow_mut();
			if state.generation == generation {
				state.token = Some(token);
				return;
			}
		}
		trace!(path = %self.ctx.reference().path(), "record unwatched while subscribing");
		self.ctx.reference().unsubscribe(token);
	}

	fn is_active(&self) -> bool {
		self.state.borrow().active
	}

	fn deactivate(&self) {
		let token = {
			let mut state = self.state.borrow_mut();
			if !std::mem::take(&mut state.active) {
				return;
			}
			state.value = None;
			state.generation += 1;
			state.token.take()
		};
		if let Some(token) = token {
			self.ctx.reference().unsubscribe(token);
		}
		debug!(path = %self.ctx.reference().path(), "record unwatched");
		self.observers.emit(UNWATCHED, &RecordEvent::Unwatched);
	}
}
