//! Recording [`Reference`] double for unit tests.
//!
//! Counts subscribe/unsubscribe/write calls and lets tests push snapshots, child events and
//! errors by hand. Child references are cached, so `mock.child_mock("a")` is the same object a
//! handle reached through `reference.child("a")`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::FutureExt;
use futures::future;
use serde_json::{Map, Value};
use tether_store::{
	Ack, ChildEvent, ChildFn, ErrorFn, Priority, Proposal, Reference, RemoteError, Snapshot, SnapshotFn,
	SubscriptionToken, TransactionFuture, TransactionOutcome,
};

type ValueSub = (Rc<dyn Fn(Snapshot)>, Rc<dyn Fn(RemoteError)>);
type ChildSub = (ChildEvent, Rc<dyn Fn(Snapshot, Option<String>)>, Rc<dyn Fn(RemoteError)>);

#[derive(Default)]
pub(crate) struct MockState {
	next_token: u64,
	value_subs: HashMap<SubscriptionToken, ValueSub>,
	child_subs: HashMap<SubscriptionToken, ChildSub>,
	pub subscribe_calls: usize,
	pub unsubscribe_calls: usize,
	pub writes: Vec<(Value, Option<Priority>)>,
	pub patches: Vec<Map<String, Value>>,
	pub deletes: usize,
	pub write_failure: Option<RemoteError>,
	/// Value transactions read and commit against.
	pub stored: Value,
	/// When set, transactions report "not committed" without calling the proposal.
	pub reject_commits: bool,
	pub transactions: usize,
	/// When set, value subscriptions receive this snapshot from inside the subscribe call.
	pub deliver_on_subscribe: Option<Value>,
}

pub(crate) struct MockReference {
	path: Vec<String>,
	pub state: RefCell<MockState>,
	children: RefCell<HashMap<String, Rc<MockReference>>>,
}

impl MockReference {
	pub fn root() -> Rc<Self> {
		Self::at(Vec::new())
	}

	fn at(path: Vec<String>) -> Rc<Self> {
		Rc::new(Self {
			path,
			state: RefCell::default(),
			children: RefCell::default(),
		})
	}

	pub fn child_mock(&self, segment: &str) -> Rc<MockReference> {
		self.children
			.borrow_mut()
			.entry(segment.to_owned())
			.or_insert_with(|| {
				let mut path = self.path.clone();
				path.push(segment.to_owned());
				Self::at(path)
			})
			.clone()
	}

	pub fn subscribe_calls(&self) -> usize {
		self.state.borrow().subscribe_calls
	}

	pub fn unsubscribe_calls(&self) -> usize {
		self.state.borrow().unsubscribe_calls
	}

	pub fn live_subscriptions(&self) -> usize {
		let state = self.state.borrow();
		state.value_subs.len() + state.child_subs.len()
	}

	/// Pushes a value snapshot to every live value subscription.
	pub fn fire_value(&self, value: Value) {
		let subs: Vec<_> = self.state.borrow().value_subs.values().map(|(s, _)| s.clone()).collect();
		for sub in subs {
			sub(Snapshot::new(self.key(), value.clone()));
		}
	}

	/// Pushes an error to every live subscription.
	pub fn fire_error(&self, error: RemoteError) {
		let state = self.state.borrow();
		let subs: Vec<_> = state
			.value_subs
			.values()
			.map(|(_, e)| e.clone())
			.chain(state.child_subs.values().map(|(_, _, e)| e.clone()))
			.collect();
		drop(state);
		for sub in subs {
			sub(error.clone());
		}
	}

	/// Pushes one child event to the live subscriptions of that kind.
	pub fn fire_child(&self, event: ChildEvent, key: &str, prev: Option<&str>) {
		let subs: Vec<_> = self
			.state
			.borrow()
			.child_subs
			.values()
			.filter(|(kind, _, _)| *kind == event)
			.map(|(_, s, _)| s.clone())
			.collect();
		for sub in subs {
			sub(Snapshot::new(Some(key.to_owned()), Value::Bool(true)), prev.map(str::to_owned));
		}
	}

	fn next_token(state: &mut MockState) -> SubscriptionToken {
		state.next_token += 1;
		state.subscribe_calls += 1;
		SubscriptionToken::new(state.next_token)
	}

	fn ack(&self) -> Ack {
		let result = match self.state.borrow_mut().write_failure.take() {
			Some(error) => Err(error),
			None => Ok(()),
		};
		future::ready(result).boxed_local()
	}
}

impl Reference for MockReference {
	fn key(&self) -> Option<String> {
		self.path.last().cloned()
	}

	fn path(&self) -> String {
		format!("/{}", self.path.join("/"))
	}

	fn child(&self, segment: &str) -> Rc<dyn Reference> {
		self.child_mock(segment)
	}

	fn subscribe_value(&self, on_snapshot: SnapshotFn, on_error: ErrorFn) -> SubscriptionToken {
		let on_snapshot: Rc<dyn Fn(Snapshot)> = Rc::from(on_snapshot);
		let (token, immediate) = {
			let mut state = self.state.borrow_mut();
			let token = Self::next_token(&mut state);
			state.value_subs.insert(token, (on_snapshot.clone(), Rc::from(on_error)));
			(token, state.deliver_on_subscribe.clone())
		};
		if let Some(value) = immediate {
			on_snapshot(Snapshot::new(self.key(), value));
		}
		token
	}

	fn subscribe_child(&self, event: ChildEvent, on_event: ChildFn, on_error: ErrorFn) -> SubscriptionToken {
		let mut state = self.state.borrow_mut();
		let token = Self::next_token(&mut state);
		state.child_subs.insert(token, (event, Rc::from(on_event), Rc::from(on_error)));
		token
	}

	fn unsubscribe(&self, token: SubscriptionToken) {
		let mut state = self.state.borrow_mut();
		state.unsubscribe_calls += 1;
		state.value_subs.remove(&token);
		state.child_subs.remove(&token);
	}

	fn write(&self, value: Value, priority: Option<Priority>) -> Ack {
		self.state.borrow_mut().writes.push((value, priority));
		self.ack()
	}

	fn patch(&self, partial: Map<String, Value>) -> Ack {
		self.state.borrow_mut().patches.push(partial);
		self.ack()
	}

	fn delete(&self) -> Ack {
		self.state.borrow_mut().deletes += 1;
		self.ack()
	}

	fn transact(&self, mut propose: Proposal) -> TransactionFuture {
		let (failure, reject, current) = {
			let mut state = self.state.borrow_mut();
			state.transactions += 1;
			(state.write_failure.take(), state.reject_commits, state.stored.clone())
		};
		if let Some(error) = failure {
			return future::ready(Err(error)).boxed_local();
		}
		if reject {
			return future::ready(Ok(TransactionOutcome {
				committed: false,
				value: current,
			}))
			.boxed_local();
		}
		let outcome = match propose(current.clone()) {
			Some(next) => {
				self.state.borrow_mut().stored = next.clone();
				TransactionOutcome {
					committed: true,
					value: next,
				}
			}
			None => TransactionOutcome {
				committed: false,
				value: current,
			},
		};
		future::ready(Ok(outcome)).boxed_local()
	}
}
