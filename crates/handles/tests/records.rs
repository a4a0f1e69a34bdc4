//! Records over the in-memory store.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use tether_handles::events::{CHANGE, DISCONNECT};
use tether_handles::{
	Error, Handle, Lazy, RecordEvent, RecordHandle, RecordSchema, Refs, Service, ServiceConfig, callback,
};
use tether_store::{MemoryStore, Reference, RemoteError, Scheduler};

/// Profiles need a non-empty `name`; `age`, when present, must be a number.
struct Profile;

impl RecordSchema for Profile {
	fn validate(_old: Option<&Value>, new: &Value) -> Option<Value> {
		let mut errors = Map::new();
		if !new.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty()) {
			errors.insert("name".into(), json!("required"));
		}
		if new.get("age").is_some_and(|age| !age.is_number()) {
			errors.insert("age".into(), json!("must be a number"));
		}
		(!errors.is_empty()).then_some(Value::Object(errors))
	}
}

fn setup() -> (MemoryStore, Service) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let scheduler = Scheduler::new();
	let store = MemoryStore::new(scheduler.clone());
	let service = Service::new(scheduler, ServiceConfig::default());
	let refs = Refs::new(store.root());
	service.register::<RecordHandle<Profile>>(refs.resolver(&["profiles"]));
	service.register::<RecordHandle<Lazy>>(refs.resolver(&["profiles"]));
	(store, service)
}

fn changes<S: RecordSchema>(record: &RecordHandle<S>, event: &str) -> Rc<RefCell<Vec<RecordEvent>>> {
	let seen: Rc<RefCell<Vec<RecordEvent>>> = Rc::default();
	let sink = seen.clone();
	record
		.on(event, callback(move |e: &RecordEvent| sink.borrow_mut().push(e.clone())))
		.unwrap();
	seen
}

#[tokio::test]
async fn valid_replace_round_trips_through_the_subscription() {
	let (store, service) = setup();
	let ada = service.get::<RecordHandle<Profile>>(&["ada"]).unwrap();
	let seen = changes(&ada, CHANGE);
	service.scheduler().run_until_idle();
	assert!(seen.borrow().is_empty());

	ada.replace(json!({ "name": "Ada", "age": 36 }), None).await.unwrap();
	service.scheduler().run_until_idle();

	assert_eq!(*seen.borrow(), vec![RecordEvent::Change(json!({ "name": "Ada", "age": 36 }))]);
	assert_eq!(store.value_at("profiles/ada/age"), json!(36));
	assert_eq!(ada.id().as_deref(), Some("ada"));
}

#[tokio::test]
async fn invalid_mutations_never_reach_the_store() {
	let (store, service) = setup();
	let ada = service.get::<RecordHandle<Profile>>(&["ada"]).unwrap();
	let _seen = changes(&ada, CHANGE);
	service.scheduler().run_until_idle();

	let err = ada.replace(json!({ "name": "" }), None).await.unwrap_err();
	assert_eq!(err, Error::Validation(json!({ "name": "required" })));
	assert_eq!(store.value_at("profiles/ada"), Value::Null);

	ada.replace(json!({ "name": "Ada" }), None).await.unwrap();
	service.scheduler().run_until_idle();

	let partial: Map<String, Value> = [("age".to_owned(), json!("old"))].into_iter().collect();
	let err = ada.merge(partial).await.unwrap_err();
	assert_eq!(err, Error::Validation(json!({ "age": "must be a number" })));
	assert_eq!(store.value_at("profiles/ada"), json!({ "name": "Ada" }));
}

#[tokio::test]
async fn merge_patches_only_the_given_fields() {
	let (store, service) = setup();
	store.reference("profiles/ada").write(json!({ "name": "Ada", "age": 36 }), None).await.unwrap();
	let ada = service.get::<RecordHandle<Profile>>(&["ada"]).unwrap();
	let seen = changes(&ada, CHANGE);
	service.scheduler().run_until_idle();

	let partial: Map<String, Value> = [("age".to_owned(), json!(37))].into_iter().collect();
	ada.merge(partial).await.unwrap();
	service.scheduler().run_until_idle();

	assert_eq!(store.value_at("profiles/ada"), json!({ "name": "Ada", "age": 37 }));
	assert_eq!(seen.borrow().len(), 2);
}

#[tokio::test]
async fn delete_empties_the_record() {
	let (store, service) = setup();
	store.reference("profiles/bob").write(json!({ "name": "Bob" }), None).await.unwrap();
	let strict = service.get::<RecordHandle<Profile>>(&["bob"]).unwrap();
	let lazy = service.get::<RecordHandle<Lazy>>(&["bob"]).unwrap();
	let strict_seen = changes(&strict, CHANGE);
	let lazy_seen = changes(&lazy, CHANGE);
	service.scheduler().run_until_idle();

	strict.delete().await.unwrap();
	service.scheduler().run_until_idle();

	assert_eq!(strict_seen.borrow().len(), 1);
	assert_eq!(lazy_seen.borrow().last(), Some(&RecordEvent::Change(Value::Null)));
	assert_eq!(store.value_at("profiles/bob"), Value::Null);
}

#[tokio::test]
async fn write_failures_come_back_through_the_future() {
	let (store, service) = setup();
	let ada = service.get::<RecordHandle<Profile>>(&["ada"]).unwrap();
	store.fail_next_write(RemoteError::Denied("read only".into()));

	let err = ada.replace(json!({ "name": "Ada" }), None).await.unwrap_err();
	assert_eq!(err, Error::RemoteWrite(RemoteError::Denied("read only".into())));
	assert_eq!(store.value_at("profiles/ada"), Value::Null);
}

#[tokio::test]
async fn subscription_failure_is_a_disconnect() {
	let (store, service) = setup();
	store.fail_subscriptions(Some(RemoteError::Unavailable("offline".into())));
	let ada = service.get::<RecordHandle<Profile>>(&["ada"]).unwrap();
	let _changes = changes(&ada, CHANGE);
	let disconnects = changes(&ada, DISCONNECT);
	service.scheduler().run_until_idle();

	assert_eq!(
		*disconnects.borrow(),
		vec![RecordEvent::Disconnect(Error::Subscription(RemoteError::Unavailable("offline".into())))]
	);
	assert!(ada.is_active());
	assert_eq!(store.listener_count(), 0);
}
