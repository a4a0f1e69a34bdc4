//! Stream lists driven end to end by the in-memory store.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_handles::events::{ADDED, CHANGE, REMOVED};
use tether_handles::{
	Handle, ListEvent, ListSchema, RecordHandle, Refs, Service, ServiceConfig, StreamListHandle, callback,
};
use tether_store::{MemoryStore, Priority, Reference, Scheduler};

struct Messages;

impl ListSchema for Messages {
	type Child = RecordHandle;
}

type Room = StreamListHandle<Messages>;

fn setup() -> (MemoryStore, Service) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let scheduler = Scheduler::new();
	let store = MemoryStore::new(scheduler.clone());
	let service = Service::new(scheduler, ServiceConfig::default());
	service.register::<Room>(Refs::new(store.root()).resolver(&["rooms"]));
	(store, service)
}

fn log_events(room: &Room) -> Rc<RefCell<Vec<String>>> {
	let log: Rc<RefCell<Vec<String>>> = Rc::default();
	for event in [ADDED, REMOVED, CHANGE] {
		let sink = log.clone();
		room.on(
			event,
			callback(move |e: &ListEvent<RecordHandle>| {
				let line = match e {
					ListEvent::Added(entry) => format!("+{}", entry.key),
					ListEvent::Removed(key) => format!("-{key}"),
					ListEvent::Change(children) => {
						children.iter().filter_map(|c| c.id()).collect::<Vec<_>>().join(",")
					}
					other => format!("{other:?}"),
				};
				sink.borrow_mut().push(line);
			}),
		)
		.unwrap();
	}
	log
}

#[tokio::test]
async fn follows_priority_order_through_inserts_moves_and_removals() {
	let (store, service) = setup();
	store
		.reference("rooms/lobby/a")
		.write(json!({ "text": "first" }), Some(Priority::from(2.0)))
		.await
		.unwrap();
	store
		.reference("rooms/lobby/b")
		.write(json!({ "text": "second" }), Some(Priority::from(1.0)))
		.await
		.unwrap();

	let room = service.get::<Room>(&["lobby"]).unwrap();
	let log = log_events(&room);
	service.scheduler().run_until_idle();
	assert_eq!(room.keys(), ["b", "a"]);

	store
		.reference("rooms/lobby/c")
		.write(json!({ "text": "third" }), Some(Priority::from(0.0)))
		.await
		.unwrap();
	service.scheduler().run_until_idle();
	assert_eq!(room.keys(), ["c", "b", "a"]);

	store
		.reference("rooms/lobby/a")
		.write(json!({ "text": "first" }), Some(Priority::from(0.5)))
		.await
		.unwrap();
	service.scheduler().run_until_idle();
	assert_eq!(room.keys(), ["c", "a", "b"]);

	store.reference("rooms/lobby/b").delete().await.unwrap();
	service.scheduler().run_until_idle();
	assert_eq!(room.keys(), ["c", "a"]);
	// three child streams plus the value streams of "c" and "a"
	assert_eq!(store.listener_count(), 5);

	assert_eq!(
		*log.borrow(),
		vec!["+b", "b", "+a", "b,a", "+c", "c,b,a", "c,a,b", "-b", "c,a"]
	);
	assert_eq!(room.get("a").unwrap().context().reference().path(), "/rooms/lobby/a");
}

#[tokio::test]
async fn session_end_releases_every_subscription() {
	let (store, service) = setup();
	let room = service.get::<Room>(&["lobby"]).unwrap();
	let _log = log_events(&room);
	service.scheduler().run_until_idle();
	assert_eq!(store.listener_count(), 3);

	service.off();
	assert_eq!(store.listener_count(), 0);
	assert!(!room.is_active());

	store
		.reference("rooms/lobby/late")
		.write(json!(true), None)
		.await
		.unwrap();
	service.scheduler().run_until_idle();
	assert!(room.is_empty());
}

#[tokio::test]
async fn notifications_queued_before_teardown_are_dropped() {
	let (store, service) = setup();
	let room = service.get::<Room>(&["lobby"]).unwrap();
	let log = log_events(&room);
	service.scheduler().run_until_idle();

	store.reference("rooms/lobby/x").write(json!(1), None).await.unwrap();
	room.destroy();
	service.scheduler().run_until_idle();

	assert!(log.borrow().is_empty());
	assert!(room.is_empty());
	assert_eq!(store.listener_count(), 0);
}
