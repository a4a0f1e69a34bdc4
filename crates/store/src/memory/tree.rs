//! Path operations over a JSON tree.
//!
//! Objects are interior nodes. Anything else is a leaf. Null and empty objects do not exist:
//! writing them removes the node and prunes parents that become empty.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::Priority;

pub(super) type Path = Vec<String>;

/// Splits a slash-separated path, ignoring empty segments.
pub(super) fn parse_path(path: &str) -> Path {
	path.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

pub(super) fn render_path(path: &[String]) -> String {
	format!("/{}", path.join("/"))
}

pub(super) fn get<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
	path.iter().try_fold(root, |node, segment| match node {
		Value::Object(map) => map.get(segment),
		Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
		_ => None,
	})
}

pub(super) fn value_at(root: &Value, path: &[String]) -> Value {
	get(root, path).cloned().unwrap_or(Value::Null)
}

/// Stores `value` at `path`, creating interior objects along the way.
pub(super) fn set(root: &mut Value, path: &[String], value: Value) {
	let value = normalize(value);
	if value.is_null() {
		remove(root, path);
		return;
	}
	let Some((last, parents)) = path.split_last() else {
		*root = value;
		return;
	};
	let mut node = root;
	for segment in parents {
		node = object_mut(node).entry(segment.clone()).or_insert(Value::Null);
	}
	object_mut(node).insert(last.clone(), value);
}

fn remove(node: &mut Value, path: &[String]) {
	let Some((first, rest)) = path.split_first() else {
		*node = Value::Null;
		return;
	};
	let Value::Object(map) = node else {
		return;
	};
	if rest.is_empty() {
		map.shift_remove(first);
	} else if let Some(child) = map.get_mut(first) {
		remove(child, rest);
		if child.is_null() {
			map.shift_remove(first);
		}
	}
	if map.is_empty() {
		*node = Value::Null;
	}
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
	if !node.is_object() {
		*node = Value::Object(Map::new());
	}
	match node {
		Value::Object(map) => map,
		_ => unreachable!("node was just replaced by an object"),
	}
}

fn normalize(value: Value) -> Value {
	match value {
		Value::Object(map) => {
			let map: Map<String, Value> = map
				.into_iter()
				.map(|(k, v)| (k, normalize(v)))
				.filter(|(_, v)| !v.is_null())
				.collect();
			if map.is_empty() { Value::Null } else { Value::Object(map) }
		}
		other => other,
	}
}

/// Drops the priority of `path` and of everything below it.
pub(super) fn clear_priorities(priorities: &mut HashMap<Path, Priority>, path: &[String]) {
	priorities.retain(|p, _| !p.starts_with(path));
}

/// Integer-like keys sort numerically and before every other key.
pub(super) fn compare_keys(a: &str, b: &str) -> Ordering {
	match (a.parse::<i64>(), b.parse::<i64>()) {
		(Ok(x), Ok(y)) => x.cmp(&y),
		(Ok(_), Err(_)) => Ordering::Less,
		(Err(_), Ok(_)) => Ordering::Greater,
		(Err(_), Err(_)) => a.cmp(b),
	}
}

/// Child keys of the node at `path`, ordered by priority then key.
pub(super) fn ordered_children(root: &Value, priorities: &HashMap<Path, Priority>, path: &[String]) -> Vec<String> {
	let Some(Value::Object(map)) = get(root, path) else {
		return Vec::new();
	};
	let mut keyed: Vec<(&String, Option<&Priority>)> = map
		.keys()
		.map(|key| {
			let mut child = path.to_vec();
			child.push(key.clone());
			(key, priorities.get(&child))
		})
		.collect();
	keyed.sort_by(|(ka, pa), (kb, pb)| Priority::compare(*pa, *pb).then_with(|| compare_keys(ka, kb)));
	keyed.into_iter().map(|(k, _)| k.clone()).collect()
}
