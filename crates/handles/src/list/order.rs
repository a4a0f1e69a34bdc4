//! Order bookkeeping shared by the list handles.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

/// Keys in list order plus the child handle mapped to each key.
///
/// Every key in `order` has exactly one entry in `children` and vice versa.
pub(crate) struct ChildOrder<C> {
	order: Vec<String>,
	children: HashMap<String, Rc<C>>,
}

impl<C> Default for ChildOrder<C> {
	fn default() -> Self {
		Self {
			order: Vec::new(),
			children: HashMap::new(),
		}
	}
}

impl<C> ChildOrder<C> {
	/// Position right after `prev`. A missing or unknown anchor means the head.
	fn slot_after(&self, prev: Option<&str>) -> usize {
		prev.and_then(|prev| self.order.iter().position(|k| k == prev))
			.map_or(0, |i| i + 1)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.children.contains_key(key)
	}

	/// Inserts a new `key` right after `prev`. `key` must not be present.
	pub fn insert_after(&mut self, prev: Option<&str>, key: &str, child: Rc<C>) {
		debug_assert!(!self.contains(key), "duplicate key {key}");
		let at = self.slot_after(prev);
		self.order.insert(at, key.to_owned());
		self.children.insert(key.to_owned(), child);
	}

	pub fn remove(&mut self, key: &str) -> Option<Rc<C>> {
		let child = self.children.remove(key)?;
		self.order.retain(|k| k != key);
		Some(child)
	}

	/// Moves `key` right after `prev`, keeping its child. Returns `false` if `key` is absent.
	pub fn move_after(&mut self, prev: Option<&str>, key: &str) -> bool {
		let Some(from) = self.order.iter().position(|k| k == key) else {
			return false;
		};
		let key = self.order.remove(from);
		let at = self.slot_after(prev);
		self.order.insert(at, key);
		true
	}

	pub fn keys(&self) -> &[String] {
		&self.order
	}

	pub fn get(&self, key: &str) -> Option<Rc<C>> {
		self.children.get(key).cloned()
	}

	/// Children in list order.
	pub fn data(&self) -> Vec<Rc<C>> {
		self.order.iter().filter_map(|k| self.children.get(k).cloned()).collect()
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	/// Empties the order, returning the children in list order.
	pub fn drain(&mut self) -> Vec<Rc<C>> {
		let children = self.data();
		self.order.clear();
		self.children.clear();
		children
	}
}

/// Key of one index entry: a string, a number, or an object carrying `key_field`.
pub(crate) fn entry_key(entry: &Value, key_field: &str) -> Option<String> {
	match entry {
		Value::String(key) => Some(key.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Object(map) => match map.get(key_field)? {
			Value::String(key) => Some(key.clone()),
			Value::Number(n) => Some(n.to_string()),
			_ => None,
		},
		_ => None,
	}
}

/// Ordered keys of an index blob.
///
/// Arrays yield the key of each entry; objects yield their own keys in stored order; anything
/// else is an empty index.
pub(crate) fn index_keys(value: &Value, key_field: &str) -> Vec<String> {
	match value {
		Value::Array(entries) => entries.iter().filter_map(|e| entry_key(e, key_field)).collect(),
		Value::Object(map) => map.keys().cloned().collect(),
		_ => Vec::new(),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
	Before,
	After,
}

/// Proposed index after moving `moved` next to `reference`, or `None` to abort.
///
/// `moved` is taken out first, keeping its entry if it had one. Aborts when the index is not
/// an array or `reference` is not in it afterwards.
pub(crate) fn propose_move(
	current: &Value,
	moved: &str,
	reference: &str,
	placement: Placement,
	key_field: &str,
) -> Option<Value> {
	let Value::Array(entries) = current else {
		return None;
	};
	let mut entries = entries.clone();
	let is = |entry: &Value, key: &str| entry_key(entry, key_field).as_deref() == Some(key);

	let moved_entry = entries.iter().position(|e| is(e, moved)).map(|i| entries.remove(i));
	let at = entries.iter().position(|e| is(e, reference))?;
	let at = match placement {
		Placement::Before => at,
		Placement::After => at + 1,
	};
	entries.insert(at, moved_entry.unwrap_or_else(|| Value::String(moved.to_owned())));
	Some(Value::Array(entries))
}
