use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Single-threaded FIFO of deferred tasks.
///
/// This is the "next tick" of the handle layer: work posted with [`Scheduler::defer`] never
/// runs inside the call that posted it, only when the owner of the event loop drains the
/// queue with [`Scheduler::run_until_idle`]. Clones share one queue.
#[derive(Clone, Default)]
pub struct Scheduler {
	queue: Rc<RefCell<VecDeque<Task>>>,
}

impl fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler").field("pending", &self.pending()).finish()
	}
}

impl Scheduler {
	/// Creates an empty scheduler.
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues `task` to run on a later tick.
	pub fn defer(&self, task: impl FnOnce() + 'static) {
		self.queue.borrow_mut().push_back(Box::new(task));
	}

	/// Number of queued tasks.
	pub fn pending(&self) -> usize {
		self.queue.borrow().len()
	}

	/// Returns `true` when nothing is queued.
	pub fn is_idle(&self) -> bool {
		self.queue.borrow().is_empty()
	}

	/// Runs exactly one queued task, returning whether one ran.
	pub fn run_one(&self) -> bool {
		// The borrow must end before the task runs: tasks routinely defer more work.
		let task = self.queue.borrow_mut().pop_front();
		match task {
			Some(task) => {
				task();
				true
			}
			None => false,
		}
	}

	/// Drains the queue, including tasks queued while draining. Returns how many ran.
	pub fn run_until_idle(&self) -> usize {
		let mut ran = 0;
		while self.run_one() {
			ran += 1;
		}
		ran
	}
}
