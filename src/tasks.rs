//! FIFO micro-task queue used to coalesce deferred notifications.
//!
//! The first task scheduled into an empty queue arms a platform microtask
//! that drains the queue on the next turn. Tasks scheduled while the queue
//! drains run in the same turn, grouped into generations; too many
//! generations abort the drain and report [`Error::TooMuchRecursion`].

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{self, Error};
use crate::{options, platform};

type Task = Box<dyn FnOnce()>;

/// Identifies a scheduled task for [`cancel`].
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TaskHandle(u64);

struct TaskQueue {
	queue: Vec<Option<Task>>,
	next_index_to_process: usize,
	next_handle: u64,
}

thread_local! {
	static TASKS: RefCell<TaskQueue> = const {
		RefCell::new(TaskQueue {
			queue: Vec::new(),
			next_index_to_process: 0,
			next_handle: 1,
		})
	};
}

/// Append `task` to the queue.
pub fn schedule(task: impl FnOnce() + 'static) -> TaskHandle {
	let (handle, arm) = TASKS.with(|tasks| {
		let mut tasks = tasks.borrow_mut();
		let arm = tasks.queue.is_empty();
		tasks.queue.push(Some(Box::new(task)));

		let handle = TaskHandle(tasks.next_handle);
		tasks.next_handle += 1;
		(handle, arm)
	});

	if arm {
		platform::current().queue_microtask(Box::new(scheduled_process));
	}

	handle
}

/// Drop a task that has not run yet. Unknown, finished or already
/// canceled handles are ignored.
pub fn cancel(handle: TaskHandle) {
	TASKS.with(|tasks| {
		let mut tasks = tasks.borrow_mut();
		let first = tasks.next_handle - tasks.queue.len() as u64;
		if handle.0 < first {
			return;
		}

		let index = (handle.0 - first) as usize;
		if index >= tasks.next_index_to_process && index < tasks.queue.len() {
			tasks.queue[index] = None;
		}
	})
}

/// Whether `handle` is still waiting to run. Tasks thrown away by a
/// recursion overflow or a reset are no longer pending.
pub(crate) fn is_pending(handle: TaskHandle) -> bool {
	TASKS.with(|tasks| {
		let tasks = tasks.borrow();
		let first = tasks.next_handle - tasks.queue.len() as u64;
		if handle.0 < first {
			return false;
		}

		let index = (handle.0 - first) as usize;
		index >= tasks.next_index_to_process && tasks.queue.get(index).is_some_and(Option::is_some)
	})
}

/// Run every pending task now instead of waiting for the platform.
pub fn run_pending_now() {
	process_tasks()
}

/// Number of tasks waiting to run.
pub fn pending() -> usize {
	TASKS.with(|tasks| {
		let tasks = tasks.borrow();
		tasks.queue[tasks.next_index_to_process..]
			.iter()
			.filter(|task| task.is_some())
			.count()
	})
}

/// Forget every queued task. Returns how many were still waiting.
pub fn reset_for_testing() -> usize {
	TASKS.with(|tasks| {
		let mut tasks = tasks.borrow_mut();
		let waiting = tasks.queue.len() - tasks.next_index_to_process;
		tasks.queue.clear();
		tasks.next_index_to_process = 0;
		waiting
	})
}

fn scheduled_process() {
	process_tasks();

	TASKS.with(|tasks| {
		let mut tasks = tasks.borrow_mut();
		tasks.queue.clear();
		tasks.next_index_to_process = 0;
	});
	tracing::debug!("task queue reset");
}

enum Next {
	Run(Task),
	Skip,
	Overflow(usize),
	Done,
}

fn process_tasks() {
	let max_groups = options::get().max_task_groups;

	let mut mark = TASKS.with(|tasks| tasks.borrow().queue.len());
	let mut groups = 0;

	loop {
		let next = TASKS.with(|tasks| {
			let mut tasks = tasks.borrow_mut();
			let length = tasks.queue.len();
			if tasks.next_index_to_process >= length {
				return Next::Done;
			}

			let index = tasks.next_index_to_process;
			tasks.next_index_to_process += 1;

			let Some(task) = tasks.queue[index].take() else {
				return Next::Skip;
			};

			if tasks.next_index_to_process > mark {
				groups += 1;
				if groups >= max_groups {
					// Anything left may be what keeps rescheduling itself.
					tasks.next_index_to_process = length;
					return Next::Overflow(groups);
				}
				mark = length;
			}

			Next::Run(task)
		});

		match next {
			Next::Run(task) => {
				if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
					error::report(Error::TaskPanicked(panic_message(payload.as_ref())));
				}
			}
			Next::Skip => {}
			Next::Overflow(groups) => {
				error::report(Error::TooMuchRecursion { groups });
				break;
			}
			Next::Done => break,
		}
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
