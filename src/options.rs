//! Per-thread configuration.

use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
	/// Create every observable and computed with deferred notifications.
	pub defer_updates: bool,
	/// How many generations of tasks may schedule further tasks within one
	/// drain of the task queue before it is aborted.
	pub max_task_groups: usize,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			defer_updates: false,
			max_task_groups: 5000,
		}
	}
}

thread_local! {
	static OPTIONS: RefCell<Option<Options>> = const { RefCell::new(None) };
}

pub fn get() -> Options {
	OPTIONS.with(|options| options.borrow().clone().unwrap_or_default())
}

pub fn set(options: Options) {
	OPTIONS.with(|current| *current.borrow_mut() = Some(options));
}

pub fn update(func: impl FnOnce(&mut Options)) {
	let mut options = get();
	func(&mut options);
	set(options);
}
