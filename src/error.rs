//! Crate error type and the error channel for failures that have no caller
//! to return to.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("a computed needs a read function that returns its value")]
	MissingReadFunction,
	#[error("cannot write a value to a computed without a write function")]
	ReadOnly,
	#[error("too much recursion after processing {groups} task groups")]
	TooMuchRecursion { groups: usize },
	#[error("scheduled task panicked: {0}")]
	TaskPanicked(String),
}

type Handler = Rc<dyn Fn(&Error)>;

thread_local! {
	static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

/// Route asynchronous errors to `handler` instead of the log.
pub fn set_error_handler(handler: impl Fn(&Error) + 'static) {
	HANDLER.with(|current| *current.borrow_mut() = Some(Rc::new(handler)));
}

pub fn clear_error_handler() {
	HANDLER.with(|current| *current.borrow_mut() = None);
}

pub(crate) fn report(error: Error) {
	let handler = HANDLER.with(|current| current.borrow().clone());
	match handler {
		Some(handler) => handler(&error),
		None => tracing::error!(%error, "reactive task failed"),
	}
}
