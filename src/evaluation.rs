//! The stack of evaluation frames.
//!
//! While a computed runs its read function it sits on top of this stack and
//! every observable read in the meantime is reported to it. An empty frame
//! on top suppresses detection; [`ignore`] pushes one.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::{Dependency, NodeId, Tracker};

pub(crate) struct Frame {
	pub(crate) tracker: Rc<dyn Tracker>,
	pub(crate) is_initial: Option<bool>,
}

thread_local! {
	static FRAMES: RefCell<Vec<Option<Frame>>> = const { RefCell::new(Vec::new()) };
	static LAST_ID: Cell<u64> = const { Cell::new(0) };
}

/// Pops the frame it was created for when dropped.
pub struct FrameGuard {
	// Frames belong to the thread that pushed them.
	_not_send: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
	fn drop(&mut self) {
		FRAMES.with(|frames| {
			frames.borrow_mut().pop();
		});
	}
}

pub(crate) fn begin(frame: Option<Frame>) -> FrameGuard {
	FRAMES.with(|frames| frames.borrow_mut().push(frame));
	FrameGuard {
		_not_send: PhantomData,
	}
}

/// Push a frame that swallows every dependency read until the guard drops.
pub fn suppress() -> FrameGuard {
	begin(None)
}

/// Run `func` without recording any dependency.
pub fn ignore<R>(func: impl FnOnce() -> R) -> R {
	let _frame = suppress();
	func()
}

pub(crate) fn next_id() -> NodeId {
	LAST_ID.with(|last| {
		let id = last.get() + 1;
		last.set(id);
		NodeId(id)
	})
}

fn current_tracker() -> Option<Rc<dyn Tracker>> {
	FRAMES.with(|frames| {
		frames
			.borrow()
			.last()
			.and_then(|frame| frame.as_ref())
			.map(|frame| frame.tracker.clone())
	})
}

/// Reports `dependency` to the frame on top of the stack. Reads outside of
/// any evaluation are not tracked.
pub(crate) fn register_dependency(dependency: Rc<dyn Dependency>) {
	if let Some(tracker) = current_tracker() {
		let id = dependency.id();
		tracker.based_on(dependency, id);
	}
}

/// Whether reads made right now are being recorded.
pub fn is_tracking() -> bool {
	current_tracker().is_some()
}

/// `Some(true)` during the first evaluation of a non-pure computed.
pub fn is_initial() -> Option<bool> {
	FRAMES.with(|frames| {
		frames
			.borrow()
			.last()
			.and_then(|frame| frame.as_ref())
			.and_then(|frame| frame.is_initial)
	})
}

/// Number of dependencies the evaluating computed has recorded so far.
pub fn dependencies_count() -> Option<usize> {
	current_tracker().map(|tracker| tracker.dependencies_count())
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Counter(Cell<usize>);

	impl Tracker for Counter {
		fn based_on(&self, _: Rc<dyn Dependency>, _: NodeId) {
			self.0.set(self.0.get() + 1);
		}

		fn dependencies_count(&self) -> usize {
			self.0.get()
		}
	}

	#[test]
	fn frames_pop_on_drop() {
		let counter = Rc::new(Counter(Cell::new(0)));
		assert!(!is_tracking());
		{
			let _frame = begin(Some(Frame {
				tracker: counter.clone(),
				is_initial: Some(true),
			}));
			assert!(is_tracking());
			assert_eq!(is_initial(), Some(true));
			ignore(|| {
				assert!(!is_tracking());
				assert_eq!(dependencies_count(), None);
			});
			assert_eq!(dependencies_count(), Some(0));
		}
		assert!(!is_tracking());
		assert_eq!(is_initial(), None);
	}

	#[test]
	fn ids_increase() {
		let a = next_id();
		let b = next_id();
		assert!(b > a);
	}
}
