use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::limit::Limiter;
use crate::node::{Node, Variant};
use crate::platform::{self, TimerId};
use crate::tasks::{self, TaskHandle};
use crate::Event;

/// Behaviors that can be attached to an observable or computed after
/// construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extender {
	/// Publish changes at most once per timer window.
	RateLimit(RateLimit),
	/// Publish changes at most once per task-queue turn. Cannot be undone.
	Deferred,
	Notify(NotifyWhen),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
	pub timeout: Duration,
	pub method: RateLimitMethod,
}

impl RateLimit {
	pub fn throttle(timeout: Duration) -> Self {
		RateLimit {
			timeout,
			method: RateLimitMethod::Throttle,
		}
	}

	pub fn debounce(timeout: Duration) -> Self {
		RateLimit {
			timeout,
			method: RateLimitMethod::NotifyWhenChangesStop,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMethod {
	/// First request arms a timer; later requests ride along.
	#[default]
	Throttle,
	/// Every request restarts the timer.
	NotifyWhenChangesStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyWhen {
	/// Notify on every write, even when the value is equal.
	Always,
	/// Restore the comparer the node was created with.
	Changed,
}

pub(crate) fn throttle(flush: Rc<dyn Fn()>, timeout: Duration) -> Box<dyn Fn()> {
	let timer: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
	Box::new(move || {
		if timer.get().is_none() {
			let armed = timer.clone();
			let flush = flush.clone();
			let id = platform::current().set_timeout(
				timeout,
				Box::new(move || {
					armed.set(None);
					flush();
				}),
			);
			timer.set(Some(id));
		}
	})
}

pub(crate) fn debounce(flush: Rc<dyn Fn()>, timeout: Duration) -> Box<dyn Fn()> {
	let timer: Cell<Option<TimerId>> = Cell::new(None);
	Box::new(move || {
		let platform = platform::current();
		if let Some(id) = timer.take() {
			platform.clear_timeout(id);
		}
		let flush = flush.clone();
		timer.set(Some(platform.set_timeout(timeout, Box::new(move || flush()))));
	})
}

fn deferred<T>(node: Weak<Node<T>>, flush: Rc<dyn Fn()>) -> Box<dyn Fn()>
where
	T: Clone + 'static,
{
	let scheduled: Rc<Cell<Option<TaskHandle>>> = Rc::new(Cell::new(None));
	let ignore_updates = Rc::new(Cell::new(false));

	Box::new(move || {
		if ignore_updates.get() {
			return;
		}

		if !scheduled.get().is_some_and(tasks::is_pending) {
			let slot = scheduled.clone();
			let flush = flush.clone();
			scheduled.set(Some(tasks::schedule(move || {
				slot.set(None);
				flush();
			})));
		}

		if let Some(node) = node.upgrade() {
			ignore_updates.set(true);
			let _reset = ResetOnDrop(&ignore_updates);
			node.notify_original(None, Event::Dirty);
		}
	})
}

struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
	fn drop(&mut self) {
		self.0.set(false);
	}
}

impl<T> Node<T>
where
	T: Clone + 'static,
{
	pub(crate) fn limit(&self, policy: impl FnOnce(Rc<dyn Fn()>) -> Box<dyn Fn()>) {
		let limiter = Limiter::new(self.this.clone(), policy);
		*self.limiter.borrow_mut() = Some(limiter);

		if let Variant::Computed(state) = &self.variant {
			state.eval_delayed.set(true);
		}
	}

	pub(crate) fn extend(&self, extender: Extender) {
		match extender {
			Extender::RateLimit(RateLimit { timeout, method }) => {
				self.deferred.set(false);
				match method {
					RateLimitMethod::Throttle => self.limit(|flush| throttle(flush, timeout)),
					RateLimitMethod::NotifyWhenChangesStop => self.limit(|flush| debounce(flush, timeout)),
				}
			}
			Extender::Deferred => {
				if !self.deferred.replace(true) {
					let node = self.this.clone();
					self.limit(move |flush| deferred(node, flush));
				}
			}
			Extender::Notify(NotifyWhen::Always) => {
				*self.comparer.borrow_mut() = None;
			}
			Extender::Notify(NotifyWhen::Changed) => {
				*self.comparer.borrow_mut() = self.default_comparer.clone();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;
	use std::rc::Rc;
	use std::time::Duration;

	use super::*;
	use crate::platform::ManualPlatform;

	fn counter() -> (Rc<Cell<usize>>, Rc<dyn Fn()>) {
		let count = Rc::new(Cell::new(0));
		let flush: Rc<dyn Fn()> = Rc::new({
			let count = count.clone();
			move || count.set(count.get() + 1)
		});
		(count, flush)
	}

	#[test]
	fn throttle_coalesces_requests() {
		let platform = ManualPlatform::install();
		let (count, flush) = counter();
		let request = throttle(flush, Duration::from_millis(50));

		request();
		platform.advance(Duration::from_millis(20));
		request();
		request();
		assert_eq!(count.get(), 0);

		platform.advance(Duration::from_millis(30));
		assert_eq!(count.get(), 1);

		request();
		platform.advance(Duration::from_millis(50));
		assert_eq!(count.get(), 2);
	}

	#[test]
	fn debounce_waits_for_quiet() {
		let platform = ManualPlatform::install();
		let (count, flush) = counter();
		let request = debounce(flush, Duration::from_millis(50));

		request();
		platform.advance(Duration::from_millis(40));
		request();
		platform.advance(Duration::from_millis(40));
		assert_eq!(count.get(), 0);

		platform.advance(Duration::from_millis(10));
		assert_eq!(count.get(), 1);
	}
}
