use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::node::Node;
use crate::subscription::Listeners;

/// The value a limited node will publish once its policy flushes.
pub(crate) enum PendingValue<T> {
	Snapshot(T),
	/// Read the node again at flush time instead of capturing a value now.
	/// Deferred computeds use this to postpone their own evaluation.
	DeferredSelf,
}

impl<T> From<T> for PendingValue<T> {
	fn from(value: T) -> Self {
		PendingValue::Snapshot(value)
	}
}

struct LimitState<T: 'static> {
	ignore_before_change: bool,
	notify_next_change: bool,
	did_update: bool,
	previous: Option<T>,
	pending: Option<PendingValue<T>>,
	change_snapshot: Option<Listeners<T>>,
}

/// Sits between a node and its change subscribers and decides, through a
/// policy, when a pending value is actually published.
pub(crate) struct Limiter<T: 'static> {
	node: Weak<Node<T>>,
	finish: RefCell<Option<Box<dyn Fn()>>>,
	state: RefCell<LimitState<T>>,
}

impl<T> Limiter<T>
where
	T: Clone + 'static,
{
	pub(crate) fn new(node: Weak<Node<T>>, policy: impl FnOnce(Rc<dyn Fn()>) -> Box<dyn Fn()>) -> Rc<Self> {
		let limiter = Rc::new(Limiter {
			node,
			finish: RefCell::new(None),
			state: RefCell::new(LimitState {
				ignore_before_change: false,
				notify_next_change: false,
				did_update: false,
				previous: None,
				pending: None,
				change_snapshot: None,
			}),
		});

		let weak = Rc::downgrade(&limiter);
		let flush: Rc<dyn Fn()> = Rc::new(move || {
			if let Some(limiter) = weak.upgrade() {
				limiter.flush()
			}
		});

		*limiter.finish.borrow_mut() = Some(policy(flush));
		limiter
	}

	pub(crate) fn limit_change(&self, value: PendingValue<T>, is_dirty: bool) {
		let Some(node) = self.node.upgrade() else {
			return;
		};

		{
			let mut state = self.state.borrow_mut();
			if !is_dirty || !node.notification_pending.get() {
				state.did_update = !is_dirty;
			}
			state.change_snapshot = Some(node.change_listeners());
			state.ignore_before_change = true;
			state.pending = Some(value);
		}
		node.notification_pending.set(true);

		if let Some(finish) = &*self.finish.borrow() {
			finish()
		}
	}

	pub(crate) fn limit_before_change(&self, value: &T) {
		let forward = {
			let mut state = self.state.borrow_mut();
			if state.ignore_before_change {
				false
			} else {
				state.previous = Some(value.clone());
				true
			}
		};

		if forward {
			if let Some(node) = self.node.upgrade() {
				node.notify_original(Some(value), crate::Event::BeforeChange);
			}
		}
	}

	pub(crate) fn record_update(&self) {
		self.state.borrow_mut().did_update = true;
	}

	pub(crate) fn take_snapshot(&self) -> Option<Listeners<T>> {
		self.state.borrow_mut().change_snapshot.take()
	}

	pub(crate) fn notify_next_change_if_value_is_different(&self) {
		let Some(node) = self.node.upgrade() else {
			return;
		};

		let Some(current) = node.peek_evaluate(true) else {
			return;
		};

		let previous = self.state.borrow().previous.clone();
		if node.is_different(previous.as_ref(), &current) {
			self.state.borrow_mut().notify_next_change = true;
		}
	}

	fn flush(&self) {
		let Some(node) = self.node.upgrade() else {
			return;
		};

		node.notification_pending.set(false);

		let pending = self.state.borrow_mut().pending.take();
		let value = match pending {
			Some(PendingValue::Snapshot(value)) => Some(value),
			Some(PendingValue::DeferredSelf) => node.eval_if_changed(),
			None => None,
		};

		let (should_notify, previous) = {
			let mut state = self.state.borrow_mut();
			let previous = state.previous.clone();
			let changed = match &value {
				Some(value) => state.did_update && node.is_different(previous.as_ref(), value),
				None => false,
			};
			let should_notify = state.notify_next_change || changed;

			state.did_update = false;
			state.notify_next_change = false;
			state.ignore_before_change = false;

			(should_notify, previous)
		};

		tracing::trace!(
			node = ?crate::Dependency::id(&*node),
			notify = should_notify,
			had_previous = previous.is_some(),
			"limiter flush"
		);

		if let (true, Some(value)) = (should_notify, value) {
			self.state.borrow_mut().previous = Some(value.clone());
			node.notify_original(Some(&value), crate::Event::Change);
		}
	}
}
