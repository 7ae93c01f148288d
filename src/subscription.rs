use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::computed::Resource;

/// Handle to a registered callback.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::dispose`] to remove it. A disposed subscription is inert
/// and cannot be revived.
#[derive(Clone)]
pub struct Subscription {
	state: Rc<SubscriptionState>,
}

pub(crate) struct SubscriptionState {
	disposed: Cell<bool>,
	on_dispose: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl SubscriptionState {
	pub(crate) fn is_disposed(&self) -> bool {
		self.disposed.get()
	}
}

impl Subscription {
	/// `on_dispose` receives a weak handle to the subscription state so the
	/// owner can find and remove its own entry.
	pub(crate) fn new(on_dispose: impl FnOnce(Weak<SubscriptionState>) -> Box<dyn FnOnce()>) -> Self {
		let state = Rc::new(SubscriptionState {
			disposed: Cell::new(false),
			on_dispose: RefCell::new(None),
		});

		let callback = on_dispose(Rc::downgrade(&state));
		*state.on_dispose.borrow_mut() = Some(callback);

		Subscription { state }
	}

	pub(crate) fn state(&self) -> &Rc<SubscriptionState> {
		&self.state
	}

	pub fn dispose(&self) {
		if self.state.disposed.replace(true) {
			return;
		}

		let callback = self.state.on_dispose.borrow_mut().take();
		if let Some(callback) = callback {
			callback();
		}
	}

	#[inline]
	pub fn is_disposed(&self) -> bool {
		self.state.is_disposed()
	}

	/// Dispose this subscription once `resource` reports it was detached.
	pub fn dispose_when_detached(&self, resource: &dyn Resource) {
		let this = self.clone();
		resource.on_detach(Box::new(move || this.dispose()));
	}
}

impl Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

pub(crate) type Callback<P> = Rc<dyn Fn(Option<&P>)>;

pub(crate) struct Listener<P: 'static> {
	state: Rc<SubscriptionState>,
	callback: Callback<P>,
}

impl<P> Clone for Listener<P> {
	fn clone(&self) -> Self {
		Listener {
			state: self.state.clone(),
			callback: self.callback.clone(),
		}
	}
}

impl<P> Listener<P> {
	pub(crate) fn new(subscription: &Subscription, callback: Callback<P>) -> Self {
		Listener {
			state: subscription.state().clone(),
			callback,
		}
	}

	/// Subscriptions disposed while a delivery is running are skipped.
	pub(crate) fn invoke(&self, value: Option<&P>) {
		if !self.state.is_disposed() {
			(self.callback)(value)
		}
	}

	pub(crate) fn belongs_to(&self, state: &Weak<SubscriptionState>) -> bool {
		std::ptr::eq(Rc::as_ptr(&self.state), state.as_ptr())
	}
}

/// Ordered list of callbacks for a single event.
pub(crate) type Listeners<P> = SmallVec<[Listener<P>; 2]>;

/// Split the listeners of `state` out of `list`.
///
/// Callers must release their borrow of `list` before dropping the result:
/// a callback may own the last handle of a computed that unsubscribes from
/// the same list when it drops.
pub(crate) fn take_listeners<P: 'static>(list: &mut Listeners<P>, state: &Weak<SubscriptionState>) -> Listeners<P> {
	let (removed, kept): (Listeners<P>, Listeners<P>) =
		std::mem::take(list).into_iter().partition(|listener| listener.belongs_to(state));
	*list = kept;
	removed
}

pub(crate) fn deliver<P>(listeners: &[Listener<P>], value: Option<&P>) {
	for listener in listeners {
		listener.invoke(value)
	}
}
