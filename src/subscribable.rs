use std::rc::Rc;

use crate::{Extender, NodeId, NodeRef, Subscription};

/// Topics a node publishes on.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Event {
	/// The value changed. Bumps the version.
	Change,
	/// The value is about to change; carries the old value.
	BeforeChange,
	/// Internal change feed used by change trackers, emitted even when the
	/// change notification itself is batched.
	Spectate,
	/// A computed settled its first value or a pure computed woke up.
	Awake,
	/// A pure computed released its dependencies. Carries no value.
	Asleep,
	/// A deferred node will change on a later turn. Carries no value.
	Dirty,
}

/// Operations shared by every node that can be subscribed to.
pub trait Subscribable<T: 'static> {
	fn id(&self) -> NodeId;

	/// Type-erased handle to this node.
	fn node_ref(&self) -> NodeRef;

	/// Subscribe to [`Event::Change`].
	fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
		self.subscribe_to(Event::Change, callback)
	}

	/// Subscribe to a value carrying event. Events without a value never
	/// reach `callback`; use [`Subscribable::on`] for those.
	fn subscribe_to(&self, event: Event, callback: impl Fn(&T) + 'static) -> Subscription;

	/// Subscribe to any event, ignoring its value.
	fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription;

	fn notify_subscribers(&self, value: Option<&T>, event: Event);

	fn version(&self) -> u64;

	fn has_changed(&self, version: u64) -> bool {
		self.version() != version
	}

	/// Number of live subscriptions for `event`, or for all events.
	fn subscriptions_count(&self, event: Option<Event>) -> usize;

	fn has_subscriptions_for(&self, event: Event) -> bool;

	/// Route change notifications through a batching policy.
	///
	/// `policy` receives the flush callback and returns the closure that is
	/// invoked every time a change is pending. Installing a new policy
	/// replaces the previous one.
	fn limit(&self, policy: impl FnOnce(Rc<dyn Fn()>) -> Box<dyn Fn()>);

	fn extend(&self, extender: Extender) -> &Self;
}

macro_rules! impl_subscribable {
	($ty:ident, $($bound:tt)*) => {
		impl<T> $crate::Subscribable<T> for $ty<T>
		where
			T: $($bound)*,
		{
			#[inline]
			fn id(&self) -> $crate::NodeId {
				$crate::Dependency::id(&*self.node)
			}

			fn node_ref(&self) -> $crate::NodeRef {
				$crate::NodeRef::new(self.node.clone())
			}

			fn subscribe_to(
				&self,
				event: $crate::Event,
				callback: impl Fn(&T) + 'static,
			) -> $crate::Subscription {
				self.node.subscribe(
					event,
					std::rc::Rc::new(move |value: Option<&T>| {
						if let Some(value) = value {
							callback(value)
						}
					}),
				)
			}

			fn on(&self, event: $crate::Event, callback: impl Fn() + 'static) -> $crate::Subscription {
				self.node
					.subscribe(event, std::rc::Rc::new(move |_: Option<&T>| callback()))
			}

			#[inline]
			fn notify_subscribers(&self, value: Option<&T>, event: $crate::Event) {
				self.node.notify_subscribers(value, event)
			}

			#[inline]
			fn version(&self) -> u64 {
				self.node.get_version()
			}

			fn subscriptions_count(&self, event: Option<$crate::Event>) -> usize {
				self.node.subscriptions_count(event)
			}

			fn has_subscriptions_for(&self, event: $crate::Event) -> bool {
				self.node.has_subscriptions_for(event)
			}

			fn limit(&self, policy: impl FnOnce(std::rc::Rc<dyn Fn()>) -> Box<dyn Fn()>) {
				self.node.limit(policy)
			}

			fn extend(&self, extender: $crate::Extender) -> &Self {
				self.node.extend(extender);
				self
			}
		}
	};
}

pub(crate) use impl_subscribable;
