use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::computed::ComputedState;
use crate::evaluation;
use crate::limit::Limiter;
use crate::subscription::{deliver, take_listeners, Callback, Listener, Listeners};
use crate::{Dependency, Derived, Event, Kind, NodeId, Subscription};

pub(crate) type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Shared state behind every observable and computed handle.
pub(crate) struct Node<T: 'static> {
	pub(crate) this: Weak<Node<T>>,
	id: Cell<Option<NodeId>>,
	version: Cell<u64>,
	pub(crate) latest: RefCell<Option<T>>,
	listeners: RefCell<FxHashMap<Event, Listeners<T>>>,
	/// `None` means every write notifies.
	pub(crate) comparer: RefCell<Option<Comparer<T>>>,
	pub(crate) default_comparer: Option<Comparer<T>>,
	pub(crate) limiter: RefCell<Option<Rc<Limiter<T>>>>,
	pub(crate) notification_pending: Cell<bool>,
	pub(crate) deferred: Cell<bool>,
	pub(crate) variant: Variant<T>,
}

pub(crate) enum Variant<T: 'static> {
	Plain { array: bool },
	Computed(Box<ComputedState<T>>),
}

impl<T> Node<T>
where
	T: Clone + 'static,
{
	pub(crate) fn new(latest: Option<T>, comparer: Option<Comparer<T>>, variant: Variant<T>) -> Rc<Self> {
		Rc::new_cyclic(|this| Node {
			this: this.clone(),
			id: Cell::new(None),
			version: Cell::new(1),
			latest: RefCell::new(latest),
			listeners: RefCell::new(FxHashMap::default()),
			comparer: RefCell::new(comparer.clone()),
			default_comparer: comparer,
			limiter: RefCell::new(None),
			notification_pending: Cell::new(false),
			deferred: Cell::new(false),
			variant,
		})
	}

	#[inline]
	pub(crate) fn value(&self) -> Option<T> {
		self.latest.borrow().clone()
	}

	pub(crate) fn computed_state(&self) -> Option<&ComputedState<T>> {
		match &self.variant {
			Variant::Computed(state) => Some(state),
			Variant::Plain { .. } => None,
		}
	}

	/// Reports this node to the evaluating computed, if any.
	pub(crate) fn register_dependency(&self) {
		if let Some(this) = self.this.upgrade() {
			evaluation::register_dependency(this);
		}
	}

	pub(crate) fn is_different(&self, old: Option<&T>, new: &T) -> bool {
		let comparer = self.comparer.borrow().clone();
		match (comparer, old) {
			(Some(equals), Some(old)) => !equals(old, new),
			_ => true,
		}
	}

	pub(crate) fn subscribe(&self, event: Event, callback: Callback<T>) -> Subscription {
		let node = self.this.clone();
		let subscription = Subscription::new(move |state| {
			Box::new(move || {
				if let Some(node) = node.upgrade() {
					let removed = match node.listeners.borrow_mut().get_mut(&event) {
						Some(list) => take_listeners(list, &state),
						None => Listeners::new(),
					};
					drop(removed);
					node.after_subscription_remove(event);
				}
			})
		});

		self.before_subscription_add(event);
		self.listeners
			.borrow_mut()
			.entry(event)
			.or_default()
			.push(Listener::new(&subscription, callback));

		subscription
	}

	fn before_subscription_add(&self, event: Event) {
		if let Some(state) = self.computed_state() {
			if state.pure {
				self.wake(event);
			} else if state.defer_evaluation && matches!(event, Event::Change | Event::BeforeChange) {
				self.peek_evaluate(false);
			}
		}
	}

	fn after_subscription_remove(&self, event: Event) {
		if let Some(state) = self.computed_state() {
			if state.pure {
				self.sleep(event);
			}
		}
	}

	pub(crate) fn subscriptions_count(&self, event: Option<Event>) -> usize {
		let listeners = self.listeners.borrow();
		match event {
			Some(event) => listeners.get(&event).map_or(0, |list| list.len()),
			None => listeners.values().map(|list| list.len()).sum(),
		}
	}

	pub(crate) fn has_subscriptions_for(&self, event: Event) -> bool {
		self.subscriptions_count(Some(event)) > 0
	}

	/// Notification entry point; goes through the limiter when one is set.
	pub(crate) fn notify_subscribers(&self, value: Option<&T>, event: Event) {
		let limiter = self.limiter.borrow().clone();
		match (limiter, event, value) {
			(Some(limiter), Event::Change, Some(value)) => limiter.limit_change(value.clone().into(), false),
			(Some(limiter), Event::BeforeChange, Some(value)) => limiter.limit_before_change(value),
			_ => self.notify_original(value, event),
		}
	}

	/// Delivers `value` to the subscribers of `event` right now.
	pub(crate) fn notify_original(&self, value: Option<&T>, event: Event) {
		if event == Event::Change {
			self.update_version();
		}

		let snapshot = match event {
			Event::Change => self.limiter.borrow().as_ref().and_then(|l| l.take_snapshot()),
			_ => None,
		};

		let listeners = match snapshot {
			Some(listeners) => listeners,
			None => match self.listeners.borrow().get(&event) {
				Some(listeners) if !listeners.is_empty() => listeners.clone(),
				_ => return,
			},
		};

		let _frame = evaluation::suppress();
		deliver(&listeners, value);
	}

	pub(crate) fn change_listeners(&self) -> Listeners<T> {
		self.listeners
			.borrow()
			.get(&Event::Change)
			.cloned()
			.unwrap_or_default()
	}

	#[inline]
	pub(crate) fn update_version(&self) {
		self.version.set(self.version.get() + 1);
	}

	pub(crate) fn get_version(&self) -> u64 {
		if let Some(state) = self.computed_state() {
			if state.sleeping.get() && (state.stale.get() || self.have_dependencies_changed()) {
				self.evaluate_immediate(false);
			}
		}

		self.version.get()
	}

	/// Latest value; computeds may evaluate first.
	pub(crate) fn peek_evaluate(&self, evaluate: bool) -> Option<T> {
		if self.computed_state().is_some() {
			self.peek_computed(evaluate)
		} else {
			self.value()
		}
	}

	pub(crate) fn kind(&self) -> Kind {
		match &self.variant {
			Variant::Plain { array: false } => Kind::Observable,
			Variant::Plain { array: true } => Kind::ObservableArray,
			Variant::Computed(state) if state.pure => Kind::PureComputed,
			Variant::Computed(_) => Kind::Computed,
		}
	}
}

impl<T> Dependency for Node<T>
where
	T: Clone + 'static,
{
	fn id(&self) -> NodeId {
		match self.id.get() {
			Some(id) => id,
			None => {
				let id = evaluation::next_id();
				self.id.set(Some(id));
				id
			}
		}
	}

	fn kind(&self) -> Kind {
		Node::kind(self)
	}

	fn version(&self) -> u64 {
		self.get_version()
	}

	fn subscribe_derived(&self, derived: Weak<dyn Derived>) -> SmallVec<[Subscription; 2]> {
		let mut subscriptions = SmallVec::new();

		if self.deferred.get() {
			let dirty = derived.clone();
			subscriptions.push(self.subscribe(
				Event::Dirty,
				Rc::new(move |_: Option<&T>| {
					if let Some(derived) = dirty.upgrade() {
						derived.mark_dirty()
					}
				}),
			));
			subscriptions.push(self.subscribe(
				Event::Change,
				Rc::new(move |_: Option<&T>| {
					if let Some(derived) = derived.upgrade() {
						derived.respond_to_change()
					}
				}),
			));
		} else {
			subscriptions.push(self.subscribe(
				Event::Change,
				Rc::new(move |_: Option<&T>| {
					if let Some(derived) = derived.upgrade() {
						derived.evaluate_possibly_async()
					}
				}),
			));
		}

		subscriptions
	}

	fn notification_is_pending(&self) -> bool {
		self.notification_pending.get()
	}

	fn notify_next_change_if_value_is_different(&self) {
		let limiter = self.limiter.borrow().clone();
		if let Some(limiter) = limiter {
			limiter.notify_next_change_if_value_is_different();
		}
	}

	fn has_ancestor_dependency(&self, id: NodeId) -> bool {
		match self.computed_state() {
			Some(_) => self.has_ancestor(id),
			None => false,
		}
	}
}

/// Type-erased handle to any node of the graph.
#[derive(Clone)]
pub struct NodeRef {
	node: Rc<dyn Dependency>,
}

impl NodeRef {
	pub(crate) fn new(node: Rc<dyn Dependency>) -> Self {
		NodeRef { node }
	}

	pub fn id(&self) -> NodeId {
		self.node.id()
	}

	pub fn kind(&self) -> Kind {
		self.node.kind()
	}

	pub fn version(&self) -> u64 {
		self.node.version()
	}
}

impl PartialEq for NodeRef {
	fn eq(&self, other: &Self) -> bool {
		self.id() == other.id()
	}
}

impl Eq for NodeRef {}

impl Debug for NodeRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NodeRef")
			.field("id", &self.id())
			.field("kind", &self.kind())
			.finish()
	}
}
