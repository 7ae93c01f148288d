use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};
use std::time::Duration;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::evaluation::{self, Frame};
use crate::limit::PendingValue;
use crate::node::{Comparer, Node, Variant};
use crate::platform::{self, TimerId};
use crate::subscribable::impl_subscribable;
use crate::{options, Dependency, Derived, Error, Event, Extender, NodeId, NodeRef, Subscribable, Subscription, Tracker};

/// Something a computed can be tied to, such as a view that may be torn
/// down. The computed disposes itself once the resource is detached.
pub trait Resource {
	fn is_attached(&self) -> bool;

	/// Register `callback` to run when the resource is detached. Resources
	/// that can only be polled keep the default.
	fn on_detach(&self, callback: Box<dyn FnOnce()>) {
		let _ = callback;
	}
}

impl<F> Resource for F
where
	F: Fn() -> bool,
{
	fn is_attached(&self) -> bool {
		self()
	}
}

struct Tracked {
	target: Rc<dyn Dependency>,
	order: usize,
	version: u64,
	/// `None` while the computed sleeps.
	subscriptions: Option<SmallVec<[Subscription; 2]>>,
}

#[derive(Default)]
struct Tracking {
	dependencies: FxHashMap<NodeId, Tracked>,
	count: usize,
}

impl Tracking {
	fn take_subscriptions(&mut self) -> Vec<Subscription> {
		self.dependencies
			.values_mut()
			.filter_map(|tracked| tracked.subscriptions.take())
			.flatten()
			.collect()
	}
}

pub(crate) struct ComputedState<T: 'static> {
	read: RefCell<Option<Rc<dyn Fn() -> T>>>,
	write: Option<Rc<dyn Fn(T)>>,
	pub(crate) pure: bool,
	pub(crate) defer_evaluation: bool,
	pub(crate) dirty: Cell<bool>,
	pub(crate) stale: Cell<bool>,
	pub(crate) sleeping: Cell<bool>,
	pub(crate) eval_delayed: Cell<bool>,
	being_evaluated: Cell<bool>,
	disposed: Cell<bool>,
	suppress_disposal_until_false: Cell<bool>,
	tracking: RefCell<Tracking>,
	dispose_when: RefCell<Option<Rc<dyn Fn() -> bool>>>,
	resource: RefCell<Option<Rc<dyn Resource>>>,
	throttle_evaluation: Cell<Option<Duration>>,
	evaluation_timer: Cell<Option<TimerId>>,
}

impl<T> ComputedState<T> {
	fn should_dispose(&self) -> bool {
		let resource = self.resource.borrow().clone();
		if let Some(resource) = resource {
			if !resource.is_attached() {
				return true;
			}
		}

		let dispose_when = self.dispose_when.borrow().clone();
		dispose_when.map_or(false, |dispose_when| dispose_when())
	}

	fn dependency_versions(&self) -> SmallVec<[(Rc<dyn Dependency>, u64); 4]> {
		self.tracking
			.borrow()
			.dependencies
			.values()
			.map(|tracked| (tracked.target.clone(), tracked.version))
			.collect()
	}
}

impl<T> Drop for ComputedState<T> {
	fn drop(&mut self) {
		if !self.sleeping.get() {
			for subscription in self.tracking.get_mut().take_subscriptions() {
				subscription.dispose();
			}
		}
	}
}

struct Evaluating<'a>(&'a Cell<bool>);

impl Drop for Evaluating<'_> {
	fn drop(&mut self) {
		self.0.set(false);
	}
}

/// Records the dependencies of one run of a read function. Dependencies
/// left in `candidates` when the run ends are no longer read and get
/// unsubscribed.
struct Evaluation<T: 'static> {
	node: Rc<Node<T>>,
	candidates: RefCell<FxHashMap<NodeId, Tracked>>,
	disposal_count: Cell<usize>,
}

impl<T> Tracker for Evaluation<T>
where
	T: Clone + 'static,
{
	fn based_on(&self, dependency: Rc<dyn Dependency>, id: NodeId) {
		let node = &self.node;
		let Some(state) = node.computed_state() else {
			return;
		};

		if state.disposed.get() {
			return;
		}

		let reclaimed = match self.disposal_count.get() {
			0 => None,
			_ => self.candidates.borrow_mut().remove(&id),
		};

		if let Some(tracked) = reclaimed {
			self.disposal_count.set(self.disposal_count.get() - 1);
			node.add_dependency_tracking(id, dependency.clone(), tracked.subscriptions);
		} else if !state.tracking.borrow().dependencies.contains_key(&id) {
			let subscriptions = match state.sleeping.get() {
				true => None,
				false => Some(dependency.subscribe_derived(node.this.clone() as Weak<dyn Derived>)),
			};
			node.add_dependency_tracking(id, dependency.clone(), subscriptions);
		}

		if dependency.notification_is_pending() {
			dependency.notify_next_change_if_value_is_different();
		}
	}

	fn dependencies_count(&self) -> usize {
		self.node
			.computed_state()
			.map_or(0, |state| state.tracking.borrow().count)
	}
}

/// Ends a run: unsubscribes from dependencies that were not read again and
/// clears the dirty flags, whether the read function returned or panicked.
struct Cleanup<'a, T: 'static> {
	state: &'a ComputedState<T>,
	evaluation: &'a Evaluation<T>,
}

impl<T> Drop for Cleanup<'_, T> {
	fn drop(&mut self) {
		let leftovers = std::mem::take(&mut *self.evaluation.candidates.borrow_mut());
		for (_, tracked) in leftovers {
			for subscription in tracked.subscriptions.into_iter().flatten() {
				subscription.dispose();
			}
		}

		self.state.stale.set(false);
		self.state.dirty.set(false);
	}
}

impl<T> Node<T>
where
	T: Clone + 'static,
{
	fn add_dependency_tracking(
		&self,
		id: NodeId,
		target: Rc<dyn Dependency>,
		subscriptions: Option<SmallVec<[Subscription; 2]>>,
	) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if state.pure && id == Dependency::id(self) {
			panic!("a pure computed must not be called recursively");
		}

		let version = target.version();
		let mut tracking = state.tracking.borrow_mut();
		let order = tracking.count;
		tracking.count += 1;
		tracking.dependencies.insert(
			id,
			Tracked {
				target,
				order,
				version,
				subscriptions,
			},
		);
	}

	pub(crate) fn have_dependencies_changed(&self) -> bool {
		let Some(state) = self.computed_state() else {
			return false;
		};

		let delayed = state.eval_delayed.get();
		state
			.dependency_versions()
			.iter()
			.any(|(target, version)| (delayed && target.notification_is_pending()) || target.has_changed(*version))
	}

	pub(crate) fn has_ancestor(&self, id: NodeId) -> bool {
		let Some(state) = self.computed_state() else {
			return false;
		};

		state
			.dependency_versions()
			.iter()
			.any(|(target, _)| target.id() == id || target.has_ancestor_dependency(id))
	}

	/// Re-runs the read function. Returns whether the value changed.
	pub(crate) fn evaluate_immediate(&self, notify_change: bool) -> bool {
		let Some(state) = self.computed_state() else {
			return false;
		};

		if state.being_evaluated.get() || state.disposed.get() {
			return false;
		}

		if state.should_dispose() {
			if !state.suppress_disposal_until_false.get() {
				self.dispose();
				return false;
			}
		} else {
			state.suppress_disposal_until_false.set(false);
		}

		state.being_evaluated.set(true);
		let _evaluating = Evaluating(&state.being_evaluated);

		self.evaluate_with_dependency_detection(state, notify_change)
	}

	fn evaluate_with_dependency_detection(&self, state: &ComputedState<T>, notify_change: bool) -> bool {
		let Some(this) = self.this.upgrade() else {
			return false;
		};

		let Some(read) = state.read.borrow().clone() else {
			return false;
		};

		let (candidates, disposal_count) = {
			let mut tracking = state.tracking.borrow_mut();
			let count = std::mem::replace(&mut tracking.count, 0);
			(std::mem::take(&mut tracking.dependencies), count)
		};

		let is_initial = match state.pure {
			true => None,
			false => Some(disposal_count == 0),
		};

		let evaluation = Rc::new(Evaluation {
			node: this,
			candidates: RefCell::new(candidates),
			disposal_count: Cell::new(disposal_count),
		});

		let value = {
			let _cleanup = Cleanup {
				state,
				evaluation: &evaluation,
			};
			let _frame = evaluation::begin(Some(Frame {
				tracker: evaluation.clone(),
				is_initial,
			}));
			read()
		};

		let count = state.tracking.borrow().count;
		let old = self.value();
		let changed = if count == 0 {
			self.dispose();
			true
		} else {
			self.is_different(old.as_ref(), &value)
		};

		tracing::trace!(
			node = ?Dependency::id(self),
			dependencies = count,
			changed,
			"computed evaluated"
		);

		if changed {
			if state.sleeping.get() {
				self.update_version();
			} else {
				self.notify_subscribers(old.as_ref(), Event::BeforeChange);
			}

			*self.latest.borrow_mut() = Some(value.clone());
			self.notify_subscribers(Some(&value), Event::Spectate);

			if !state.sleeping.get() && notify_change {
				self.notify_subscribers(Some(&value), Event::Change);
			}

			let limiter = self.limiter.borrow().clone();
			if let Some(limiter) = limiter {
				limiter.record_update();
			}
		}

		if is_initial == Some(true) {
			let latest = self.value();
			self.notify_subscribers(latest.as_ref(), Event::Awake);
		}

		changed
	}

	/// Tracked read.
	pub(crate) fn get_computed(&self) -> Option<T> {
		let state = self.computed_state()?;

		if !state.disposed.get() {
			self.register_dependency();
		}

		if state.dirty.get() || (state.sleeping.get() && self.have_dependencies_changed()) {
			self.evaluate_immediate(false);
		}

		self.value()
	}

	pub(crate) fn peek_computed(&self, evaluate: bool) -> Option<T> {
		let state = self.computed_state()?;

		let unevaluated = state.tracking.borrow().count == 0;
		if (state.dirty.get() && (evaluate || unevaluated))
			|| (state.sleeping.get() && self.have_dependencies_changed())
		{
			self.evaluate_immediate(false);
		}

		self.value()
	}

	/// Announce a change now, evaluate when the limiter flushes.
	fn eval_delayed(&self, is_change: bool) {
		let Some(state) = self.computed_state() else {
			return;
		};

		let limiter = self.limiter.borrow().clone();
		let Some(limiter) = limiter else {
			return;
		};

		if let Some(latest) = self.value() {
			limiter.limit_before_change(&latest);
		}

		state.dirty.set(true);
		if is_change {
			state.stale.set(true);
		}

		limiter.limit_change(PendingValue::DeferredSelf, !is_change);
	}

	pub(crate) fn eval_if_changed(&self) -> Option<T> {
		if let Some(state) = self.computed_state() {
			if !state.sleeping.get() {
				if state.stale.get() {
					self.evaluate_immediate(false);
				} else {
					state.dirty.set(false);
				}
			}
		}

		self.value()
	}

	pub(crate) fn wake(&self, event: Event) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if state.disposed.get() || !state.sleeping.get() || event != Event::Change {
			return;
		}

		state.sleeping.set(false);
		tracing::trace!(node = ?Dependency::id(self), "pure computed awake");

		if state.stale.get() || self.have_dependencies_changed() {
			*state.tracking.borrow_mut() = Tracking::default();
			if self.evaluate_immediate(false) {
				self.update_version();
			}
		} else {
			let mut ordered: Vec<(usize, NodeId, Rc<dyn Dependency>)> = state
				.tracking
				.borrow()
				.dependencies
				.iter()
				.map(|(id, tracked)| (tracked.order, *id, tracked.target.clone()))
				.collect();
			ordered.sort_by_key(|(order, _, _)| *order);

			for (_, id, target) in ordered {
				let subscriptions = target.subscribe_derived(self.this.clone() as Weak<dyn Derived>);
				let unclaimed = match state.tracking.borrow_mut().dependencies.get_mut(&id) {
					Some(tracked) => {
						tracked.subscriptions = Some(subscriptions);
						None
					}
					None => Some(subscriptions),
				};

				for subscription in unclaimed.into_iter().flatten() {
					subscription.dispose();
				}
			}

			if self.have_dependencies_changed() && self.evaluate_immediate(false) {
				self.update_version();
			}
		}

		if !state.disposed.get() {
			let latest = self.value();
			self.notify_subscribers(latest.as_ref(), Event::Awake);
		}
	}

	pub(crate) fn sleep(&self, event: Event) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if state.disposed.get()
			|| state.sleeping.get()
			|| event != Event::Change
			|| self.has_subscriptions_for(Event::Change)
		{
			return;
		}

		let subscriptions = state.tracking.borrow_mut().take_subscriptions();
		for subscription in subscriptions {
			subscription.dispose();
		}

		state.sleeping.set(true);
		tracing::trace!(node = ?Dependency::id(self), "pure computed asleep");
		self.notify_subscribers(None, Event::Asleep);
	}

	pub(crate) fn dispose(&self) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if state.disposed.replace(true) {
			return;
		}

		let tracking = std::mem::take(&mut *state.tracking.borrow_mut());
		if !state.sleeping.get() {
			for tracked in tracking.dependencies.into_values() {
				for subscription in tracked.subscriptions.into_iter().flatten() {
					subscription.dispose();
				}
			}
		}

		if let Some(timer) = state.evaluation_timer.take() {
			platform::current().clear_timeout(timer);
		}

		state.resource.borrow_mut().take();
		state.dispose_when.borrow_mut().take();
		state.read.borrow_mut().take();
		state.stale.set(false);
		state.dirty.set(false);
		state.sleeping.set(false);

		tracing::debug!(node = ?Dependency::id(self), "computed disposed");
	}
}

impl<T> Derived for Node<T>
where
	T: Clone + 'static,
{
	fn evaluate_possibly_async(&self) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if let Some(timeout) = state.throttle_evaluation.get() {
			let platform = platform::current();
			if let Some(timer) = state.evaluation_timer.take() {
				platform.clear_timeout(timer);
			}

			let node = self.this.clone();
			let timer = platform.set_timeout(
				timeout,
				Box::new(move || {
					if let Some(node) = node.upgrade() {
						node.evaluate_immediate(true);
					}
				}),
			);
			state.evaluation_timer.set(Some(timer));
		} else if state.eval_delayed.get() {
			self.eval_delayed(true);
		} else {
			self.evaluate_immediate(true);
		}
	}

	fn respond_to_change(&self) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if !state.eval_delayed.get() {
			self.evaluate_possibly_async();
		} else if state.dirty.get() {
			state.stale.set(true);
		}
	}

	fn mark_dirty(&self) {
		let Some(state) = self.computed_state() else {
			return;
		};

		if state.eval_delayed.get() && !state.being_evaluated.get() {
			self.eval_delayed(false);
		}
	}
}

/// A value derived from a read function.
///
/// Every observable or computed the function reads becomes a dependency.
/// A non-pure computed stays subscribed to its dependencies for as long as
/// it lives. A pure computed only subscribes while something subscribes to
/// it and otherwise re-validates lazily on read.
pub struct Computed<T: 'static> {
	pub(crate) node: Rc<Node<T>>,
}

impl<T> Clone for Computed<T> {
	fn clone(&self) -> Self {
		Self {
			node: self.node.clone(),
		}
	}
}

impl<T> Computed<T>
where
	T: Clone + PartialEq + 'static,
{
	/// An eagerly evaluated computed.
	pub fn new(read: impl Fn() -> T + 'static) -> Self {
		ComputedBuilder::new().finish(Rc::new(read))
	}

	/// A computed that sleeps while nothing subscribes to it.
	pub fn pure(read: impl Fn() -> T + 'static) -> Self {
		ComputedBuilder::new().pure().finish(Rc::new(read))
	}

	pub fn builder() -> ComputedBuilder<T> {
		ComputedBuilder::new()
	}
}

impl<T> Computed<T>
where
	T: Clone + 'static,
{
	fn state(&self) -> &ComputedState<T> {
		match &self.node.variant {
			Variant::Computed(state) => state,
			Variant::Plain { .. } => unreachable!("computed handle over a plain node"),
		}
	}

	/// Read the value, re-evaluating when needed, and record the dependency.
	///
	/// # Panics
	///
	/// When the computed has no value yet, which happens if it was disposed
	/// before its first evaluation. Use [`Computed::try_get`] when that can
	/// be the case.
	pub fn get(&self) -> T {
		self.try_get().expect("computed read before it produced a value")
	}

	/// Read the value without recording a dependency.
	///
	/// # Panics
	///
	/// Under the same condition as [`Computed::get`].
	pub fn peek(&self) -> T {
		self.try_peek().expect("computed read before it produced a value")
	}

	/// Like [`Computed::get`], `None` while the computed has no value.
	pub fn try_get(&self) -> Option<T> {
		self.node.get_computed()
	}

	pub fn try_peek(&self) -> Option<T> {
		self.node.peek_computed(false)
	}

	/// Forward `value` to the write function.
	pub fn set(&self, value: T) -> Result<&Self, Error> {
		let write = self.state().write.clone().ok_or(Error::ReadOnly)?;
		write(value);
		Ok(self)
	}

	pub fn has_write_function(&self) -> bool {
		self.state().write.is_some()
	}

	pub fn is_pure(&self) -> bool {
		self.state().pure
	}

	/// Whether the computed can still change.
	pub fn is_active(&self) -> bool {
		let state = self.state();
		state.dirty.get() || state.tracking.borrow().count > 0
	}

	pub fn dispose(&self) {
		self.node.dispose()
	}

	pub fn dependencies_count(&self) -> usize {
		self.state().tracking.borrow().count
	}

	/// Dependencies in the order they were first read.
	pub fn dependencies(&self) -> Vec<NodeRef> {
		let mut ordered: Vec<(usize, NodeRef)> = self
			.state()
			.tracking
			.borrow()
			.dependencies
			.values()
			.map(|tracked| (tracked.order, NodeRef::new(tracked.target.clone())))
			.collect();
		ordered.sort_by_key(|(order, _)| *order);
		ordered.into_iter().map(|(_, node)| node).collect()
	}

	/// Whether `node` is a direct or transitive dependency.
	pub fn has_ancestor_dependency<U: 'static>(&self, node: &impl Subscribable<U>) -> bool {
		self.node.has_ancestor(node.id())
	}

	/// Re-evaluate `timeout` after the last dependency change instead of
	/// right away.
	pub fn set_throttle_evaluation(&self, timeout: Option<Duration>) {
		self.state().throttle_evaluation.set(timeout);
	}
}

impl_subscribable!(Computed, Clone + 'static);

impl<T> Debug for Computed<T>
where
	T: Clone + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Computed")
			.field("value", &self.node.value())
			.field("dependencies", &self.dependencies_count())
			.field("pure", &self.is_pure())
			.finish()
	}
}

pub struct ComputedBuilder<T: 'static> {
	read: Option<Rc<dyn Fn() -> T>>,
	write: Option<Rc<dyn Fn(T)>>,
	comparer: Option<Comparer<T>>,
	pure: bool,
	defer_evaluation: bool,
	dispose_when: Option<Rc<dyn Fn() -> bool>>,
	resource: Option<Rc<dyn Resource>>,
	throttle_evaluation: Option<Duration>,
}

impl<T> Default for ComputedBuilder<T>
where
	T: Clone + PartialEq + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ComputedBuilder<T>
where
	T: Clone + PartialEq + 'static,
{
	pub fn new() -> Self {
		Self::without_comparer().comparer(|a: &T, b: &T| a == b)
	}
}

impl<T> ComputedBuilder<T>
where
	T: Clone + 'static,
{
	/// A builder whose computed notifies on every evaluation.
	pub fn without_comparer() -> Self {
		ComputedBuilder {
			read: None,
			write: None,
			comparer: None,
			pure: false,
			defer_evaluation: false,
			dispose_when: None,
			resource: None,
			throttle_evaluation: None,
		}
	}

	pub fn read(mut self, read: impl Fn() -> T + 'static) -> Self {
		self.read = Some(Rc::new(read));
		self
	}

	pub fn write(mut self, write: impl Fn(T) + 'static) -> Self {
		self.write = Some(Rc::new(write));
		self
	}

	pub fn comparer(mut self, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
		self.comparer = Some(Rc::new(equals));
		self
	}

	pub fn always_notify(mut self) -> Self {
		self.comparer = None;
		self
	}

	pub fn pure(mut self) -> Self {
		self.pure = true;
		self
	}

	/// Skip the evaluation at construction; evaluate on first read or
	/// first subscription instead.
	pub fn defer_evaluation(mut self) -> Self {
		self.defer_evaluation = true;
		self
	}

	pub fn dispose_when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
		self.dispose_when = Some(Rc::new(predicate));
		self
	}

	/// Dispose once `resource` is detached. Until the resource reports
	/// attached for the first time, a detached state is tolerated.
	pub fn dispose_when_detached(mut self, resource: Rc<dyn Resource>) -> Self {
		self.resource = Some(resource);
		self
	}

	pub fn throttle_evaluation(mut self, timeout: Duration) -> Self {
		self.throttle_evaluation = Some(timeout);
		self
	}

	pub fn build(self) -> Result<Computed<T>, Error> {
		match self.read.clone() {
			Some(read) => Ok(self.finish(read)),
			None => Err(Error::MissingReadFunction),
		}
	}

	fn finish(self, read: Rc<dyn Fn() -> T>) -> Computed<T> {
		let has_resource = self.resource.is_some();
		let resource = self.resource.clone();

		let state = ComputedState {
			read: RefCell::new(Some(read)),
			write: self.write,
			pure: self.pure,
			defer_evaluation: self.defer_evaluation,
			dirty: Cell::new(true),
			stale: Cell::new(true),
			sleeping: Cell::new(self.pure),
			eval_delayed: Cell::new(false),
			being_evaluated: Cell::new(false),
			disposed: Cell::new(false),
			suppress_disposal_until_false: Cell::new(has_resource),
			tracking: RefCell::new(Tracking::default()),
			dispose_when: RefCell::new(self.dispose_when),
			resource: RefCell::new(self.resource),
			throttle_evaluation: Cell::new(self.throttle_evaluation),
			evaluation_timer: Cell::new(None),
		};

		let computed = Computed {
			node: Node::new(None, self.comparer, Variant::Computed(Box::new(state))),
		};

		if options::get().defer_updates {
			computed.node.extend(Extender::Deferred);
		}

		if !self.pure && !self.defer_evaluation {
			computed.node.evaluate_immediate(false);
		}

		if let Some(resource) = resource {
			if computed.is_active() {
				let node = Rc::downgrade(&computed.node);
				resource.on_detach(Box::new(move || {
					if let Some(node) = node.upgrade() {
						node.dispose();
					}
				}));
			}
		}

		computed
	}
}
