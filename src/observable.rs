use std::fmt::Debug;
use std::rc::Rc;

use crate::node::{Comparer, Node, Variant};
use crate::subscribable::impl_subscribable;
use crate::{options, Computed, Extender};

/// A mutable cell. Reading it with [`Observable::get`] inside a computed
/// makes the computed depend on it.
pub struct Observable<T: 'static> {
	pub(crate) node: Rc<Node<T>>,
}

impl<T> Clone for Observable<T> {
	fn clone(&self) -> Self {
		Self {
			node: self.node.clone(),
		}
	}
}

impl<T> Default for Observable<T>
where
	T: Default + Clone + PartialEq + 'static,
{
	fn default() -> Self {
		Observable::new(Default::default())
	}
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> Observable<T>
where
	T: Clone + PartialEq + 'static,
{
	/// Writes of an equal value are ignored.
	pub fn new(value: T) -> Self {
		Self::with_comparer(value, |a: &T, b: &T| a == b)
	}
}

impl<T> Observable<T>
where
	T: Clone + 'static,
{
	pub fn with_comparer(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
		Self::create(value, Some(Rc::new(equals)), false)
	}

	/// Every write notifies, whatever the value.
	pub fn always_notify(value: T) -> Self {
		Self::create(value, None, false)
	}

	pub(crate) fn create(value: T, comparer: Option<Comparer<T>>, array: bool) -> Self {
		let observable = Observable {
			node: Node::new(Some(value), comparer, Variant::Plain { array }),
		};

		if options::get().defer_updates {
			observable.node.extend(Extender::Deferred);
		}

		observable
	}

	/// Read the value and record the dependency.
	#[inline]
	pub fn get(&self) -> T {
		self.node.register_dependency();
		self.peek()
	}

	/// Read the value without recording a dependency.
	pub fn peek(&self) -> T {
		self.node
			.value()
			.expect("observable always holds a value")
	}

	pub fn set(&self, value: T) {
		let different = self.node.is_different(self.node.latest.borrow().as_ref(), &value);
		if different {
			self.value_will_mutate();
			*self.node.latest.borrow_mut() = Some(value);
			self.value_has_mutated();
		}
	}

	pub fn replace(&self, value: T) -> T {
		let old = self.peek();
		self.set(value);
		old
	}

	pub fn update(&self, func: impl FnOnce(&mut T)) {
		let mut value = self.peek();
		func(&mut value);
		self.set(value)
	}

	#[inline]
	pub fn toggle(&self)
	where
		T: Toggle,
	{
		self.update(T::toggle)
	}

	/// Announce an in-place mutation; subscribers get the old value.
	pub fn value_will_mutate(&self) {
		let value = self.node.value();
		self.node.notify_subscribers(value.as_ref(), crate::Event::BeforeChange);
	}

	/// Publish the current value as changed.
	pub fn value_has_mutated(&self) {
		let value = self.node.value();
		self.node.notify_subscribers(value.as_ref(), crate::Event::Spectate);
		self.node.notify_subscribers(value.as_ref(), crate::Event::Change);
	}

	pub fn map<F, R>(&self, func: F) -> Computed<R>
	where
		F: Fn(&T) -> R + 'static,
		R: Clone + PartialEq + 'static,
	{
		let this = self.clone();
		Computed::new(move || func(&this.get()))
	}
}

impl_subscribable!(Observable, Clone + 'static);

impl<T> Debug for Observable<T>
where
	T: Clone + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.peek().fmt(f)
	}
}
