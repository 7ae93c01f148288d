use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::diff::{self, ArrayChange, CompareOptions};
use crate::node::Node;
use crate::subscription::{deliver, take_listeners, Listener, Listeners};
use crate::{evaluation, Event, Extender, NodeId, NodeRef, Observable, Subscribable, Subscription};

/// Mutation whose edit script can be derived from its arguments.
enum KnownOperation<'a, T> {
	Push(&'a [T]),
	Unshift(&'a [T]),
	Pop,
	Shift,
	Splice {
		start: usize,
		delete_count: usize,
		items: &'a [T],
	},
}

/// Turns change notifications of an array node into edit scripts for
/// array-change subscribers.
struct ChangeTracker<T: 'static> {
	node: Weak<Node<Vec<T>>>,
	tracking: Cell<bool>,
	pending_changes: Cell<usize>,
	previous: RefCell<Option<Vec<T>>>,
	cached_diff: RefCell<Option<Vec<ArrayChange<T>>>>,
	subscriptions: RefCell<SmallVec<[Subscription; 2]>>,
	listeners: RefCell<Listeners<Vec<ArrayChange<T>>>>,
}

impl<T> ChangeTracker<T>
where
	T: Clone + PartialEq + 'static,
{
	fn start(this: &Rc<Self>) {
		if this.tracking.replace(true) {
			return;
		}

		let Some(node) = this.node.upgrade() else {
			return;
		};

		let tracker = Rc::downgrade(this);
		let spectate = node.subscribe(
			Event::Spectate,
			Rc::new(move |_: Option<&Vec<T>>| {
				if let Some(tracker) = tracker.upgrade() {
					tracker.pending_changes.set(tracker.pending_changes.get() + 1);
				}
			}),
		);

		*this.previous.borrow_mut() = node.value();
		this.cached_diff.borrow_mut().take();

		let tracker = Rc::downgrade(this);
		let change = node.subscribe(
			Event::Change,
			Rc::new(move |_: Option<&Vec<T>>| {
				if let Some(tracker) = tracker.upgrade() {
					tracker.notify_changes();
				}
			}),
		);

		this.subscriptions.borrow_mut().extend([spectate, change]);
	}

	fn stop(&self) {
		self.tracking.set(false);
		let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
		for subscription in subscriptions {
			subscription.dispose();
		}

		self.previous.borrow_mut().take();
		self.cached_diff.borrow_mut().take();
		self.pending_changes.set(0);
	}

	fn notify_changes(&self) {
		if self.pending_changes.get() == 0 {
			return;
		}

		let Some(node) = self.node.upgrade() else {
			return;
		};

		let current = node.value().unwrap_or_default();
		let changes = match self.listeners.borrow().is_empty() {
			true => None,
			false => Some(self.changes(&current)),
		};

		*self.previous.borrow_mut() = Some(current);
		self.cached_diff.borrow_mut().take();
		self.pending_changes.set(0);

		if let Some(changes) = changes.filter(|changes| !changes.is_empty()) {
			let listeners = self.listeners.borrow().clone();
			let _frame = evaluation::suppress();
			deliver(&listeners, Some(&changes));
		}
	}

	fn changes(&self, current: &[T]) -> Vec<ArrayChange<T>> {
		let mut cached = self.cached_diff.borrow_mut();
		if cached.is_none() || self.pending_changes.get() > 1 {
			let previous = self.previous.borrow();
			let previous = previous.as_deref().unwrap_or_default();
			*cached = Some(diff::diff_arrays(previous, current, CompareOptions::sparse()));
		}

		cached.clone().unwrap_or_default()
	}

	/// Record the edit script of `operation` before it is applied to `raw`.
	/// Only a single pending mutation can be described this way.
	fn cache_known_operation(&self, raw: &[T], operation: KnownOperation<'_, T>) {
		if !self.tracking.get() || self.pending_changes.get() > 0 {
			return;
		}

		let length = raw.len();
		let diff = match operation {
			KnownOperation::Push(items) => added_run(items, length),
			KnownOperation::Unshift(items) => added_run(items, 0),
			KnownOperation::Pop => match raw.last() {
				Some(last) => vec![ArrayChange::deleted(last.clone(), length - 1)],
				None => Vec::new(),
			},
			KnownOperation::Shift => match raw.first() {
				Some(first) => vec![ArrayChange::deleted(first.clone(), 0)],
				None => Vec::new(),
			},
			KnownOperation::Splice {
				start,
				delete_count,
				items,
			} => splice_diff(raw, start, delete_count, items),
		};

		*self.cached_diff.borrow_mut() = Some(diff);
	}
}

fn added_run<T: Clone>(items: &[T], offset: usize) -> Vec<ArrayChange<T>> {
	items
		.iter()
		.enumerate()
		.map(|(i, item)| ArrayChange::added(item.clone(), offset + i))
		.collect()
}

fn splice_diff<T>(raw: &[T], start: usize, delete_count: usize, items: &[T]) -> Vec<ArrayChange<T>>
where
	T: Clone + PartialEq,
{
	let length = raw.len();
	let start = start.min(length);
	let end_delete = start.saturating_add(delete_count).min(length);
	let end_add = start + items.len();
	let end = end_delete.max(end_add);

	let mut deletions: Vec<_> = (start..end_delete)
		.map(|index| ArrayChange::deleted(raw[index].clone(), index))
		.collect();
	let mut additions: Vec<_> = (start..end_add)
		.map(|index| ArrayChange::added(items[index - start].clone(), index))
		.collect();
	diff::find_moves_in_array_comparison(&mut deletions, &mut additions, None);

	let mut deletions = deletions.into_iter();
	let mut additions = additions.into_iter();
	let mut diff = Vec::with_capacity(end_delete - start + items.len());
	for index in start..end {
		if index < end_delete {
			diff.extend(deletions.next());
		}
		if index < end_add {
			diff.extend(additions.next());
		}
	}

	diff
}

/// An observable holding a `Vec` with in-place mutators.
///
/// Array-change subscribers receive sparse edit scripts describing each
/// published change.
pub struct ObservableArray<T: 'static> {
	observable: Observable<Vec<T>>,
	tracker: Rc<ChangeTracker<T>>,
}

impl<T> Clone for ObservableArray<T> {
	fn clone(&self) -> Self {
		ObservableArray {
			observable: self.observable.clone(),
			tracker: self.tracker.clone(),
		}
	}
}

impl<T> Default for ObservableArray<T>
where
	T: Clone + PartialEq + 'static,
{
	fn default() -> Self {
		ObservableArray::new(Vec::new())
	}
}

impl<T> From<Vec<T>> for ObservableArray<T>
where
	T: Clone + PartialEq + 'static,
{
	fn from(items: Vec<T>) -> Self {
		ObservableArray::new(items)
	}
}

impl<T> ObservableArray<T>
where
	T: Clone + PartialEq + 'static,
{
	/// Every write notifies; arrays carry no equality comparer.
	pub fn new(items: Vec<T>) -> Self {
		let observable = Observable::create(items, None, true);
		let tracker = Rc::new(ChangeTracker {
			node: Rc::downgrade(&observable.node),
			tracking: Cell::new(false),
			pending_changes: Cell::new(0),
			previous: RefCell::new(None),
			cached_diff: RefCell::new(None),
			subscriptions: RefCell::new(SmallVec::new()),
			listeners: RefCell::new(SmallVec::new()),
		});

		ObservableArray { observable, tracker }
	}

	pub fn get(&self) -> Vec<T> {
		self.observable.get()
	}

	pub fn peek(&self) -> Vec<T> {
		self.observable.peek()
	}

	pub fn set(&self, items: Vec<T>) {
		self.observable.set(items)
	}

	pub fn value_will_mutate(&self) {
		self.observable.value_will_mutate()
	}

	pub fn value_has_mutated(&self) {
		self.observable.value_has_mutated()
	}

	pub fn len(&self) -> usize {
		self.observable.node.register_dependency();
		self.with_items(|items| items.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn index_of(&self, item: &T) -> Option<usize> {
		self.observable.node.register_dependency();
		self.with_items(|items| items.iter().position(|candidate| candidate == item))
	}

	/// Receive the edit script of every published change.
	pub fn subscribe_array_changes(&self, callback: impl Fn(&[ArrayChange<T>]) + 'static) -> Subscription {
		let tracker = Rc::downgrade(&self.tracker);
		let subscription = Subscription::new(move |state| {
			Box::new(move || {
				if let Some(tracker) = tracker.upgrade() {
					let removed = take_listeners(&mut tracker.listeners.borrow_mut(), &state);
					drop(removed);
					if tracker.listeners.borrow().is_empty() {
						tracker.stop();
					}
				}
			})
		});

		ChangeTracker::start(&self.tracker);
		self.tracker.listeners.borrow_mut().push(Listener::new(
			&subscription,
			Rc::new(move |changes: Option<&Vec<ArrayChange<T>>>| {
				if let Some(changes) = changes {
					callback(changes)
				}
			}),
		));

		subscription
	}

	fn with_items<R>(&self, func: impl FnOnce(&[T]) -> R) -> R {
		let latest = self.observable.node.latest.borrow();
		func(latest.as_deref().unwrap_or_default())
	}

	fn mutate<R>(&self, operation: Option<KnownOperation<'_, T>>, func: impl FnOnce(&mut Vec<T>) -> R) -> R {
		self.value_will_mutate();

		if let Some(operation) = operation {
			let latest = self.observable.node.latest.borrow();
			self.tracker
				.cache_known_operation(latest.as_deref().unwrap_or_default(), operation);
		}

		let result = {
			let mut latest = self.observable.node.latest.borrow_mut();
			func(latest.get_or_insert_with(Vec::new))
		};

		self.value_has_mutated();
		result
	}

	pub fn push(&self, item: T) {
		self.push_all(vec![item])
	}

	/// Append `items` as a single mutation.
	pub fn push_all(&self, items: Vec<T>) {
		let known = items.clone();
		self.mutate(Some(KnownOperation::Push(&known)), move |current| current.extend(items))
	}

	pub fn unshift(&self, item: T) {
		let known = [item.clone()];
		self.mutate(Some(KnownOperation::Unshift(&known)), move |current| current.insert(0, item))
	}

	pub fn pop(&self) -> Option<T> {
		self.mutate(Some(KnownOperation::Pop), |current| current.pop())
	}

	pub fn shift(&self) -> Option<T> {
		self.mutate(Some(KnownOperation::Shift), |current| match current.is_empty() {
			true => None,
			false => Some(current.remove(0)),
		})
	}

	/// Remove up to `delete_count` items at `start` and insert `items` in
	/// their place. Returns the removed items.
	pub fn splice(&self, start: usize, delete_count: usize, items: Vec<T>) -> Vec<T> {
		let known = items.clone();
		let operation = KnownOperation::Splice {
			start,
			delete_count,
			items: &known,
		};

		self.mutate(Some(operation), move |current| {
			let start = start.min(current.len());
			let end = start.saturating_add(delete_count).min(current.len());
			current.splice(start..end, items).collect()
		})
	}

	/// Remove every item equal to `item`.
	pub fn remove(&self, item: &T) -> Vec<T> {
		self.remove_where(|candidate| candidate == item)
	}

	pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
		let (removed, kept): (Vec<T>, Vec<T>) = self.peek().into_iter().partition(|item| predicate(item));
		if !removed.is_empty() {
			self.mutate(None, move |current| *current = kept);
		}
		removed
	}

	/// Remove every item contained in `items`.
	pub fn remove_all(&self, items: &[T]) -> Vec<T> {
		self.remove_where(|candidate| items.contains(candidate))
	}

	/// Remove every item. Returns what was removed.
	pub fn clear(&self) -> Vec<T> {
		self.mutate(None, std::mem::take)
	}

	/// Replace the first item equal to `old` with `new`.
	pub fn replace_item(&self, old: &T, new: T) {
		let index = self.with_items(|items| items.iter().position(|item| item == old));
		if let Some(index) = index {
			self.mutate(None, move |current| current[index] = new);
		}
	}

	pub fn reverse(&self) {
		self.mutate(None, |current| current.reverse())
	}

	pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) {
		let mut sorted = self.peek();
		sorted.sort_by(compare);
		self.mutate(None, move |current| *current = sorted)
	}

	/// Sorted copy of the items. Tracked.
	pub fn sorted_by(&self, compare: impl FnMut(&T, &T) -> Ordering) -> Vec<T> {
		let mut items = self.get();
		items.sort_by(compare);
		items
	}

	/// Reversed copy of the items. Tracked.
	pub fn reversed(&self) -> Vec<T> {
		let mut items = self.get();
		items.reverse();
		items
	}
}

impl<T> Subscribable<Vec<T>> for ObservableArray<T>
where
	T: Clone + 'static,
{
	fn id(&self) -> NodeId {
		self.observable.id()
	}

	fn node_ref(&self) -> NodeRef {
		self.observable.node_ref()
	}

	fn subscribe_to(&self, event: Event, callback: impl Fn(&Vec<T>) + 'static) -> Subscription {
		self.observable.subscribe_to(event, callback)
	}

	fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription {
		self.observable.on(event, callback)
	}

	fn notify_subscribers(&self, value: Option<&Vec<T>>, event: Event) {
		self.observable.notify_subscribers(value, event)
	}

	fn version(&self) -> u64 {
		self.observable.version()
	}

	fn subscriptions_count(&self, event: Option<Event>) -> usize {
		self.observable.subscriptions_count(event)
	}

	fn has_subscriptions_for(&self, event: Event) -> bool {
		self.observable.has_subscriptions_for(event)
	}

	fn limit(&self, policy: impl FnOnce(Rc<dyn Fn()>) -> Box<dyn Fn()>) {
		self.observable.limit(policy)
	}

	fn extend(&self, extender: Extender) -> &Self {
		self.observable.extend(extender);
		self
	}
}

impl<T> Debug for ObservableArray<T>
where
	T: Clone + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.observable.peek()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diff::ChangeStatus;

	fn recorder<T: Clone + PartialEq + 'static>(
		array: &ObservableArray<T>,
	) -> Rc<RefCell<Vec<Vec<ArrayChange<T>>>>> {
		let log = Rc::new(RefCell::new(Vec::new()));
		let sink = log.clone();
		array.subscribe_array_changes(move |changes| sink.borrow_mut().push(changes.to_vec()));
		log
	}

	#[test]
	fn splice_describes_replacements() {
		let diff = splice_diff(&[1, 2, 3, 4], 1, 2, &[9]);
		assert_eq!(
			diff,
			vec![ArrayChange::deleted(2, 1), ArrayChange::added(9, 1), ArrayChange::deleted(3, 2)]
		);
	}

	#[test]
	fn splice_pairs_reinserted_values() {
		let diff = splice_diff(&["a", "b"], 0, 1, &["c", "a"]);
		assert_eq!(
			diff,
			vec![
				ArrayChange::deleted("a", 0).moved_from(1),
				ArrayChange::added("c", 0),
				ArrayChange::added("a", 1).moved_from(0),
			]
		);
	}

	#[test]
	fn push_and_pop_use_the_operation() {
		let array = ObservableArray::new(vec![1, 2]);
		let log = recorder(&array);

		array.push(3);
		assert_eq!(array.pop(), Some(3));
		assert_eq!(array.shift(), Some(1));
		array.unshift(0);

		assert_eq!(
			*log.borrow(),
			vec![
				vec![ArrayChange::added(3, 2)],
				vec![ArrayChange::deleted(3, 2)],
				vec![ArrayChange::deleted(1, 0)],
				vec![ArrayChange::added(0, 0)],
			]
		);
		assert_eq!(array.peek(), vec![0, 2]);
	}

	#[test]
	fn fast_path_matches_full_diff() {
		let before = vec![1, 2, 3, 4, 5];
		let array = ObservableArray::new(before.clone());
		let log = recorder(&array);

		array.splice(1, 3, vec![7, 8]);
		let after = array.peek();

		let full = diff::diff_arrays(&before, &after, CompareOptions::sparse());
		let mut fast = log.borrow()[0].clone();
		let mut full = full;
		let key = |change: &ArrayChange<i32>| (change.index, change.status == ChangeStatus::Added);
		fast.sort_by_key(key);
		full.sort_by_key(key);
		assert_eq!(fast, full);
	}

	#[test]
	fn whole_array_writes_are_diffed() {
		let array = ObservableArray::new(vec!['a', 'b', 'c']);
		let log = recorder(&array);

		array.set(vec!['a', 'c']);
		array.reverse();

		assert_eq!(
			*log.borrow(),
			vec![
				vec![ArrayChange::deleted('b', 1)],
				vec![ArrayChange::added('c', 0).moved_from(1), ArrayChange::deleted('c', 1).moved_from(0)],
			]
		);
	}

	#[test]
	fn tracking_stops_with_the_last_subscriber() {
		let array = ObservableArray::new(vec![1]);
		let subscription = array.subscribe_array_changes(|_| {});
		assert!(array.tracker.tracking.get());
		assert_eq!(array.subscriptions_count(Some(Event::Change)), 1);

		subscription.dispose();
		assert!(!array.tracker.tracking.get());
		assert_eq!(array.subscriptions_count(None), 0);
	}

	#[test]
	fn remove_and_replace() {
		let array = ObservableArray::new(vec![1, 2, 1, 3]);
		assert_eq!(array.remove(&1), vec![1, 1]);
		assert!(array.remove(&9).is_empty());
		array.replace_item(&3, 4);
		assert_eq!(array.peek(), vec![2, 4]);
		assert_eq!(array.remove_all(&[2, 4]), vec![2, 4]);
		assert!(array.is_empty());
	}
}
