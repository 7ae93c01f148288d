use std::cell::{Cell, RefCell};
use std::rc::Rc;

use depflow::{
	evaluation, Computed, Error, Event, Extender, Kind, NotifyWhen, Observable, ObservableArray, Resource,
	Subscribable, Subscription,
};
use mockall::predicate::eq;

mod mock;

use mock::Spy;

fn counter() -> Rc<Cell<usize>> {
	Rc::new(Cell::new(0))
}

fn bump(count: &Cell<usize>) {
	count.set(count.get() + 1)
}

#[test]
fn computed_follows_its_source() {
	let o = Observable::new(1);
	let c = Computed::new({
		let o = o.clone();
		move || o.get() * 2
	});

	let log = Rc::new(RefCell::new(Vec::new()));
	c.subscribe({
		let log = log.clone();
		move |value| log.borrow_mut().push(*value)
	});

	o.set(5);

	assert_eq!(*log.borrow(), vec![10]);
	assert_eq!(c.peek(), 10);
}

#[test]
fn equal_writes_notify_once() {
	let o = Observable::new(0);
	let mock = mock::SharedMock::new();

	mock.get().expect_trigger().with(eq(1)).times(1).return_const(());

	o.subscribe({
		let mock = mock.clone();
		move |value| mock.get().trigger(*value)
	});

	o.set(1);
	o.set(1);

	mock.get().checkpoint();
}

#[test]
fn versions_move_only_on_change() {
	let o = Observable::new(1);
	let c = Computed::new({
		let o = o.clone();
		move || o.get() % 2
	});

	let observable_version = o.version();
	let computed_version = c.version();

	o.set(1);
	assert_eq!(o.version(), observable_version);

	o.set(2);
	assert!(o.version() > observable_version);
	assert!(c.has_changed(computed_version));

	// 4 % 2 == 2 % 2, the computed does not change.
	let computed_version = c.version();
	o.set(4);
	assert_eq!(c.version(), computed_version);
}

#[test]
fn conditional_reads_drop_stale_dependencies() {
	let a = Observable::new(true);
	let b = Observable::new(1);
	let evaluations = counter();

	let c = Computed::new({
		let (a, b, evaluations) = (a.clone(), b.clone(), evaluations.clone());
		move || {
			bump(&evaluations);
			if a.get() {
				b.get()
			} else {
				0
			}
		}
	});

	assert_eq!(evaluations.get(), 1);
	assert_eq!(c.dependencies_count(), 2);

	a.set(false);
	assert_eq!(evaluations.get(), 2);
	assert_eq!(c.dependencies_count(), 1);
	assert_eq!(b.subscriptions_count(None), 0);

	b.set(5);
	assert_eq!(evaluations.get(), 2);
	assert_eq!(c.get(), 0);
}

#[test]
fn computed_without_dependencies_disposes_itself() {
	let c = Computed::new(|| 42);

	assert!(!c.is_active());
	assert_eq!(c.get(), 42);
	assert_eq!(c.dependencies_count(), 0);
}

#[test]
fn pure_computed_sleeps_without_subscribers() {
	let source = Observable::new(1);
	let evaluations = counter();

	let pure = Computed::pure({
		let (source, evaluations) = (source.clone(), evaluations.clone());
		move || {
			bump(&evaluations);
			source.get() + 1
		}
	});
	assert_eq!(evaluations.get(), 0);
	assert_eq!(pure.node_ref().kind(), Kind::PureComputed);

	let awake = counter();
	pure.on(Event::Awake, {
		let awake = awake.clone();
		move || bump(&awake)
	});

	let subscription = pure.subscribe(|_| {});
	assert_eq!(evaluations.get(), 1);
	assert_eq!(awake.get(), 1);
	assert_eq!(pure.dependencies_count(), 1);
	assert_eq!(source.subscriptions_count(Some(Event::Change)), 1);

	subscription.dispose();
	assert_eq!(pure.dependencies_count(), 1);
	assert_eq!(source.subscriptions_count(None), 0);

	source.set(5);
	assert_eq!(evaluations.get(), 1);

	assert_eq!(pure.get(), 6);
	assert_eq!(pure.get(), 6);
	assert_eq!(evaluations.get(), 2);
}

#[test]
fn sleeping_pure_computed_reuses_its_value() {
	let source = Observable::new(1);
	let evaluations = counter();

	let pure = Computed::pure({
		let (source, evaluations) = (source.clone(), evaluations.clone());
		move || {
			bump(&evaluations);
			source.get() * 3
		}
	});

	assert_eq!(pure.get(), 3);
	assert_eq!(pure.peek(), 3);
	assert_eq!(evaluations.get(), 1);

	// Waking up with unchanged dependencies only resubscribes.
	let subscription = pure.subscribe(|_| {});
	assert_eq!(evaluations.get(), 1);
	assert_eq!(source.subscriptions_count(Some(Event::Change)), 1);

	source.set(2);
	assert_eq!(evaluations.get(), 2);
	subscription.dispose();
}

#[test]
fn reentrant_evaluation_is_ignored() {
	let o = Observable::new(0);
	let evaluations = counter();

	let c = Computed::new({
		let (o, evaluations) = (o.clone(), evaluations.clone());
		move || {
			bump(&evaluations);
			let value = o.get();
			if value < 100 {
				o.set(value + 1);
			}
			value
		}
	});

	assert_eq!(evaluations.get(), 1);
	assert_eq!(c.peek(), 0);
	assert_eq!(o.peek(), 1);

	o.set(10);
	assert_eq!(evaluations.get(), 2);
	assert_eq!(c.peek(), 10);
	assert_eq!(o.peek(), 11);
}

#[test]
#[should_panic(expected = "must not be called recursively")]
fn pure_computed_reading_itself_panics() {
	let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
	let pure = Computed::pure({
		let slot = slot.clone();
		move || slot.borrow().as_ref().map_or(0, |this| this.get()) + 1
	});

	*slot.borrow_mut() = Some(pure.clone());
	pure.get();
}

#[test]
fn writes_go_through_the_write_function() {
	let celsius = Observable::new(0);
	let fahrenheit = Computed::builder()
		.read({
			let celsius = celsius.clone();
			move || celsius.get() * 9 / 5 + 32
		})
		.write({
			let celsius = celsius.clone();
			move |value: i32| celsius.set((value - 32) * 5 / 9)
		})
		.build()
		.unwrap();

	assert!(fahrenheit.has_write_function());
	fahrenheit.set(212).unwrap();
	assert_eq!(celsius.peek(), 100);
	assert_eq!(fahrenheit.get(), 212);
}

#[test]
fn construction_and_write_errors() {
	let constant = Computed::new(|| 1);
	assert!(matches!(constant.set(2), Err(Error::ReadOnly)));

	let missing = Computed::<i32>::builder().pure().build();
	assert!(matches!(missing, Err(Error::MissingReadFunction)));
}

#[test]
fn before_change_carries_the_old_value() {
	let o = Observable::new(1);
	let log = Rc::new(RefCell::new(Vec::new()));

	o.subscribe_to(Event::BeforeChange, {
		let log = log.clone();
		move |old| log.borrow_mut().push(*old)
	});

	o.set(2);
	o.update(|value| *value += 1);
	assert_eq!(*log.borrow(), vec![1, 2]);
	assert_eq!(o.replace(7), 3);
}

#[test]
fn dependencies_are_listed_in_read_order() {
	let a = Observable::new(1);
	let b = Observable::new(2);

	let sum = Computed::new({
		let (a, b) = (a.clone(), b.clone());
		move || b.get() + a.get()
	});
	let doubled = Computed::new({
		let sum = sum.clone();
		move || sum.get() * 2
	});

	assert_eq!(sum.dependencies(), vec![b.node_ref(), a.node_ref()]);
	assert_eq!(doubled.dependencies()[0].kind(), Kind::Computed);
	assert!(doubled.has_ancestor_dependency(&a));
	assert!(!sum.has_ancestor_dependency(&doubled));

	a.set(10);
	assert_eq!(doubled.peek(), 24);
}

#[test]
fn dispose_when_stops_updates() {
	let alive = Rc::new(Cell::new(true));
	let o = Observable::new(1);

	let c = Computed::builder()
		.read({
			let o = o.clone();
			move || o.get()
		})
		.dispose_when({
			let alive = alive.clone();
			move || !alive.get()
		})
		.build()
		.unwrap();

	o.set(2);
	assert_eq!(c.peek(), 2);

	alive.set(false);
	o.set(3);
	assert_eq!(c.peek(), 2);
	assert!(!c.is_active());
	assert_eq!(o.subscriptions_count(None), 0);
}

#[derive(Default)]
struct View {
	attached: Cell<bool>,
	on_detach: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl View {
	fn detach(&self) {
		self.attached.set(false);
		let callbacks = std::mem::take(&mut *self.on_detach.borrow_mut());
		for callback in callbacks {
			callback();
		}
	}
}

impl Resource for View {
	fn is_attached(&self) -> bool {
		self.attached.get()
	}

	fn on_detach(&self, callback: Box<dyn FnOnce()>) {
		self.on_detach.borrow_mut().push(callback);
	}
}

#[test]
fn detached_resource_disposes_computed_and_subscription() {
	let view = Rc::new(View::default());
	view.attached.set(true);

	let o = Observable::new(1);
	let c = Computed::builder()
		.read({
			let o = o.clone();
			move || o.get() + 1
		})
		.dispose_when_detached(view.clone())
		.build()
		.unwrap();

	let subscription = o.subscribe(|_| {});
	subscription.dispose_when_detached(&*view);

	assert!(c.is_active());
	assert_eq!(o.subscriptions_count(Some(Event::Change)), 2);

	view.detach();
	assert!(!c.is_active());
	assert!(subscription.is_disposed());
	assert_eq!(o.subscriptions_count(None), 0);
}

#[test]
fn deferred_evaluation_waits_for_a_subscriber() {
	let evaluations = counter();
	let c = Computed::builder()
		.read({
			let evaluations = evaluations.clone();
			move || {
				bump(&evaluations);
				Observable::new(5).get()
			}
		})
		.defer_evaluation()
		.build()
		.unwrap();

	assert_eq!(evaluations.get(), 0);
	c.subscribe(|_| {});
	assert_eq!(evaluations.get(), 1);
	assert_eq!(c.peek(), 5);
}

#[test]
fn notify_extender_switches_the_comparer() {
	let o = Observable::new(1);
	let mock = mock::SharedMock::new();

	o.subscribe({
		let mock = mock.clone();
		move |value| mock.get().trigger(*value)
	});

	mock.get().expect_trigger().with(eq(1)).times(2).return_const(());
	o.extend(Extender::Notify(NotifyWhen::Always));
	o.set(1);
	o.set(1);
	mock.get().checkpoint();

	mock.get().expect_trigger().times(0).return_const(());
	o.extend(Extender::Notify(NotifyWhen::Changed));
	o.set(1);
	mock.get().checkpoint();
}

#[test]
fn subscription_disposed_during_delivery_is_skipped() {
	let o = Observable::new(0);
	let second: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
	let calls = counter();

	o.subscribe({
		let second = second.clone();
		move |_| {
			if let Some(subscription) = second.borrow().as_ref() {
				subscription.dispose();
			}
		}
	});
	*second.borrow_mut() = Some(o.subscribe({
		let calls = calls.clone();
		move |_| bump(&calls)
	}));

	o.set(1);
	assert_eq!(calls.get(), 0);
	assert_eq!(o.subscriptions_count(Some(Event::Change)), 1);
}

#[test]
fn ignored_reads_are_not_dependencies() {
	let tracked = Observable::new(1);
	let untracked = Observable::new(2);
	let initial = Rc::new(RefCell::new(Vec::new()));

	let c = Computed::new({
		let (tracked, untracked, initial) = (tracked.clone(), untracked.clone(), initial.clone());
		move || {
			initial.borrow_mut().push(evaluation::is_initial());
			tracked.get() + evaluation::ignore(|| untracked.get())
		}
	});

	assert_eq!(c.dependencies_count(), 1);
	untracked.set(10);
	assert_eq!(c.peek(), 3);
	tracked.set(2);
	assert_eq!(c.peek(), 12);
	assert_eq!(*initial.borrow(), vec![Some(true), Some(false)]);
	assert!(!evaluation::is_tracking());
}

#[test]
fn toggle_and_map() {
	let flag = Observable::new(false);
	let label = flag.map(|on| if *on { "on" } else { "off" });

	flag.toggle();
	assert_eq!(label.get(), "on");
}

#[test]
fn macros_clone_their_captures() {
	let price = Observable::new(3);
	let quantity = Observable::new(4);

	let total = depflow::computed!((price, quantity) => price.get() * quantity.get());
	let label = depflow::pure_computed!((total) => format!("total {}", total.get()));

	quantity.set(5);
	assert_eq!(total.get(), 15);
	assert_eq!(label.get(), "total 15");
}

#[test]
fn array_kind_and_changes() {
	let items = ObservableArray::new(vec!["a"]);
	assert_eq!(items.node_ref().kind(), Kind::ObservableArray);

	let lengths = Computed::new({
		let items = items.clone();
		move || items.len()
	});

	items.push("b");
	items.splice(0, 1, vec!["c", "d"]);
	assert_eq!(items.peek(), vec!["c", "d", "b"]);
	assert_eq!(lengths.peek(), 3);
}

#[test]
fn computed_disposed_before_evaluating_has_no_value() {
	let o = Observable::new(1);

	let gone = Computed::builder()
		.read({
			let o = o.clone();
			move || o.get()
		})
		.dispose_when(|| true)
		.build()
		.unwrap();
	assert_eq!(gone.try_peek(), None);
	assert_eq!(gone.try_get(), None);
	assert!(!gone.is_active());

	let deferred = Computed::builder()
		.read({
			let o = o.clone();
			move || o.get()
		})
		.defer_evaluation()
		.build()
		.unwrap();
	deferred.dispose();
	assert_eq!(deferred.try_peek(), None);
	assert_eq!(deferred.try_get(), None);
	assert_eq!(o.subscriptions_count(None), 0);
}

#[test]
fn disposing_a_subscription_that_owns_a_dependent_computed() {
	let o = Observable::new(1);
	let c = Computed::new({
		let o = o.clone();
		move || o.get() + 1
	});
	assert_eq!(o.subscriptions_count(Some(Event::Change)), 1);

	let seen = Rc::new(Cell::new(0));
	let subscription = o.subscribe({
		let seen = seen.clone();
		move |_| seen.set(c.peek())
	});

	o.set(2);
	assert_eq!(seen.get(), 3);

	subscription.dispose();
	assert_eq!(o.subscriptions_count(None), 0);

	o.set(3);
	assert_eq!(seen.get(), 3);
}

#[test]
fn removing_an_array_listener_that_owns_a_dependent_computed() {
	let items = ObservableArray::new(vec![1, 2]);
	let total = Computed::new({
		let items = items.clone();
		move || items.get().iter().sum::<i32>()
	});

	let seen = Rc::new(Cell::new(0));
	let subscription = items.subscribe_array_changes({
		let seen = seen.clone();
		move |_| seen.set(total.peek())
	});

	items.push(3);
	assert_eq!(seen.get(), 6);

	subscription.dispose();
	items.push(4);
	assert_eq!(seen.get(), 6);
	assert_eq!(items.subscriptions_count(None), 0);
}

#[test]
fn custom_limit_policy_decides_when_to_publish() {
	let o = Observable::new(0);
	let requests = counter();
	let flush: Rc<RefCell<Option<Rc<dyn Fn()>>>> = Rc::new(RefCell::new(None));

	o.limit({
		let (requests, flush) = (requests.clone(), flush.clone());
		move |finish: Rc<dyn Fn()>| -> Box<dyn Fn()> {
			*flush.borrow_mut() = Some(finish);
			Box::new(move || bump(&requests))
		}
	});

	let log = Rc::new(RefCell::new(Vec::new()));
	o.subscribe({
		let log = log.clone();
		move |value| log.borrow_mut().push(*value)
	});

	let flush = flush.borrow().clone().unwrap();

	o.set(1);
	o.set(2);
	assert_eq!(requests.get(), 2);
	assert!(log.borrow().is_empty());
	assert_eq!(o.peek(), 2);

	flush();
	assert_eq!(*log.borrow(), vec![2]);

	flush();
	assert_eq!(*log.borrow(), vec![2]);

	o.set(3);
	o.set(2);
	flush();
	assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn pure_computed_announces_going_to_sleep() {
	let source = Observable::new(1);
	let pure = Computed::pure({
		let source = source.clone();
		move || source.get() * 3
	});

	let asleep = counter();
	pure.on(Event::Asleep, {
		let asleep = asleep.clone();
		move || bump(&asleep)
	});
	let valued = counter();
	pure.subscribe_to(Event::Asleep, {
		let valued = valued.clone();
		move |_| bump(&valued)
	});

	let first = pure.subscribe(|_| {});
	let second = pure.subscribe(|_| {});

	first.dispose();
	assert_eq!(asleep.get(), 0);

	second.dispose();
	assert_eq!(asleep.get(), 1);
	assert_eq!(valued.get(), 0);
	assert_eq!(source.subscriptions_count(None), 0);

	pure.subscribe(|_| {}).dispose();
	assert_eq!(asleep.get(), 2);
}
