//! Host primitives: a microtask queue and timers.
//!
//! The task scheduler and the rate-limit extenders never block; they hand
//! callbacks to the current [`Platform`]. On `wasm32` the default is the
//! browser event loop. Everywhere else the default is a [`ManualPlatform`]
//! that the host drives explicitly.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TimerId(pub(crate) u64);

pub trait Platform {
	/// Run `task` once the current turn completes.
	fn queue_microtask(&self, task: Box<dyn FnOnce()>);

	fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId;

	fn clear_timeout(&self, id: TimerId);
}

thread_local! {
	static PLATFORM: RefCell<Option<Rc<dyn Platform>>> = const { RefCell::new(None) };
}

/// The platform in use on this thread, initialized to the default one.
pub fn current() -> Rc<dyn Platform> {
	PLATFORM.with(|platform| platform.borrow_mut().get_or_insert_with(default_platform).clone())
}

/// Replace the platform used on this thread.
pub fn set(platform: Rc<dyn Platform>) {
	PLATFORM.with(|current| *current.borrow_mut() = Some(platform));
}

#[cfg(not(target_arch = "wasm32"))]
fn default_platform() -> Rc<dyn Platform> {
	Rc::new(ManualPlatform::default())
}

#[cfg(target_arch = "wasm32")]
fn default_platform() -> Rc<dyn Platform> {
	Rc::new(browser::BrowserPlatform)
}

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserPlatform;

#[cfg(target_arch = "wasm32")]
mod browser {
	use std::time::Duration;

	use wasm_bindgen::prelude::*;

	use super::{Platform, TimerId};

	#[wasm_bindgen]
	extern "C" {
		#[wasm_bindgen(js_name = queueMicrotask)]
		fn queue_microtask(closure: &JsValue);

		#[wasm_bindgen(js_name = setTimeout)]
		fn set_timeout(closure: &JsValue, millis: i32) -> i32;

		#[wasm_bindgen(js_name = clearTimeout)]
		fn clear_timeout(handle: i32);
	}

	/// Browser event loop: `queueMicrotask` and `setTimeout`.
	pub struct BrowserPlatform;

	impl Platform for BrowserPlatform {
		fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
			queue_microtask(&Closure::once_into_js(move || task()));
		}

		fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
			let millis = delay.as_millis().min(i32::MAX as u128) as i32;
			let handle = set_timeout(&Closure::once_into_js(move || task()), millis);
			TimerId(handle as u64)
		}

		fn clear_timeout(&self, id: TimerId) {
			clear_timeout(id.0 as i32)
		}
	}
}

/// A virtual clock driven by the host.
///
/// Microtasks run on [`ManualPlatform::run_microtasks`]; timers fire, in
/// due order, on [`ManualPlatform::advance`], each followed by the
/// microtasks it queued.
#[derive(Default)]
pub struct ManualPlatform {
	now: Cell<Duration>,
	next_timer: Cell<u64>,
	microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
	timers: RefCell<BTreeMap<(Duration, u64), Box<dyn FnOnce()>>>,
}

impl ManualPlatform {
	/// Create a manual platform and make it current on this thread.
	pub fn install() -> Rc<ManualPlatform> {
		let platform = Rc::new(ManualPlatform::default());
		set(platform.clone());
		platform
	}

	pub fn now(&self) -> Duration {
		self.now.get()
	}

	pub fn pending_microtasks(&self) -> usize {
		self.microtasks.borrow().len()
	}

	pub fn pending_timers(&self) -> usize {
		self.timers.borrow().len()
	}

	/// Run queued microtasks, including the ones they queue. Returns how
	/// many ran.
	pub fn run_microtasks(&self) -> usize {
		let mut count = 0;
		loop {
			let task = self.microtasks.borrow_mut().pop_front();
			match task {
				Some(task) => {
					task();
					count += 1;
				}
				None => return count,
			}
		}
	}

	/// Move the clock forward, firing every timer that comes due.
	pub fn advance(&self, by: Duration) {
		let target = self.now.get() + by;
		loop {
			let due = {
				let mut timers = self.timers.borrow_mut();
				match timers.keys().next().copied() {
					Some(key) if key.0 <= target => timers.remove(&key).map(|task| (key.0, task)),
					_ => None,
				}
			};

			match due {
				Some((at, task)) => {
					self.now.set(at);
					task();
					self.run_microtasks();
				}
				None => break,
			}
		}
		self.now.set(target);
	}
}

impl Platform for ManualPlatform {
	fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
		self.microtasks.borrow_mut().push_back(task);
	}

	fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
		let id = self.next_timer.get() + 1;
		self.next_timer.set(id);
		self.timers
			.borrow_mut()
			.insert((self.now.get() + delay, id), task);
		TimerId(id)
	}

	fn clear_timeout(&self, id: TimerId) {
		self.timers.borrow_mut().retain(|key, _| key.1 != id.0);
	}
}
