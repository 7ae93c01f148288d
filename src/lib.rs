//! Dependency-tracking observables.
//!
//! An [`Observable`] is a mutable cell. A [`Computed`] is a memoized value
//! produced by a read function; every observable the function touches while
//! it runs becomes a dependency, and the computed re-evaluates when one of
//! them changes. Notifications can be batched with [`Extender`]s which route
//! them through the [`tasks`] queue or the platform timers.

pub mod macros;

mod array;
mod computed;
pub mod diff;
pub mod error;
pub mod evaluation;
mod extenders;
mod limit;
mod node;
mod observable;
pub mod options;
pub mod platform;
mod subscribable;
mod subscription;
pub mod tasks;
mod value;

use std::rc::{Rc, Weak};

use smallvec::SmallVec;

pub use array::ObservableArray;
pub use computed::{Computed, ComputedBuilder, Resource};
pub use diff::{diff_arrays, ArrayChange, ChangeStatus, CompareOptions};
pub use error::Error;
pub use extenders::{Extender, NotifyWhen, RateLimit, RateLimitMethod};
pub use node::NodeRef;
pub use observable::{Observable, Toggle};
pub use subscribable::{Event, Subscribable};
pub use subscription::Subscription;
pub use value::Value;

/// Lazily assigned, monotonically increasing identity of a node.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct NodeId(pub(crate) u64);

/// What a node is, queried without downcasting.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Kind {
	Observable,
	ObservableArray,
	Computed,
	PureComputed,
}

/// The side of a node that a computed reads from.
pub(crate) trait Dependency: 'static {
	fn id(&self) -> NodeId;

	fn kind(&self) -> Kind;

	/// Current version. A sleeping pure computed may re-evaluate here
	/// so the number it reports is never stale.
	fn version(&self) -> u64;

	fn has_changed(&self, version: u64) -> bool {
		self.version() != version
	}

	/// Attach `derived` so it hears about changes of this node.
	fn subscribe_derived(&self, derived: Weak<dyn Derived>) -> SmallVec<[Subscription; 2]>;

	fn notification_is_pending(&self) -> bool;

	fn notify_next_change_if_value_is_different(&self);

	fn has_ancestor_dependency(&self, id: NodeId) -> bool;
}

/// The side of a computed that its dependencies call back into.
pub(crate) trait Derived: 'static {
	/// A plain dependency changed.
	fn evaluate_possibly_async(&self);

	/// A deferred dependency delivered its batched change.
	fn respond_to_change(&self);

	/// A deferred dependency announced that it will change.
	fn mark_dirty(&self);
}

/// Receives the dependencies detected while a frame is on top of the stack.
pub(crate) trait Tracker {
	fn based_on(&self, dependency: Rc<dyn Dependency>, id: NodeId);

	fn dependencies_count(&self) -> usize;
}
