use std::fmt::Debug;

use crate::{Computed, Kind, Observable, Subscribable};

/// Either a plain value or a node holding one.
///
/// Lets an API accept constants and reactive values alike; [`Value::get`]
/// unwraps either, recording a dependency when there is a node.
pub enum Value<T: 'static> {
	Static(T),
	Observable(Observable<T>),
	Computed(Computed<T>),
}

impl<T> Clone for Value<T>
where
	T: Clone,
{
	fn clone(&self) -> Self {
		match self {
			Value::Static(value) => Value::Static(value.clone()),
			Value::Observable(observable) => Value::Observable(observable.clone()),
			Value::Computed(computed) => Value::Computed(computed.clone()),
		}
	}
}

impl<T> Value<T>
where
	T: Clone + 'static,
{
	pub fn get(&self) -> T {
		match self {
			Value::Static(value) => value.clone(),
			Value::Observable(observable) => observable.get(),
			Value::Computed(computed) => computed.get(),
		}
	}

	pub fn peek(&self) -> T {
		match self {
			Value::Static(value) => value.clone(),
			Value::Observable(observable) => observable.peek(),
			Value::Computed(computed) => computed.peek(),
		}
	}

	/// `None` only for a computed that has not produced a value.
	pub fn try_get(&self) -> Option<T> {
		match self {
			Value::Static(value) => Some(value.clone()),
			Value::Observable(observable) => Some(observable.get()),
			Value::Computed(computed) => computed.try_get(),
		}
	}

	pub fn try_peek(&self) -> Option<T> {
		match self {
			Value::Static(value) => Some(value.clone()),
			Value::Observable(observable) => Some(observable.peek()),
			Value::Computed(computed) => computed.try_peek(),
		}
	}

	/// `None` for a plain value.
	pub fn kind(&self) -> Option<Kind> {
		match self {
			Value::Static(_) => None,
			Value::Observable(observable) => Some(observable.node_ref().kind()),
			Value::Computed(computed) => Some(computed.node_ref().kind()),
		}
	}

	#[inline]
	pub fn is_reactive(&self) -> bool {
		!matches!(self, Value::Static(_))
	}
}

impl<T> From<Observable<T>> for Value<T> {
	fn from(observable: Observable<T>) -> Self {
		Value::Observable(observable)
	}
}

impl<T> From<Computed<T>> for Value<T> {
	fn from(computed: Computed<T>) -> Self {
		Value::Computed(computed)
	}
}

impl<T> Debug for Value<T>
where
	T: Clone + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Static(value) => f.debug_tuple("Static").field(value).finish(),
			Value::Observable(observable) => f.debug_tuple("Observable").field(observable).finish(),
			Value::Computed(computed) => f.debug_tuple("Computed").field(computed).finish(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unwraps_every_variant() {
		let source = Observable::new(2);
		let doubled = source.map(|value| value * 2);

		let values: Vec<Value<i32>> = vec![Value::Static(1), source.clone().into(), doubled.into()];
		assert_eq!(values.iter().map(Value::get).collect::<Vec<_>>(), vec![1, 2, 4]);
		assert_eq!(
			values.iter().map(Value::kind).collect::<Vec<_>>(),
			vec![None, Some(Kind::Observable), Some(Kind::Computed)]
		);

		source.set(5);
		assert_eq!(values[2].peek(), 10);
	}

	#[test]
	fn try_get_reports_a_computed_without_value() {
		let source = Observable::new(1);
		let never = Computed::builder()
			.read({
				let source = source.clone();
				move || source.get()
			})
			.defer_evaluation()
			.build()
			.unwrap();
		never.dispose();

		let values: Vec<Value<i32>> = vec![Value::Static(1), source.into(), never.into()];
		assert_eq!(values.iter().map(Value::try_get).collect::<Vec<_>>(), vec![Some(1), Some(1), None]);
		assert_eq!(values[2].try_peek(), None);
	}
}
