//! Edit scripts between two slices.
//!
//! [`diff_arrays`] runs an edit-distance table limited to a band around the
//! diagonal whose width follows the length difference of the inputs. Edits
//! that move items far outside the band produce a valid but possibly longer
//! script than the minimal one.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
	Retained,
	Added,
	Deleted,
}

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayChange<T> {
	pub status: ChangeStatus,
	pub value: T,
	/// Index in the new slice for additions, in the old slice for
	/// deletions. Retained entries carry no index.
	pub index: Option<usize>,
	/// Index of the matching entry of the opposite status, when the value
	/// was moved rather than added or deleted.
	pub moved: Option<usize>,
}

impl<T> ArrayChange<T> {
	pub fn added(value: T, index: usize) -> Self {
		Self::new(ChangeStatus::Added, value, Some(index))
	}

	pub fn deleted(value: T, index: usize) -> Self {
		Self::new(ChangeStatus::Deleted, value, Some(index))
	}

	pub fn retained(value: T) -> Self {
		Self::new(ChangeStatus::Retained, value, None)
	}

	fn new(status: ChangeStatus, value: T, index: Option<usize>) -> Self {
		ArrayChange {
			status,
			value,
			index,
			moved: None,
		}
	}

	pub fn moved_from(mut self, index: usize) -> Self {
		self.moved = Some(index);
		self
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
	/// Leave retained entries out of the script.
	pub sparse: bool,
	/// Pair every addition with a deletion of an equal value, however long
	/// it takes.
	pub dont_limit_moves: bool,
}

impl CompareOptions {
	pub fn sparse() -> Self {
		CompareOptions {
			sparse: true,
			dont_limit_moves: false,
		}
	}
}

/// Edit script turning `old` into `new`.
pub fn diff_arrays<T>(old: &[T], new: &[T], options: CompareOptions) -> Vec<ArrayChange<T>>
where
	T: Clone + PartialEq,
{
	if old.len() < new.len() {
		compare_small_to_big(old, new, ChangeStatus::Added, ChangeStatus::Deleted, options)
	} else {
		compare_small_to_big(new, old, ChangeStatus::Deleted, ChangeStatus::Added, options)
	}
}

/// Row of the distance table; only the band columns are stored.
struct Row {
	start: usize,
	cells: Vec<usize>,
}

impl Row {
	fn get(&self, column: usize) -> Option<usize> {
		column
			.checked_sub(self.start)
			.and_then(|offset| self.cells.get(offset))
			.copied()
	}
}

fn compare_small_to_big<T>(
	small: &[T],
	big: &[T],
	not_in_small: ChangeStatus,
	not_in_big: ChangeStatus,
	options: CompareOptions,
) -> Vec<ArrayChange<T>>
where
	T: Clone + PartialEq,
{
	let compare_range = (big.len() - small.len()).max(1);
	let max_distance = small.len() + big.len() + 1;

	let mut matrix: Vec<Row> = Vec::with_capacity(small.len() + 1);
	for s in 0..=small.len() {
		let start = s.saturating_sub(1);
		let end = big.len().min(s + compare_range);
		let mut row = Row {
			start,
			cells: Vec::with_capacity(end + 1 - start.min(end)),
		};

		for b in start..=end {
			let distance = if b == 0 {
				s + 1
			} else if s == 0 {
				b + 1
			} else if small[s - 1] == big[b - 1] {
				matrix[s - 1].get(b - 1).unwrap_or(max_distance)
			} else {
				let north = matrix[s - 1].get(b).unwrap_or(max_distance);
				let west = row.get(b - 1).unwrap_or(max_distance);
				north.min(west) + 1
			};
			row.cells.push(distance);
		}

		matrix.push(row);
	}

	let cell = |s: usize, b: usize| matrix.get(s).and_then(|row| row.get(b));

	let mut script = Vec::new();
	let mut not_in_small_entries = Vec::new();
	let mut not_in_big_entries = Vec::new();

	let (mut s, mut b) = (small.len(), big.len());
	while s > 0 || b > 0 {
		let me_minus_one = cell(s, b).unwrap_or(max_distance).saturating_sub(1);

		if b > 0 && cell(s, b - 1) == Some(me_minus_one) {
			b -= 1;
			not_in_small_entries.push(script.len());
			script.push(ArrayChange::new(not_in_small, big[b].clone(), Some(b)));
		} else if s > 0 && cell(s - 1, b) == Some(me_minus_one) {
			s -= 1;
			not_in_big_entries.push(script.len());
			script.push(ArrayChange::new(not_in_big, small[s].clone(), Some(s)));
		} else if s > 0 && b > 0 {
			s -= 1;
			b -= 1;
			if !options.sparse {
				script.push(ArrayChange::retained(big[b].clone()));
			}
		} else if b > 0 {
			b -= 1;
			not_in_small_entries.push(script.len());
			script.push(ArrayChange::new(not_in_small, big[b].clone(), Some(b)));
		} else {
			s -= 1;
			not_in_big_entries.push(script.len());
			script.push(ArrayChange::new(not_in_big, small[s].clone(), Some(s)));
		}
	}

	let limit = match options.dont_limit_moves || small.is_empty() {
		true => None,
		false => Some(small.len() * 10),
	};

	let pairs = {
		let left: Vec<&ArrayChange<T>> = not_in_big_entries.iter().map(|&i| &script[i]).collect();
		let right: Vec<&ArrayChange<T>> = not_in_small_entries.iter().map(|&i| &script[i]).collect();
		pair_moves(&left, &right, limit)
	};

	for (l, r) in pairs {
		let (l, r) = (not_in_big_entries[l], not_in_small_entries[r]);
		let (left_index, right_index) = (script[l].index, script[r].index);
		script[l].moved = right_index;
		script[r].moved = left_index;
	}

	script.reverse();
	script
}

/// Mark additions and deletions of equal values as moves of each other.
///
/// Each entry of `left` is paired with the first unpaired entry of `right`
/// holding an equal value; both get the other's index in `moved`. Once more
/// than `limit_failed_compares` comparisons in a row found no match the
/// search stops.
pub fn find_moves_in_array_comparison<T>(
	left: &mut [ArrayChange<T>],
	right: &mut [ArrayChange<T>],
	limit_failed_compares: Option<usize>,
) where
	T: PartialEq,
{
	let pairs = {
		let left: Vec<&ArrayChange<T>> = left.iter().collect();
		let right: Vec<&ArrayChange<T>> = right.iter().collect();
		pair_moves(&left, &right, limit_failed_compares)
	};

	for (l, r) in pairs {
		left[l].moved = right[r].index;
		right[r].moved = left[l].index;
	}
}

fn pair_moves<T>(left: &[&ArrayChange<T>], right: &[&ArrayChange<T>], limit: Option<usize>) -> Vec<(usize, usize)>
where
	T: PartialEq,
{
	let mut pairs = Vec::new();
	if left.is_empty() || right.is_empty() {
		return pairs;
	}

	let mut remaining: Vec<usize> = (0..right.len()).collect();
	let mut failed_compares = 0;

	for (l, item) in left.iter().enumerate() {
		if limit.map_or(false, |limit| failed_compares >= limit) {
			break;
		}

		match remaining.iter().position(|&r| right[r].value == item.value) {
			Some(position) => {
				pairs.push((l, remaining.remove(position)));
				failed_compares = 0;
			}
			None => failed_compares += remaining.len(),
		}
	}

	pairs
}
