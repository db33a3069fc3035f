//! Greedy packing of instruction groups into size-bounded transactions.

use super::builder::TransactionError;
use std::ops::Range;
use tracing::debug;

/// One closed batch produced by [`pack_groups`].
#[derive(Debug, Clone)]
pub struct Batch<T> {
	/// Compiled output for the batch.
	pub compiled: T,
	/// Indices of the input groups in this batch.
	pub groups: Range<usize>,
	pub serialized_len: usize,
}

/// Pack `groups` into as few batches as the greedy order allows.
///
/// Groups are added whole, in order. After each addition the candidate is compiled with
/// `compile`, which returns the compiled output and its serialized length. A candidate that
/// fits in `size_limit` is committed; otherwise the committed batch is closed and the
/// overflowing group starts the next one. A group that does not fit even on its own yields
/// [`TransactionError::GroupTooLarge`].
pub fn pack_groups<I, T, F>(
	groups: &[Vec<I>],
	size_limit: usize,
	mut compile: F,
) -> Result<Vec<Batch<T>>, TransactionError>
where
	I: Clone,
	F: FnMut(&[I]) -> Result<(T, usize), TransactionError>,
{
	let mut batches = Vec::new();
	let mut candidate: Vec<I> = Vec::new();
	let mut committed: Option<(T, usize)> = None;
	let mut start = 0;

	for (index, group) in groups.iter().enumerate() {
		let mut extended = candidate.clone();
		extended.extend(group.iter().cloned());
		match compile(&extended) {
			Ok((compiled, len)) if len <= size_limit => {
				candidate = extended;
				committed = Some((compiled, len));
				continue;
			}
			Ok((_, len)) => debug!("Group {} overflows batch ({} > {})", index, len, size_limit),
			Err(e) => debug!("Group {} does not compile into batch: {}", index, e),
		}

		let Some((compiled, len)) = committed.take() else {
			// The candidate was empty, so the group alone is the problem.
			return Err(too_large(index, compile(&extended)));
		};
		batches.push(Batch {
			compiled,
			groups: start..index,
			serialized_len: len,
		});

		start = index;
		candidate = group.clone();
		match compile(&candidate) {
			Ok((compiled, len)) if len <= size_limit => committed = Some((compiled, len)),
			result => return Err(too_large(index, result)),
		}
	}

	if let Some((compiled, len)) = committed {
		batches.push(Batch {
			compiled,
			groups: start..groups.len(),
			serialized_len: len,
		});
	}
	Ok(batches)
}

fn too_large<T>(index: usize, result: Result<(T, usize), TransactionError>) -> TransactionError {
	match result {
		Ok((_, len)) => TransactionError::GroupTooLarge {
			index,
			reason: format!("{} bytes", len),
		},
		Err(e) => TransactionError::GroupTooLarge {
			index,
			reason: e.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const OVERHEAD: usize = 100;

	/// Stand-in compiler: fixed envelope plus the payload sizes.
	fn compile(items: &[usize]) -> Result<(Vec<usize>, usize), TransactionError> {
		Ok((items.to_vec(), OVERHEAD + items.iter().sum::<usize>()))
	}

	#[test]
	fn test_three_groups_split_in_two() {
		let groups = vec![vec![400], vec![400], vec![400]];
		let batches = pack_groups(&groups, OVERHEAD + 900, compile).expect("Failed to pack");

		assert_eq!(batches.len(), 2);
		assert_eq!(batches[0].groups, 0..2);
		assert_eq!(batches[0].compiled, vec![400, 400]);
		assert_eq!(batches[1].groups, 2..3);
		assert_eq!(batches[1].compiled, vec![400]);
		assert!(batches.iter().all(|b| b.serialized_len <= OVERHEAD + 900));
	}

	#[test]
	fn test_everything_fits_in_one() {
		let groups = vec![vec![10, 20], vec![30], vec![40, 50]];
		let batches = pack_groups(&groups, 1000, compile).expect("Failed to pack");

		assert_eq!(batches.len(), 1);
		assert_eq!(batches[0].groups, 0..3);
		assert_eq!(batches[0].compiled, vec![10, 20, 30, 40, 50]);
	}

	#[test]
	fn test_groups_are_never_split() {
		let groups = vec![vec![300], vec![200, 200], vec![100]];
		let batches = pack_groups(&groups, OVERHEAD + 500, compile).expect("Failed to pack");

		let compiled: Vec<Vec<usize>> = batches.iter().map(|b| b.compiled.clone()).collect();
		assert_eq!(compiled, vec![vec![300], vec![200, 200, 100]]);
	}

	#[test]
	fn test_oversized_group_is_an_error() {
		let groups = vec![vec![100], vec![2000], vec![100]];
		match pack_groups(&groups, 1000, compile) {
			Err(TransactionError::GroupTooLarge { index, .. }) => assert_eq!(index, 1),
			other => panic!("Unexpected result: {:?}", other.map(|b| b.len())),
		}

		let first = vec![vec![5000]];
		assert!(matches!(
			pack_groups(&first, 1000, compile),
			Err(TransactionError::GroupTooLarge { index: 0, .. })
		));
	}

	#[test]
	fn test_compile_failure_closes_batch() {
		// Batches with more than two items fail to compile.
		let limited = |items: &[usize]| {
			if items.len() > 2 {
				Err(TransactionError::Compile("too many accounts".to_string()))
			} else {
				compile(items)
			}
		};
		let groups = vec![vec![1], vec![1], vec![1]];
		let batches = pack_groups(&groups, 1000, limited).expect("Failed to pack");
		assert_eq!(batches.len(), 2);
		assert_eq!(batches[1].groups, 2..3);
	}

	#[test]
	fn test_no_groups() {
		let groups: Vec<Vec<usize>> = Vec::new();
		assert!(pack_groups(&groups, 1000, compile)
			.expect("Failed to pack")
			.is_empty());
	}
}
