/// Identifies a node on the message bus. Stable for the lifetime of a run.
///
/// Ids partition by convention into a single controller (id 0), the replicas (1..=N), and the
/// clients (N+1..=N+M), see the launcher arguments in the crate-level docs of `raft-cli`.
pub type NodeId = u32;

/// A Raft election term. Monotonically non-decreasing; larger always wins.
pub type Term = u64;

/// A zero-based position into a replica's local log.
pub type LogIndex = u64;

/// `floor(n/2) + 1`, the size of a quorum out of `n` voting replicas.
pub fn majority(n: usize) -> usize {
	n / 2 + 1
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn majority_of_common_cluster_sizes() {
		assert_eq!(majority(1), 1);
		assert_eq!(majority(3), 2);
		assert_eq!(majority(4), 3);
		assert_eq!(majority(5), 3);
	}
}
