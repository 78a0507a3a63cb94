use ids::{LogIndex, NodeId, Term};

/// A single entry in a replica's log.
///
/// Immutable once appended except by conflict truncation (see `ReplicatedLog::truncate_from`),
/// which only ever removes a suffix, never mutates an entry in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	pub term: Term,
	pub index: LogIndex,
	/// Opaque command payload. The replica never interprets this.
	pub command: String,
	/// The client that originated the command.
	pub client_id: NodeId,
	/// The leader that accepted the command into its log.
	pub leader_id: NodeId,
}

/// The ordered sequence of `LogEntry` on one replica, indexed from zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicatedLog {
	entries: Vec<LogEntry>,
}

impl ReplicatedLog {
	pub fn new() -> Self {
		ReplicatedLog { entries: Vec::new() }
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
		self.entries.get(index as usize)
	}

	pub fn term_at(&self, index: LogIndex) -> Option<Term> {
		self.get(index).map(|e| e.term)
	}

	/// Index of the next slot a new entry would occupy.
	pub fn next_index(&self) -> LogIndex {
		self.entries.len() as LogIndex
	}

	/// `(lastLogIndex, lastLogTerm)` per the Up-To-Date predicate. `(0, 0)` when empty: real
	/// entries never carry term 0 (terms only advance once an election happens), so an empty
	/// log can never be mistaken for a one-entry log at index 0 when compared by term first.
	pub fn last_log_index_term(&self) -> (LogIndex, Term) {
		match self.entries.last() {
			Some(e) => (e.index, e.term),
			None => (0, 0),
		}
	}

	/// Whether a candidate whose own log ends at `(candidate_last_index, candidate_last_term)`
	/// is at least as up-to-date as this log, per the Raft Up-To-Date predicate.
	pub fn is_as_up_to_date(&self, candidate_last_index: LogIndex, candidate_last_term: Term) -> bool {
		let (our_last_index, our_last_term) = self.last_log_index_term();
		candidate_last_term > our_last_term
			|| (candidate_last_term == our_last_term && candidate_last_index >= our_last_index)
	}

	pub fn push(&mut self, entry: LogEntry) {
		self.entries.push(entry);
	}

	/// Drops every entry from `index` (inclusive) to the end. A no-op if `index >= len()`.
	pub fn truncate_from(&mut self, index: LogIndex) {
		self.entries.truncate(index as usize);
	}

	/// Entries at or after `index`, for a leader to ship to a lagging follower.
	pub fn entries_from(&self, index: LogIndex) -> Vec<LogEntry> {
		let start = (index as usize).min(self.entries.len());
		self.entries[start..].to_vec()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(index: LogIndex, term: Term) -> LogEntry {
		LogEntry { term, index, command: format!("cmd-{}", index), client_id: 100, leader_id: 1 }
	}

	#[test]
	fn empty_log_reports_zero_sentinel() {
		let log = ReplicatedLog::new();
		assert_eq!(log.last_log_index_term(), (0, 0));
	}

	#[test]
	fn up_to_date_prefers_higher_term_then_longer_log() {
		let mut log = ReplicatedLog::new();
		log.push(entry(0, 1));
		log.push(entry(1, 1));

		// Same term, candidate has one more entry: up to date.
		assert!(log.is_as_up_to_date(2, 1));
		// Same term, candidate is shorter: not up to date.
		assert!(!log.is_as_up_to_date(0, 1));
		// Lower term regardless of length: not up to date.
		assert!(!log.is_as_up_to_date(5, 0));
		// Higher term regardless of length: up to date.
		assert!(log.is_as_up_to_date(0, 2));
	}

	#[test]
	fn truncate_from_drops_suffix_only() {
		let mut log = ReplicatedLog::new();
		log.push(entry(0, 1));
		log.push(entry(1, 1));
		log.push(entry(2, 2));

		log.truncate_from(1);
		assert_eq!(log.len(), 1);
		assert_eq!(log.get(0).unwrap().term, 1);
		assert!(log.get(1).is_none());
	}

	#[test]
	fn entries_from_clamps_past_the_end() {
		let mut log = ReplicatedLog::new();
		log.push(entry(0, 1));
		assert!(log.entries_from(5).is_empty());
		assert_eq!(log.entries_from(0).len(), 1);
	}
}
