use std::collections::{HashMap, VecDeque};

use ids::{LogIndex, NodeId};

/// One command accepted by a leader, waiting for its commit to be acknowledged back to the
/// client that submitted it.
#[derive(Clone, Debug)]
pub struct PendingAck {
	pub index: LogIndex,
	pub client_id: NodeId,
	/// The leader that accepted the entry. Carried alongside the index/client so that if this
	/// replica steps down before the entry's commit is observed, the response correctly
	/// reports `committed: false` (see `Role::Leader` popping logic in `replica`).
	pub leader_id: NodeId,
}

/// Volatile state that only makes sense while a replica is LEADER.
///
/// Kept inside the `Leader` variant of `Role` rather than as always-present fields on the
/// replica so that non-leader code can't accidentally read or mutate stale per-follower state
/// left over from a previous term (the cyclic role/timer structure the design notes call out).
#[derive(Clone, Debug, Default)]
pub struct LeaderState {
	pub next_index: HashMap<NodeId, LogIndex>,
	pub match_index: HashMap<NodeId, Option<LogIndex>>,
	pub pending_acks: VecDeque<PendingAck>,
}

impl LeaderState {
	/// Initializes per-follower indices the moment a candidate wins an election: every peer
	/// starts optimistically assumed to be fully caught up.
	pub fn new(peers: &[NodeId], next_index: LogIndex) -> Self {
		let mut next = HashMap::new();
		let mut matched = HashMap::new();
		for &peer in peers {
			next.insert(peer, next_index);
			matched.insert(peer, None);
		}
		LeaderState { next_index: next, match_index: matched, pending_acks: VecDeque::new() }
	}
}

/// The replica's role, tagged with exactly the data that role needs.
///
/// `Candidate` carries its own vote tally so a late `VoteResponse` from a prior term/role can't
/// be mistaken for progress toward the current election (the replica still double-checks
/// `term` and role before counting a grant; see `replica::handle_vote_response`).
#[derive(Clone, Debug)]
pub enum Role {
	Dead,
	Follower,
	Candidate { votes_received: usize },
	Leader(LeaderState),
}

impl Role {
	pub fn is_dead(&self) -> bool {
		matches!(self, Role::Dead)
	}

	pub fn is_leader(&self) -> bool {
		matches!(self, Role::Leader(_))
	}

	pub fn is_candidate(&self) -> bool {
		matches!(self, Role::Candidate { .. })
	}

	pub fn as_leader(&self) -> Option<&LeaderState> {
		match self {
			Role::Leader(state) => Some(state),
			_ => None,
		}
	}

	pub fn as_leader_mut(&mut self) -> Option<&mut LeaderState> {
		match self {
			Role::Leader(state) => Some(state),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Role::Dead => "DEAD",
			Role::Follower => "FOLLOWER",
			Role::Candidate { .. } => "CANDIDATE",
			Role::Leader(_) => "LEADER",
		}
	}
}
