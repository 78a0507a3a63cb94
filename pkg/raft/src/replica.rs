use std::collections::VecDeque;

use bus::MessageBus;
use clock::{Clock, ElectionTimer, HEARTBEAT_INTERVAL_MS};
use entries::LogEntry;
use errors::*;
use ids::{majority, LogIndex, NodeId, Term};
use message::{Envelope, MessageBody, Speed};
use state::{LeaderState, PendingAck, Role};
use storage::{PersistentState, Store};

/// A single Raft replica: FOLLOWER, CANDIDATE, LEADER, or DEAD, together with its persistent
/// state and the bits of volatile state every role needs.
///
/// `run`/`step` implement one loop iteration: drain the controller inbox and process at most
/// one control message, then (unless DEAD) drain peer/client messages into a local queue,
/// process at most one per throttle tick, advance commit progress, and perform this role's
/// periodic action.
pub struct Replica<B: MessageBus, S: Store, C: Clock> {
	id: NodeId,
	/// Every other replica id in the cluster (never includes `id`).
	peers: Vec<NodeId>,
	/// Every non-controller, non-self node id this replica might receive peer/client traffic
	/// from: `peers` plus every client id. Polled in this fixed order each iteration so that,
	/// per sender, older messages are always drained before newer ones.
	others: Vec<NodeId>,
	controller_id: NodeId,

	bus: B,
	store: S,
	clock: C,

	role: Role,
	persistent: PersistentState,
	commit_index: Option<LogIndex>,
	last_applied: Option<LogIndex>,

	election_timer: ElectionTimer,
	/// Set by `ElectionTimeoutRequest` while DEAD; consumed (used once, then cleared) on the
	/// next `StartRequest`.
	pending_election_timeout_override: Option<u64>,

	speed: Speed,
	/// Local FIFO peer/client messages are drained into, then processed one at a time at the
	/// pace `speed` allows.
	inbox: VecDeque<Envelope>,
	last_processed_ms: u64,
	/// When the leader last sent an `AppendEntriesRequest` to every peer, whether as a
	/// heartbeat or because a command arrived. Reset on every send so an immediate broadcast
	/// (e.g. for a just-accepted command) pushes the next heartbeat back by a full interval
	/// instead of firing redundantly on the next tick.
	last_heartbeat_ms: u64,
}

impl<B: MessageBus, S: Store, C: Clock> Replica<B, S, C> {
	pub fn new(
		id: NodeId,
		peers: Vec<NodeId>,
		clients: Vec<NodeId>,
		controller_id: NodeId,
		bus: B,
		store: S,
		clock: C,
	) -> Result<Self> {
		let persistent = if store.has_data() {
			store.get()?
		} else {
			PersistentState::default()
		};

		let mut others = peers.clone();
		others.extend(clients);

		Ok(Replica {
			id,
			peers,
			others,
			controller_id,
			bus,
			store,
			clock,
			role: Role::Dead,
			persistent,
			commit_index: None,
			last_applied: None,
			election_timer: ElectionTimer::new(id as u64),
			pending_election_timeout_override: None,
			speed: Speed::None,
			inbox: VecDeque::new(),
			last_processed_ms: 0,
			last_heartbeat_ms: 0,
		})
	}

	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn role_name(&self) -> &'static str {
		self.role.name()
	}

	pub fn current_term(&self) -> Term {
		self.persistent.current_term
	}

	pub fn commit_index(&self) -> Option<LogIndex> {
		self.commit_index
	}

	pub fn log_len(&self) -> usize {
		self.persistent.log.len()
	}

	pub fn log_entry(&self, index: LogIndex) -> Option<&LogEntry> {
		self.persistent.log.get(index)
	}

	/// Runs until an `Exit` control message is processed (or a fatal storage error occurs).
	pub fn run(&mut self) -> Result<()> {
		while self.step()? {}
		Ok(())
	}

	/// One loop iteration. Returns `Ok(false)` once `Exit` has been processed, at which point
	/// the caller should stop calling `step`.
	pub fn step(&mut self) -> Result<bool> {
		if let Some(msg) = self.bus.receive(self.controller_id) {
			if !self.handle_control(msg.body)? {
				return Ok(false);
			}
		}

		if !self.role.is_dead() {
			self.drain_inbox();
			self.process_one_queued_message()?;
			self.advance_commits();
			self.periodic_action()?;
		}

		Ok(true)
	}

	// ---- controller messages ----------------------------------------------------------

	/// Processes one control message. Returns `Ok(false)` for `Exit`, `Ok(true)` otherwise.
	fn handle_control(&mut self, body: MessageBody) -> Result<bool> {
		match body {
			MessageBody::StartRequest => self.handle_start()?,
			MessageBody::CrashRequest => self.handle_crash(),
			MessageBody::ElectionTimeoutRequest { timeout_ms } => {
				if self.role.is_dead() {
					self.pending_election_timeout_override = Some(timeout_ms);
				}
			}
			MessageBody::SpeedRequest { speed } => {
				self.speed = speed;
			}
			MessageBody::Exit => return Ok(false),
			other => {
				warn!("replica {}: unexpected control message {:?}", self.id, other);
			}
		}
		Ok(true)
	}

	fn handle_start(&mut self) -> Result<()> {
		self.role = Role::Follower;
		let now = self.clock.now_ms();
		match self.pending_election_timeout_override.take() {
			Some(timeout_ms) => self.election_timer.reset_fixed(now, timeout_ms),
			None => self.election_timer.reset_random(now),
		}
		info!("replica {}: started as FOLLOWER (term {})", self.id, self.persistent.current_term);
		Ok(())
	}

	fn handle_crash(&mut self) {
		self.role = Role::Dead;
		self.inbox.clear();
		// commit_index/last_applied are volatile and reset on restart along with role, but we
		// leave them alone here: I8 only requires commit_index be non-decreasing *while a term
		// is active* on one replica, and a crashed replica has no active term until restarted,
		// at which point it recomputes everything from persistent state plus fresh traffic.
		info!("replica {}: crashed", self.id);
	}

	// ---- inbox draining & throttling ---------------------------------------------------

	fn drain_inbox(&mut self) {
		for &sender in &self.others.clone() {
			while let Some(msg) = self.bus.receive(sender) {
				self.inbox.push_back(msg);
			}
		}
	}

	fn process_one_queued_message(&mut self) -> Result<()> {
		let interval = self.speed.interval_ms();
		let now = self.clock.now_ms();
		if now.saturating_sub(self.last_processed_ms) < interval {
			return Ok(());
		}
		if let Some(msg) = self.inbox.pop_front() {
			self.last_processed_ms = now;
			self.handle_peer_message(msg)?;
		}
		Ok(())
	}

	fn handle_peer_message(&mut self, msg: Envelope) -> Result<()> {
		let source = msg.source;
		match msg.body {
			MessageBody::VoteRequest { term, candidate_id, last_log_index, last_log_term } => {
				self.handle_vote_request(source, term, candidate_id, last_log_index, last_log_term)
			}
			MessageBody::VoteResponse { term, granted } => {
				self.handle_vote_response(source, term, granted)
			}
			MessageBody::AppendEntriesRequest { term, prev_log, entries, leader_commit_index } => {
				self.handle_append_entries_request(source, term, prev_log, entries, leader_commit_index)
			}
			MessageBody::AppendEntriesResponse { term, success, nb_log_entries } => {
				self.handle_append_entries_response(source, term, success, nb_log_entries)
			}
			MessageBody::CommandEntryRequest { command } => {
				self.handle_command_entry_request(source, command)
			}
			MessageBody::SearchLeaderRequest => self.handle_search_leader_request(source),
			other => {
				debug!("replica {}: dropping unexpected peer message {:?}", self.id, other);
				Ok(())
			}
		}
	}

	// ---- term/role transitions ----------------------------------------------------------

	fn persist(&mut self) -> Result<()> {
		self.store.save(&self.persistent)
	}

	/// Adopts a higher observed term and steps down to FOLLOWER, per the table row that applies
	/// uniformly regardless of the replica's current role.
	fn step_down(&mut self, term: Term) -> Result<()> {
		self.persistent.current_term = term;
		self.persistent.voted_for = None;
		self.role = Role::Follower;
		self.persist()?;
		self.election_timer.reset_random(self.clock.now_ms());
		Ok(())
	}

	fn begin_election(&mut self) -> Result<()> {
		self.persistent.current_term += 1;
		self.persistent.voted_for = Some(self.id);
		self.persist()?;

		self.role = Role::Candidate { votes_received: 1 };
		self.election_timer.reset_random(self.clock.now_ms());

		let (last_log_index, last_log_term) = self.persistent.log.last_log_index_term();
		let term = self.persistent.current_term;
		for &peer in &self.peers.clone() {
			self.bus.send(Envelope::new(
				self.id,
				peer,
				MessageBody::VoteRequest { term, candidate_id: self.id, last_log_index, last_log_term },
			));
		}
		info!("replica {}: became CANDIDATE for term {}", self.id, term);
		Ok(())
	}

	fn become_leader(&mut self) -> Result<()> {
		let next_index = self.persistent.log.next_index();
		self.role = Role::Leader(LeaderState::new(&self.peers, next_index));
		info!("replica {}: became LEADER for term {}", self.id, self.persistent.current_term);
		self.broadcast_append_entries()
	}

	// ---- periodic action -----------------------------------------------------------------

	fn periodic_action(&mut self) -> Result<()> {
		let now = self.clock.now_ms();
		match self.role {
			Role::Follower | Role::Candidate { .. } => {
				if self.election_timer.is_elapsed(now) {
					self.begin_election()?;
				}
			}
			Role::Leader(_) => {
				if now.saturating_sub(self.last_heartbeat_ms) >= HEARTBEAT_INTERVAL_MS {
					self.broadcast_append_entries()?;
				}
			}
			Role::Dead => {}
		}
		Ok(())
	}

	fn broadcast_append_entries(&mut self) -> Result<()> {
		self.last_heartbeat_ms = self.clock.now_ms();
		let term = self.persistent.current_term;
		let commit_index = self.commit_index;

		let next_indices: Vec<(NodeId, LogIndex)> = match self.role.as_leader() {
			Some(leader_state) => self
				.peers
				.iter()
				.map(|&peer| (peer, *leader_state.next_index.get(&peer).unwrap_or(&0)))
				.collect(),
			None => return Ok(()),
		};

		for (peer, next_index) in next_indices {
			let entries = self.persistent.log.entries_from(next_index);
			let prev_log = if next_index > 0 {
				let prev_index = next_index - 1;
				self.persistent.log.term_at(prev_index).map(|t| (prev_index, t))
			} else {
				None
			};
			self.bus.send(Envelope::new(
				self.id,
				peer,
				MessageBody::AppendEntriesRequest {
					term,
					prev_log,
					entries,
					leader_commit_index: commit_index,
				},
			));
		}
		Ok(())
	}

	// ---- handlers --------------------------------------------------------------------

	fn handle_vote_request(
		&mut self,
		source: NodeId,
		term: Term,
		candidate_id: NodeId,
		last_log_index: LogIndex,
		last_log_term: Term,
	) -> Result<()> {
		if term > self.persistent.current_term {
			self.step_down(term)?;
		}

		let granted = term == self.persistent.current_term
			&& (self.persistent.voted_for.is_none() || self.persistent.voted_for == Some(candidate_id))
			&& self.persistent.log.is_as_up_to_date(last_log_index, last_log_term);

		if granted {
			self.persistent.voted_for = Some(candidate_id);
			self.persist()?;
			self.election_timer.reset_random(self.clock.now_ms());
		}

		self.bus.send(Envelope::new(
			self.id,
			source,
			MessageBody::VoteResponse { term: self.persistent.current_term, granted },
		));
		Ok(())
	}

	fn handle_vote_response(&mut self, _source: NodeId, term: Term, granted: bool) -> Result<()> {
		if term > self.persistent.current_term {
			return self.step_down(term);
		}
		if term != self.persistent.current_term {
			return Ok(());
		}

		let votes_received = match self.role {
			Role::Candidate { ref mut votes_received } => {
				if granted {
					*votes_received += 1;
				}
				*votes_received
			}
			_ => return Ok(()),
		};

		if votes_received >= majority(self.peers.len() + 1) {
			self.become_leader()?;
		}
		Ok(())
	}

	fn handle_append_entries_request(
		&mut self,
		source: NodeId,
		term: Term,
		prev_log: Option<(LogIndex, Term)>,
		entries: Vec<LogEntry>,
		leader_commit_index: Option<LogIndex>,
	) -> Result<()> {
		self.election_timer.reset_random(self.clock.now_ms());

		if term > self.persistent.current_term {
			self.step_down(term)?;
		} else if term == self.persistent.current_term && !self.role.is_dead() && !matches!(self.role, Role::Follower) {
			self.role = Role::Follower;
		}

		if term < self.persistent.current_term {
			self.bus.send(Envelope::new(
				self.id,
				source,
				MessageBody::AppendEntriesResponse {
					term: self.persistent.current_term,
					success: false,
					nb_log_entries: 0,
				},
			));
			return Ok(());
		}

		let begin_index = match prev_log {
			Some((prev_index, prev_term)) => {
				let ok = prev_index < self.persistent.log.next_index()
					&& self.persistent.log.term_at(prev_index) == Some(prev_term);
				if !ok {
					self.bus.send(Envelope::new(
						self.id,
						source,
						MessageBody::AppendEntriesResponse {
							term: self.persistent.current_term,
							success: false,
							nb_log_entries: 0,
						},
					));
					return Ok(());
				}
				prev_index + 1
			}
			None => 0,
		};

		self.reconcile_log(begin_index, &entries);

		if let Some(leader_commit) = leader_commit_index {
			let last_index = self.persistent.log.next_index().saturating_sub(1);
			let candidate = leader_commit.min(last_index);
			if self.commit_index.map_or(true, |ci| candidate > ci) && !self.persistent.log.is_empty() {
				self.commit_index = Some(candidate);
			}
		}

		self.persist()?;

		self.bus.send(Envelope::new(
			self.id,
			source,
			MessageBody::AppendEntriesResponse {
				term: self.persistent.current_term,
				success: true,
				nb_log_entries: entries.len(),
			},
		));
		Ok(())
	}

	/// Skips over entries that already match, truncates at the first mismatch (from that index
	/// through the end), then appends the remainder of what the leader sent.
	fn reconcile_log(&mut self, begin_index: LogIndex, new_entries: &[LogEntry]) {
		let mut i = 0usize;
		while i < new_entries.len() {
			let local_index = begin_index + i as LogIndex;
			match self.persistent.log.term_at(local_index) {
				Some(local_term) if local_term == new_entries[i].term => {
					i += 1;
				}
				_ => break,
			}
		}
		if i < new_entries.len() {
			let truncate_at = begin_index + i as LogIndex;
			self.persistent.log.truncate_from(truncate_at);
			for entry in &new_entries[i..] {
				self.persistent.log.push(entry.clone());
			}
		}
	}

	fn handle_append_entries_response(
		&mut self,
		source: NodeId,
		term: Term,
		success: bool,
		nb_log_entries: usize,
	) -> Result<()> {
		if term > self.persistent.current_term {
			return self.step_down(term);
		}
		if term != self.persistent.current_term {
			return Ok(());
		}

		let leader_state = match self.role.as_leader_mut() {
			Some(l) => l,
			None => return Ok(()),
		};

		if success {
			let next = leader_state.next_index.entry(source).or_insert(0);
			*next += nb_log_entries as LogIndex;
			let matched = *next - 1;
			leader_state.match_index.insert(source, Some(matched));
		} else {
			let next = leader_state.next_index.entry(source).or_insert(0);
			*next = next.saturating_sub(1);
		}

		self.advance_leader_commit_index();
		Ok(())
	}

	/// Scans every index above `commit_index` in increasing order and adopts the highest one
	/// that both (a) is backed by a majority of `match_index` and (b) belongs to the current
	/// term, continuing past the first qualifying index rather than stopping there, so a
	/// single response that crosses majority at several indices at once doesn't leave
	/// `commit_index` needlessly stalled for another round.
	fn advance_leader_commit_index(&mut self) {
		let current_term = self.persistent.current_term;
		let last_index = self.persistent.log.next_index();
		let quorum = majority(self.peers.len() + 1);

		let mut candidate = self.commit_index;
		let start = self.commit_index.map_or(0, |ci| ci + 1);

		let leader_state = match self.role.as_leader() {
			Some(l) => l,
			None => return,
		};

		let mut i = start;
		while i < last_index {
			if self.persistent.log.term_at(i) == Some(current_term) {
				let mut count = 1; // self
				for &matched in leader_state.match_index.values() {
					if matched.map_or(false, |m| m >= i) {
						count += 1;
					}
				}
				if count >= quorum {
					candidate = Some(i);
				}
			}
			i += 1;
		}

		self.commit_index = candidate;
	}

	fn handle_command_entry_request(&mut self, source: NodeId, command: String) -> Result<()> {
		let index = self.persistent.log.next_index();
		let term = self.persistent.current_term;
		let leader_id = self.id;

		let is_leader = self.role.is_leader();
		if !is_leader {
			debug!("replica {}: ignoring command from {}, not leader", self.id, source);
			return Ok(());
		}

		self.persistent.log.push(LogEntry {
			term,
			index,
			command,
			client_id: source,
			leader_id,
		});
		if let Some(leader_state) = self.role.as_leader_mut() {
			leader_state.pending_acks.push_back(PendingAck { index, client_id: source, leader_id });
		}
		self.persist()?;
		self.broadcast_append_entries()
	}

	fn handle_search_leader_request(&mut self, source: NodeId) -> Result<()> {
		if self.role.is_leader() {
			self.bus.send(Envelope::new(
				self.id,
				source,
				MessageBody::SearchLeaderResponse { leader_id: self.id },
			));
		}
		Ok(())
	}

	// ---- commit application --------------------------------------------------------------

	/// Advances `last_applied` up to `commit_index` and, while LEADER, pops acknowledged
	/// entries off the pending-ack FIFO and replies to the clients that submitted them.
	fn advance_commits(&mut self) {
		loop {
			let should_apply = match (self.last_applied, self.commit_index) {
				(None, Some(_)) => true,
				(Some(applied), Some(committed)) => applied < committed,
				_ => false,
			};
			if !should_apply {
				break;
			}
			self.last_applied = Some(self.last_applied.map_or(0, |a| a + 1));

			let popped = self.role.as_leader_mut().and_then(|l| l.pending_acks.pop_front());
			if let Some(ack) = popped {
				let committed = self.id == ack.leader_id;
				self.bus.send(Envelope::new(
					self.id,
					ack.client_id,
					MessageBody::CommandEntryResponse { committed },
				));
			}
		}
	}
}
