use std::collections::VecDeque;

use bus::MessageBus;
use clock::Clock;
use errors::*;
use ids::NodeId;
use message::{Envelope, MessageBody};

/// How often, while the leader is unknown, the client re-broadcasts `SearchLeaderRequest`, and
/// how long it waits for a `CommandEntryResponse` before assuming the leader it knew about is
/// gone.
const LEADER_TIMEOUT_MS: u64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientState {
	Alive,
	Dead,
}

/// One in-flight (or queued) command the client is trying to get committed.
struct OutgoingCommand {
	text: String,
	sent: bool,
	sent_at_ms: u64,
}

/// Finds the current leader and streams operator-submitted command strings to it, one in
/// flight at a time.
pub struct Client<B: MessageBus, C: Clock> {
	id: NodeId,
	replicas: Vec<NodeId>,
	controller_id: NodeId,

	bus: B,
	clock: C,

	state: ClientState,
	leader_id: Option<NodeId>,
	last_leader_search_ms: u64,
	queue: VecDeque<OutgoingCommand>,
}

impl<B: MessageBus, C: Clock> Client<B, C> {
	pub fn new(id: NodeId, replicas: Vec<NodeId>, controller_id: NodeId, bus: B, clock: C) -> Self {
		Client {
			id,
			replicas,
			controller_id,
			bus,
			clock,
			state: ClientState::Dead,
			leader_id: None,
			last_leader_search_ms: 0,
			queue: VecDeque::new(),
		}
	}

	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn leader_id(&self) -> Option<NodeId> {
		self.leader_id
	}

	pub fn pending_commands(&self) -> usize {
		self.queue.len()
	}

	pub fn run(&mut self) -> Result<()> {
		while self.step()? {}
		Ok(())
	}

	/// One loop iteration. Returns `Ok(false)` once `Exit` has been processed.
	pub fn step(&mut self) -> Result<bool> {
		if let Some(msg) = self.bus.receive(self.controller_id) {
			if !self.handle_control(msg.body) {
				return Ok(false);
			}
		}

		if self.state == ClientState::Alive {
			self.drain_replica_messages();
			self.advance()?;
		}

		Ok(true)
	}

	fn handle_control(&mut self, body: MessageBody) -> bool {
		match body {
			MessageBody::StartRequest => {
				self.state = ClientState::Alive;
			}
			MessageBody::CrashRequest => {
				self.state = ClientState::Dead;
				self.queue.clear();
				self.leader_id = None;
			}
			MessageBody::CommandEntryRequest { command } => {
				self.queue.push_back(OutgoingCommand { text: command, sent: false, sent_at_ms: 0 });
			}
			MessageBody::Exit => return false,
			_ => {}
		}
		true
	}

	fn drain_replica_messages(&mut self) {
		for &replica in &self.replicas.clone() {
			while let Some(msg) = self.bus.receive(replica) {
				self.handle_replica_message(msg);
			}
		}
	}

	fn handle_replica_message(&mut self, msg: Envelope) {
		match msg.body {
			MessageBody::SearchLeaderResponse { leader_id } => {
				if self.leader_id.is_none() {
					self.leader_id = Some(leader_id);
				}
			}
			MessageBody::CommandEntryResponse { committed } => {
				if committed {
					self.queue.pop_front();
				} else {
					self.leader_id = None;
					if let Some(front) = self.queue.front_mut() {
						front.sent = false;
					}
				}
			}
			_ => {}
		}
	}

	fn advance(&mut self) -> Result<()> {
		let now = self.clock.now_ms();

		if self.leader_id.is_none() {
			if now.saturating_sub(self.last_leader_search_ms) >= LEADER_TIMEOUT_MS {
				self.last_leader_search_ms = now;
				for &replica in &self.replicas.clone() {
					self.bus.send(Envelope::new(self.id, replica, MessageBody::SearchLeaderRequest));
				}
			}
			return Ok(());
		}

		let leader = self.leader_id.unwrap();
		let timed_out = {
			let front = match self.queue.front() {
				Some(c) => c,
				None => return Ok(()),
			};
			front.sent && now.saturating_sub(front.sent_at_ms) > LEADER_TIMEOUT_MS
		};

		if timed_out {
			self.leader_id = None;
			if let Some(front) = self.queue.front_mut() {
				front.sent = false;
			}
			return Ok(());
		}

		let needs_send = self.queue.front().map_or(false, |c| !c.sent);
		if needs_send {
			let text = self.queue.front().unwrap().text.clone();
			self.bus.send(Envelope::new(self.id, leader, MessageBody::CommandEntryRequest { command: text }));
			if let Some(front) = self.queue.front_mut() {
				front.sent = true;
				front.sent_at_ms = now;
			}
		}

		Ok(())
	}
}
