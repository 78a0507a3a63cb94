//! In-memory fakes for `MessageBus` and `Store`, so the role loops in `replica`, `client`, and
//! `controller` can be driven deterministically in tests without real networking or a
//! filesystem. Mirrors the design notes' call for "polymorphism over transport and storage ...
//! enabling in-memory fakes for tests (deterministic delivery, fault injection) without
//! changing the core."

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bus::MessageBus;
use errors::*;
use ids::NodeId;
use message::Envelope;
use storage::{PersistentState, Store};

pub use clock::ManualClock;

type Pair = (NodeId, NodeId);

/// Shared mailbox state backing every `InMemoryBus` handle produced by one `Network`.
struct Mailboxes {
	/// FIFO queue per ordered `(source, dest)` pair, matching the delivery-order guarantee the
	/// core relies on: within one pair, older messages are always visible before newer ones.
	queues: HashMap<Pair, VecDeque<Envelope>>,
	/// Node ids currently unreachable from/to: messages crossing a partitioned pair are
	/// dropped at `send` time, modeling the "delivery is otherwise unreliable" clause.
	partitioned: std::collections::HashSet<Pair>,
}

/// A fully-connected set of in-memory mailboxes, one `(source, dest)` queue per ordered pair of
/// the node ids registered with it. Call `bus_for(id)` once per simulated node to get the
/// `MessageBus` handle that node's `Replica`/`Client`/`Controller` should own.
pub struct Network {
	state: Rc<RefCell<Mailboxes>>,
}

impl Network {
	pub fn new() -> Self {
		Network { state: Rc::new(RefCell::new(Mailboxes { queues: HashMap::new(), partitioned: Default::default() })) }
	}

	pub fn bus_for(&self, id: NodeId) -> InMemoryBus {
		InMemoryBus { id, state: self.state.clone() }
	}

	/// Drops every future message sent in either direction between `a` and `b`, until
	/// `heal_partition` is called. Messages already queued before the call are unaffected (they
	/// were already "in flight").
	pub fn partition(&self, a: NodeId, b: NodeId) {
		let mut state = self.state.borrow_mut();
		state.partitioned.insert((a, b));
		state.partitioned.insert((b, a));
	}

	pub fn heal_partition(&self, a: NodeId, b: NodeId) {
		let mut state = self.state.borrow_mut();
		state.partitioned.remove(&(a, b));
		state.partitioned.remove(&(b, a));
	}
}

/// One node's view of a `Network`: can send to any other node and receive from any specific
/// sender, matching the `MessageBus` trait exactly.
pub struct InMemoryBus {
	id: NodeId,
	state: Rc<RefCell<Mailboxes>>,
}

impl MessageBus for InMemoryBus {
	fn send(&self, msg: Envelope) {
		let mut state = self.state.borrow_mut();
		let pair = (msg.source, msg.dest);
		if state.partitioned.contains(&pair) {
			return;
		}
		state.queues.entry(pair).or_insert_with(VecDeque::new).push_back(msg);
	}

	fn receive(&self, from: NodeId) -> Option<Envelope> {
		let mut state = self.state.borrow_mut();
		state.queues.get_mut(&(from, self.id)).and_then(|q| q.pop_front())
	}
}

/// An in-memory `Store`: round-trips whatever was last `save`d, with no actual I/O. `has_data`
/// reports `true` only after the first `save`, mirroring a fresh (empty) backing file.
#[derive(Default)]
pub struct MemStore {
	saved: Option<PersistentState>,
}

impl MemStore {
	pub fn new() -> Self {
		MemStore { saved: None }
	}
}

impl Store for MemStore {
	fn save(&mut self, state: &PersistentState) -> Result<()> {
		self.saved = Some(state.clone());
		Ok(())
	}

	fn get(&self) -> Result<PersistentState> {
		Ok(self.saved.clone().unwrap_or_default())
	}

	fn has_data(&self) -> bool {
		self.saved.is_some()
	}
}

/// Lets a test hold on to a store across a simulated crash/restart: the `Replica` that gets
/// rebuilt after a crash takes a fresh clone of the `Rc`, but it's the same underlying data.
impl<T: Store> Store for Rc<RefCell<T>> {
	fn save(&mut self, state: &PersistentState) -> Result<()> {
		self.borrow_mut().save(state)
	}

	fn get(&self) -> Result<PersistentState> {
		self.borrow().get()
	}

	fn has_data(&self) -> bool {
		self.borrow().has_data()
	}
}
