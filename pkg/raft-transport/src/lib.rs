//! A rank-based in-process message fabric: one OS thread per simulated node, communicating
//! over per-ordered-pair `mpsc` channels, standing in for a deployment of separate MPI
//! processes without needing an actual MPI toolchain.
//!
//! Wire bytes are MessagePack via `serde`/`rmp-serde`, matching the `raft` crate's own choice
//! of encoding for its persistent record, so an undecodable payload (error taxonomy item b) is
//! a real, exercised code path here, not a theoretical one.

extern crate raft;
extern crate rmp_serde as rmps;
extern crate serde;
#[macro_use] extern crate log;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use raft::bus::MessageBus;
use raft::ids::NodeId;
use raft::message::Envelope;

/// Builds the fully-connected set of mailboxes for a fixed set of node ids, then hands out one
/// `ChannelBus` per node. Construct once with every id that will participate (controller,
/// replicas, and clients), then call `bus_for` exactly once per id.
pub struct Network {
	senders: HashMap<(NodeId, NodeId), Sender<Vec<u8>>>,
	pending_receivers: HashMap<NodeId, HashMap<NodeId, Receiver<Vec<u8>>>>,
}

impl Network {
	pub fn new(node_ids: &[NodeId]) -> Self {
		let mut senders = HashMap::new();
		let mut pending_receivers: HashMap<NodeId, HashMap<NodeId, Receiver<Vec<u8>>>> = HashMap::new();

		for &src in node_ids {
			for &dest in node_ids {
				if src == dest {
					continue;
				}
				let (tx, rx) = mpsc::channel();
				senders.insert((src, dest), tx);
				pending_receivers.entry(dest).or_insert_with(HashMap::new).insert(src, rx);
			}
		}

		Network { senders, pending_receivers }
	}

	/// Hands out the `ChannelBus` for `id`, taking ownership of its inbound receivers. Each id
	/// may only be taken once; a second call for the same id returns a bus that can send but
	/// will never receive anything (its receivers were already handed to the first caller).
	pub fn bus_for(&mut self, id: NodeId) -> ChannelBus {
		let receivers = self.pending_receivers.remove(&id).unwrap_or_default();
		ChannelBus { id, senders: self.senders.clone(), receivers }
	}
}

/// One node's handle onto a `Network`. `Send`, so it can be moved into the OS thread that runs
/// that node's `Replica`/`Client`/`Controller` loop.
pub struct ChannelBus {
	id: NodeId,
	senders: HashMap<(NodeId, NodeId), Sender<Vec<u8>>>,
	receivers: HashMap<NodeId, Receiver<Vec<u8>>>,
}

impl MessageBus for ChannelBus {
	fn send(&self, msg: Envelope) {
		let key = (msg.source, msg.dest);
		let tx = match self.senders.get(&key) {
			Some(tx) => tx,
			None => {
				debug!("no channel from {} to {}, dropping message", msg.source, msg.dest);
				return;
			}
		};
		match rmps::to_vec(&msg) {
			Ok(bytes) => {
				// A send error means the receiving thread's end has been dropped (it exited);
				// per the bus contract this is just a silent failure, not a bug to surface.
				let _ = tx.send(bytes);
			}
			Err(err) => {
				error!("failed to encode message {:?}: {}", msg, err);
			}
		}
	}

	fn receive(&self, from: NodeId) -> Option<Envelope> {
		let rx = self.receivers.get(&from)?;
		let bytes = rx.try_recv().ok()?;
		match rmps::from_slice(&bytes) {
			Ok(envelope) => Some(envelope),
			Err(err) => {
				warn!("dropping undecodable message from {} (node {}): {}", from, self.id, err);
				None
			}
		}
	}
}
