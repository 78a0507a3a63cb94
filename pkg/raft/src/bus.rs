use message::Envelope;
use ids::NodeId;

/// The capability interface the core consumes for inter-node communication.
///
/// Deliberately minimal (two pure, non-blocking operations), so a real implementation (see
/// `raft-transport`) and an in-memory fake (see `testing::InMemoryBus`) can sit behind the same
/// trait object without the core ever knowing which one it's talking to.
///
/// Delivery is allowed to be unreliable: `send` never blocks and never reports failure, and
/// `receive` returns `None` both when nothing has arrived yet and when something was dropped in
/// flight. Messages between any one ordered `(source, dest)` pair that *are* delivered arrive in
/// FIFO order; there is no ordering guarantee across distinct senders.
pub trait MessageBus {
	/// Enqueues `msg` for delivery. Fire-and-forget: never blocks, and a transport is free to
	/// drop the message silently instead of delivering it.
	fn send(&self, msg: Envelope);

	/// Returns the next available message sent by `from`, or `None` if none is available right
	/// now. Never blocks.
	fn receive(&self, from: NodeId) -> Option<Envelope>;
}
