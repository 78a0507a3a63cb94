use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A single monotonic-millisecond time source. Every deadline in the replica/client loops is
/// measured against one of these; implementations must never go backward.
pub trait Clock {
	fn now_ms(&self) -> u64;
}

/// The real clock, backed by `std::time::Instant`.
pub struct SystemClock {
	start: Instant,
}

impl SystemClock {
	pub fn new() -> Self {
		SystemClock { start: Instant::now() }
	}
}

impl Clock for SystemClock {
	fn now_ms(&self) -> u64 {
		let elapsed = self.start.elapsed();
		elapsed.as_secs() * 1000 + (elapsed.subsec_millis() as u64)
	}
}

/// A clock a test can advance by hand, so election/heartbeat/command timers can be driven
/// deterministically without sleeping real wall-clock time.
///
/// Cheaply `Clone`-able and shares its underlying counter across clones: a test builds one
/// `ManualClock`, hands a clone to each simulated node, and advancing any one of them (or the
/// original) advances what every node observes.
#[derive(Clone)]
pub struct ManualClock {
	now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
	pub fn new(start_ms: u64) -> Self {
		ManualClock { now_ms: Rc::new(Cell::new(start_ms)) }
	}

	pub fn advance(&self, ms: u64) {
		self.now_ms.set(self.now_ms.get() + ms);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> u64 {
		self.now_ms.get()
	}
}

/// Lower/upper bound in milliseconds of the random election timeout range.
pub const ELECTION_TIMEOUT_RANGE_MS: (u64, u64) = (150, 300);

/// How often a leader sends an `AppendEntriesRequest` (possibly empty) to each follower.
pub const HEARTBEAT_INTERVAL_MS: u64 = 50;

/// Draws randomized election deadlines for one replica.
///
/// Seeded deterministically from the replica's `NodeId` so a fixed node-id assignment
/// reproduces the same sequence of timeouts across runs, while still differing from every
/// other replica's sequence.
pub struct ElectionTimer {
	rng: StdRng,
	deadline_ms: u64,
}

impl ElectionTimer {
	pub fn new(seed: u64) -> Self {
		ElectionTimer { rng: StdRng::seed_from_u64(seed), deadline_ms: 0 }
	}

	/// Draws a new random timeout in `ELECTION_TIMEOUT_RANGE_MS` and arms the deadline from
	/// `now_ms`. Used whenever the replica (re)starts an election or enters FOLLOWER.
	pub fn reset_random(&mut self, now_ms: u64) {
		let (low, high) = ELECTION_TIMEOUT_RANGE_MS;
		let timeout = self.rng.gen_range(low, high + 1);
		self.deadline_ms = now_ms + timeout;
	}

	/// Arms the deadline using an operator-supplied timeout instead of a random draw. Used
	/// exactly once, for the first election after a `StartRequest` that was preceded by an
	/// `ElectionTimeoutRequest` while the replica was DEAD.
	pub fn reset_fixed(&mut self, now_ms: u64, timeout_ms: u64) {
		self.deadline_ms = now_ms + timeout_ms;
	}

	pub fn is_elapsed(&self, now_ms: u64) -> bool {
		now_ms >= self.deadline_ms
	}
}
