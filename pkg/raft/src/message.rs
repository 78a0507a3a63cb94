use entries::LogEntry;
use ids::{LogIndex, NodeId, Term};

/// Throttle buckets an operator can dial a replica's peer/client message processing down to.
/// `NONE` means unthrottled: one queued message is processed every loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speed {
	None,
	Low,
	Medium,
	High,
}

impl Speed {
	/// Minimum milliseconds between processing two queued peer/client messages.
	pub fn interval_ms(self) -> u64 {
		match self {
			Speed::None => 0,
			Speed::Low => 50,
			Speed::Medium => 25,
			Speed::High => 10,
		}
	}

	pub fn parse(s: &str) -> Option<Speed> {
		match s {
			"NONE" => Some(Speed::None),
			"LOW" => Some(Speed::Low),
			"MEDIUM" => Some(Speed::Medium),
			"HIGH" => Some(Speed::High),
			_ => None,
		}
	}
}

/// The payload half of a message envelope. Each variant carries its own `term` field where the
/// protocol requires one rather than duplicating it on a wrapping struct, mirroring how the
/// classic Raft RPCs are defined (the sender's term travels with the request/response it is
/// attached to, not as a side channel).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MessageBody {
	VoteRequest {
		term: Term,
		candidate_id: NodeId,
		last_log_index: LogIndex,
		last_log_term: Term,
	},
	VoteResponse {
		term: Term,
		granted: bool,
	},
	AppendEntriesRequest {
		term: Term,
		/// `(prev_log_index, prev_log_term)`, omitted when `next_index` for the follower is 0.
		prev_log: Option<(LogIndex, Term)>,
		entries: Vec<LogEntry>,
		leader_commit_index: Option<LogIndex>,
	},
	AppendEntriesResponse {
		term: Term,
		success: bool,
		/// Number of entries carried by the request this responds to. Always present, even
		/// for a zero-entry heartbeat (see the crate docs on the heartbeat-response fix).
		nb_log_entries: usize,
	},
	CommandEntryRequest {
		command: String,
	},
	CommandEntryResponse {
		committed: bool,
	},
	SearchLeaderRequest,
	SearchLeaderResponse {
		leader_id: NodeId,
	},
	CrashRequest,
	StartRequest,
	ElectionTimeoutRequest {
		timeout_ms: u64,
	},
	SpeedRequest {
		speed: Speed,
	},
	Exit,
}

/// A message envelope as it travels over the bus: who sent it, who it's for, and its payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
	pub source: NodeId,
	pub dest: NodeId,
	pub body: MessageBody,
}

impl Envelope {
	pub fn new(source: NodeId, dest: NodeId, body: MessageBody) -> Self {
		Envelope { source, dest, body }
	}
}
