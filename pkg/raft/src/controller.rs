use bus::MessageBus;
use ids::NodeId;
use message::{Envelope, MessageBody, Speed};

/// A parsed operator command, one-to-one with a verb recognized from stdin.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
	StartServers,
	Exit,
	Crash(NodeId),
	Start(NodeId),
	SendCommand(NodeId, String),
	SetElectionTimeout(NodeId, u64),
	Speed(NodeId, Speed),
}

/// Parses one line of operator input into a `ControlCommand`.
///
/// Unrecognized verbs and malformed arguments (wrong arity, non-numeric node ids/timeouts/an
/// unknown speed name) are reported as `None` rather than an error: a bad operator line is
/// simply ignored, not treated as a fault in the system being operated.
pub fn parse_line(line: &str) -> Option<ControlCommand> {
	let mut parts = line.trim().split(' ').filter(|s| !s.is_empty());
	let verb = parts.next()?;

	match verb {
		"START_SERVERS" => Some(ControlCommand::StartServers),
		"EXIT" => Some(ControlCommand::Exit),
		"CRASH" => parts.next()?.parse().ok().map(ControlCommand::Crash),
		"START" | "RECOVER" => parts.next()?.parse().ok().map(ControlCommand::Start),
		"SEND_COMMAND" => {
			let node: NodeId = parts.next()?.parse().ok()?;
			let rest: Vec<&str> = parts.collect();
			if rest.is_empty() {
				return None;
			}
			Some(ControlCommand::SendCommand(node, rest.join(" ")))
		}
		"SET_ELECTION_TIMEOUT" => {
			let node: NodeId = parts.next()?.parse().ok()?;
			let ms: u64 = parts.next()?.parse().ok()?;
			Some(ControlCommand::SetElectionTimeout(node, ms))
		}
		"SPEED" => {
			let node: NodeId = parts.next()?.parse().ok()?;
			let speed = Speed::parse(parts.next()?)?;
			Some(ControlCommand::Speed(node, speed))
		}
		_ => None,
	}
}

/// Reads one line of operator input at a time. Abstracted so tests can feed a canned script
/// instead of `Controller` depending on real stdin.
pub trait LineSource {
	/// Returns the next line (without its trailing newline), or `None` at end of input.
	fn next_line(&mut self) -> Option<String>;
}

/// Reads lines from the process's real standard input.
pub struct Stdin;

impl LineSource for Stdin {
	fn next_line(&mut self) -> Option<String> {
		use std::io::BufRead;
		let mut line = String::new();
		let stdin = ::std::io::stdin();
		let mut lock = stdin.lock();
		match lock.read_line(&mut line) {
			Ok(0) | Err(_) => None,
			Ok(_) => Some(line.trim_end_matches(|c| c == '\n' || c == '\r').to_string()),
		}
	}
}

/// The operator console: reads lines, translates each into a control message, and forwards it
/// to the node(s) it targets. `EXIT` broadcasts `Exit` to every non-controller node and ends
/// the console's own loop.
pub struct Controller<L: LineSource, B: MessageBus> {
	id: NodeId,
	all_nodes: Vec<NodeId>,
	lines: L,
	bus: B,
}

impl<L: LineSource, B: MessageBus> Controller<L, B> {
	pub fn new(id: NodeId, all_nodes: Vec<NodeId>, lines: L, bus: B) -> Self {
		Controller { id, all_nodes, lines, bus }
	}

	/// Reads and dispatches lines until `EXIT` or end of input.
	pub fn run(&mut self) {
		while self.step() {}
	}

	/// Reads and dispatches at most one line. Returns `false` once `EXIT` has been processed or
	/// input has ended.
	pub fn step(&mut self) -> bool {
		let line = match self.lines.next_line() {
			Some(l) => l,
			None => return false,
		};
		match parse_line(&line) {
			Some(cmd) => self.dispatch(cmd),
			None => true,
		}
	}

	fn dispatch(&mut self, cmd: ControlCommand) -> bool {
		match cmd {
			ControlCommand::StartServers => {
				for &node in &self.all_nodes {
					self.send(node, MessageBody::StartRequest);
				}
			}
			ControlCommand::Exit => {
				for &node in &self.all_nodes {
					self.send(node, MessageBody::Exit);
				}
				return false;
			}
			ControlCommand::Crash(node) => self.send(node, MessageBody::CrashRequest),
			ControlCommand::Start(node) => self.send(node, MessageBody::StartRequest),
			ControlCommand::SendCommand(node, command) => {
				self.send(node, MessageBody::CommandEntryRequest { command })
			}
			ControlCommand::SetElectionTimeout(node, ms) => {
				self.send(node, MessageBody::ElectionTimeoutRequest { timeout_ms: ms })
			}
			ControlCommand::Speed(node, speed) => self.send(node, MessageBody::SpeedRequest { speed }),
		}
		true
	}

	fn send(&self, dest: NodeId, body: MessageBody) {
		self.bus.send(Envelope::new(self.id, dest, body));
	}
}
