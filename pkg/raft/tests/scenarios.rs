//! End-to-end scenarios driven against the in-memory fakes, simulating real time by hand via
//! `ManualClock` so the outcomes are deterministic instead of depending on wall-clock timing.

extern crate raft;

use raft::bus::MessageBus;
use raft::client::Client;
use raft::ids::NodeId;
use raft::message::{Envelope, MessageBody, Speed};
use raft::replica::Replica;
use raft::testing::{InMemoryBus, MemStore, ManualClock, Network};

const CONTROLLER: NodeId = 0;
const TICK_MS: u64 = 10;

type TestReplica = Replica<InMemoryBus, MemStore, ManualClock>;
type TestClient = Client<InMemoryBus, ManualClock>;

fn send_control(network: &Network, dest: NodeId, body: MessageBody) {
	network.bus_for(CONTROLLER).send(Envelope::new(CONTROLLER, dest, body));
}

fn make_replicas(network: &Network, clock: &ManualClock, replica_ids: &[NodeId], client_ids: &[NodeId]) -> Vec<TestReplica> {
	replica_ids
		.iter()
		.map(|&id| {
			let peers: Vec<NodeId> = replica_ids.iter().cloned().filter(|&p| p != id).collect();
			Replica::new(
				id,
				peers,
				client_ids.to_vec(),
				CONTROLLER,
				network.bus_for(id),
				MemStore::new(),
				clock.clone(),
			)
			.unwrap()
		})
		.collect()
}

fn tick(replicas: &mut [TestReplica], clients: &mut [TestClient], clock: &ManualClock) {
	for r in replicas.iter_mut() {
		r.step().unwrap();
	}
	for c in clients.iter_mut() {
		c.step().unwrap();
	}
	clock.advance(TICK_MS);
}

fn leader_ids(replicas: &[TestReplica]) -> Vec<NodeId> {
	replicas.iter().filter(|r| r.role_name() == "LEADER").map(|r| r.id()).collect()
}

/// Scenario 1: single-leader happy path. 3 replicas elect exactly one leader, and two
/// client-submitted commands both commit, in order, everywhere.
#[test]
fn single_leader_happy_path() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let replica_ids = [1u32, 2, 3];
	let client_id = 4u32;

	let mut replicas = make_replicas(&network, &clock, &replica_ids, &[client_id]);
	for &id in &replica_ids {
		send_control(&network, id, MessageBody::StartRequest);
	}

	let mut clients = vec![Client::new(client_id, replica_ids.to_vec(), CONTROLLER, network.bus_for(client_id), clock.clone())];
	send_control(&network, client_id, MessageBody::StartRequest);

	// Run until exactly one leader has emerged, well within a 500ms budget.
	let mut elected = false;
	for _ in 0..200 {
		tick(&mut replicas, &mut clients, &clock);
		if leader_ids(&replicas).len() == 1 {
			elected = true;
			break;
		}
	}
	assert!(elected, "no leader elected within budget");
	assert_eq!(leader_ids(&replicas).len(), 1, "more than one leader");

	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "x".into() });
	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "y".into() });

	let mut both_committed = false;
	for _ in 0..500 {
		tick(&mut replicas, &mut clients, &clock);
		if clients[0].pending_commands() == 0 {
			both_committed = true;
			break;
		}
		assert_eq!(leader_ids(&replicas).len(), 1, "leadership flapped mid-test");
	}
	assert!(both_committed, "client never saw both commands commit");

	for r in &replicas {
		assert_eq!(r.log_len(), 2, "replica {} has the wrong log length", r.id());
		assert_eq!(r.log_entry(0).unwrap().command, "x");
		assert_eq!(r.log_entry(1).unwrap().command, "y");
		assert_eq!(r.log_entry(0).unwrap().term, r.log_entry(1).unwrap().term);
	}
}

/// Scenario 4 / P7: a replica that granted a vote for term T never grants a second, different
/// vote in the same term, even across a crash and restart.
#[test]
fn vote_uniqueness_survives_restart() {
	use std::cell::RefCell;
	use std::rc::Rc;

	let network = Network::new();
	let clock = ManualClock::new(0);
	let store = Rc::new(RefCell::new(MemStore::new()));

	let follower_id = 1u32;
	let candidate_a = 2u32;
	let candidate_b = 3u32;
	let peers = vec![candidate_a, candidate_b];

	let mut follower = Replica::new(
		follower_id,
		peers.clone(),
		vec![],
		CONTROLLER,
		network.bus_for(follower_id),
		store.clone(),
		clock.clone(),
	)
	.unwrap();

	send_control(&network, follower_id, MessageBody::StartRequest);
	follower.step().unwrap();

	// Candidate A requests a vote at term 1; the follower grants it.
	network.bus_for(candidate_a).send(Envelope::new(
		candidate_a,
		follower_id,
		MessageBody::VoteRequest { term: 1, candidate_id: candidate_a, last_log_index: 0, last_log_term: 0 },
	));
	follower.step().unwrap();
	assert_eq!(follower.current_term(), 1);

	let reply = network.bus_for(follower_id).receive(candidate_a);
	match reply.unwrap().body {
		MessageBody::VoteResponse { term, granted } => {
			assert_eq!(term, 1);
			assert!(granted, "first vote at term 1 should be granted");
		}
		other => panic!("expected VoteResponse, got {:?}", other),
	}

	// Simulate a crash: drop the in-memory replica, then rebuild it from the shared store.
	drop(follower);
	let mut restarted = Replica::new(
		follower_id,
		peers,
		vec![],
		CONTROLLER,
		network.bus_for(follower_id),
		store.clone(),
		clock.clone(),
	)
	.unwrap();
	assert_eq!(restarted.current_term(), 1, "restart must restore persisted term");

	send_control(&network, follower_id, MessageBody::StartRequest);
	restarted.step().unwrap();

	// Candidate B asks for a vote at the same term 1: must be refused.
	network.bus_for(candidate_b).send(Envelope::new(
		candidate_b,
		follower_id,
		MessageBody::VoteRequest { term: 1, candidate_id: candidate_b, last_log_index: 0, last_log_term: 0 },
	));
	restarted.step().unwrap();

	let reply = network.bus_for(follower_id).receive(candidate_b);
	match reply.unwrap().body {
		MessageBody::VoteResponse { term, granted } => {
			assert_eq!(term, 1);
			assert!(!granted, "must not grant a second vote for term 1 to a different candidate");
		}
		other => panic!("expected VoteResponse, got {:?}", other),
	}
}

/// A candidate whose log is behind a voter's log must not be granted that vote, even if it
/// asks first and the voter hasn't voted yet this term.
#[test]
fn stale_candidate_log_is_rejected() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let peers = vec![2u32];

	let mut voter = Replica::new(1u32, peers, vec![], CONTROLLER, network.bus_for(1), MemStore::new(), clock.clone()).unwrap();
	send_control(&network, 1, MessageBody::StartRequest);
	voter.step().unwrap();

	// Give the voter a log entry at term 5 that a lagging candidate (last_log_term 1) can't
	// possibly be caught up with.
	network.bus_for(9).send(Envelope::new(
		9,
		1,
		MessageBody::AppendEntriesRequest {
			term: 5,
			prev_log: None,
			entries: vec![raft::entries::LogEntry { term: 5, index: 0, command: "a".into(), client_id: 9, leader_id: 9 }],
			leader_commit_index: None,
		},
	));
	voter.step().unwrap();
	assert_eq!(voter.current_term(), 5);
	assert_eq!(voter.log_len(), 1);

	network.bus_for(2).send(Envelope::new(
		2,
		1,
		MessageBody::VoteRequest { term: 5, candidate_id: 2, last_log_index: 0, last_log_term: 1 },
	));
	voter.step().unwrap();

	let reply = network.bus_for(1).receive(2);
	match reply.unwrap().body {
		MessageBody::VoteResponse { granted, .. } => assert!(!granted, "candidate with a stale log must be refused"),
		other => panic!("expected VoteResponse, got {:?}", other),
	}
}

/// An operator-set election timeout is honored on the very next `StartRequest` while DEAD, and
/// only then.
#[test]
fn election_timeout_override_applies_once_on_next_start() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let mut replica = Replica::new(1u32, vec![2, 3], vec![], CONTROLLER, network.bus_for(1), MemStore::new(), clock.clone()).unwrap();

	send_control(&network, 1, MessageBody::ElectionTimeoutRequest { timeout_ms: 1_000 });
	replica.step().unwrap();
	send_control(&network, 1, MessageBody::StartRequest);
	replica.step().unwrap();

	// With a 1000ms override and only a few hundred ms elapsed, no election should start yet.
	for _ in 0..50 {
		replica.step().unwrap();
		clock.advance(TICK_MS);
	}
	assert_eq!(replica.role_name(), "FOLLOWER", "override should have postponed the election");
}

/// Speed throttling: a replica under `SPEED <node> HIGH` processes at most one queued
/// peer/client message per throttle tick, not one per loop iteration.
#[test]
fn throttling_limits_messages_processed_per_tick() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let mut replica = Replica::new(1u32, vec![2], vec![], CONTROLLER, network.bus_for(1), MemStore::new(), clock.clone()).unwrap();

	send_control(&network, 1, MessageBody::StartRequest);
	replica.step().unwrap();
	send_control(&network, 1, MessageBody::SpeedRequest { speed: Speed::High });
	replica.step().unwrap();

	// Queue up several heartbeats worth of no-op AppendEntries (at the replica's own current
	// term, so each one gets a real AppendEntriesResponse instead of being rejected outright).
	let peer_bus = network.bus_for(2);
	for _ in 0..5 {
		peer_bus.send(Envelope::new(
			2,
			1,
			MessageBody::AppendEntriesRequest { term: 0, prev_log: None, entries: vec![], leader_commit_index: None },
		));
	}

	// Immediately after the SpeedRequest was processed, the throttle window hasn't elapsed
	// yet: this step drains all 5 into the local inbox but must process none of them.
	replica.step().unwrap();
	assert_eq!(count_responses(&network, 1, 2), 0, "HIGH throttle processed a message before its interval elapsed");

	// Advancing past the HIGH interval (10ms) one tick at a time must release exactly one
	// queued message per tick, never more.
	for expected_total in 1..=5 {
		clock.advance(Speed::High.interval_ms());
		replica.step().unwrap();
		assert_eq!(
			count_responses(&network, 1, 2),
			1,
			"expected exactly one AppendEntriesResponse after tick {}",
			expected_total
		);
	}
}

fn count_responses(network: &Network, from: NodeId, to_listener: NodeId) -> usize {
	let bus = network.bus_for(to_listener);
	let mut n = 0;
	while bus.receive(from).is_some() {
		n += 1;
	}
	n
}

/// Scenario 2: after a leader commits an entry and then crashes, the remaining replicas elect a
/// new leader, keep making progress, and the restarted node catches back up to the majority's
/// log once it rejoins.
#[test]
fn leader_crash_is_followed_by_recovery_and_catch_up() {
	use std::cell::RefCell;
	use std::rc::Rc;

	let network = Network::new();
	let clock = ManualClock::new(0);
	let replica_ids = [1u32, 2, 3, 4, 5];
	let client_id = 6u32;

	let stores: Vec<Rc<RefCell<MemStore>>> = replica_ids.iter().map(|_| Rc::new(RefCell::new(MemStore::new()))).collect();

	let mut replicas: Vec<Replica<InMemoryBus, Rc<RefCell<MemStore>>, ManualClock>> = replica_ids
		.iter()
		.zip(stores.iter())
		.map(|(&id, store)| {
			let peers: Vec<NodeId> = replica_ids.iter().cloned().filter(|&p| p != id).collect();
			Replica::new(id, peers, vec![client_id], CONTROLLER, network.bus_for(id), store.clone(), clock.clone()).unwrap()
		})
		.collect();
	for &id in &replica_ids {
		send_control(&network, id, MessageBody::StartRequest);
	}

	let mut clients = vec![Client::new(client_id, replica_ids.to_vec(), CONTROLLER, network.bus_for(client_id), clock.clone())];
	send_control(&network, client_id, MessageBody::StartRequest);

	let leader_of = |replicas: &[Replica<InMemoryBus, Rc<RefCell<MemStore>>, ManualClock>]| -> Option<NodeId> {
		replicas.iter().find(|r| r.role_name() == "LEADER").map(|r| r.id())
	};

	let mut step_all = |replicas: &mut [Replica<InMemoryBus, Rc<RefCell<MemStore>>, ManualClock>], clients: &mut [Client<InMemoryBus, ManualClock>]| {
		for r in replicas.iter_mut() {
			r.step().unwrap();
		}
		for c in clients.iter_mut() {
			c.step().unwrap();
		}
		clock.advance(TICK_MS);
	};

	let mut l1 = None;
	for _ in 0..200 {
		step_all(&mut replicas, &mut clients);
		if let Some(leader) = leader_of(&replicas) {
			l1 = Some(leader);
			break;
		}
	}
	let l1 = l1.expect("no leader elected within budget");

	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "a".into() });
	for _ in 0..200 {
		step_all(&mut replicas, &mut clients);
		if clients[0].pending_commands() == 0 {
			break;
		}
	}
	assert_eq!(clients[0].pending_commands(), 0, "\"a\" never committed");

	send_control(&network, l1, MessageBody::CrashRequest);
	step_all(&mut replicas, &mut clients);

	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "b".into() });
	let mut l2 = None;
	for _ in 0..300 {
		step_all(&mut replicas, &mut clients);
		if clients[0].pending_commands() == 0 {
			if let Some(leader) = leader_of(&replicas) {
				if leader != l1 {
					l2 = Some(leader);
					break;
				}
			}
		}
	}
	assert!(l2.is_some(), "no new leader committed \"b\" after the original leader crashed");

	// Restart the crashed node against its preserved store and let it catch up.
	let crashed_index = replica_ids.iter().position(|&id| id == l1).unwrap();
	let peers: Vec<NodeId> = replica_ids.iter().cloned().filter(|&p| p != l1).collect();
	replicas[crashed_index] = Replica::new(
		l1,
		peers,
		vec![client_id],
		CONTROLLER,
		network.bus_for(l1),
		stores[crashed_index].clone(),
		clock.clone(),
	)
	.unwrap();
	send_control(&network, l1, MessageBody::StartRequest);

	let mut caught_up = false;
	for _ in 0..300 {
		step_all(&mut replicas, &mut clients);
		if replicas[crashed_index].log_len() == 2 {
			caught_up = true;
			break;
		}
	}
	assert!(caught_up, "restarted node never caught up to the majority's log");
	assert_eq!(replicas[crashed_index].log_entry(0).unwrap().command, "a");
	assert_eq!(replicas[crashed_index].log_entry(1).unwrap().command, "b");
}

/// Scenario 3: a minority partition never elects a leader of its own, and once the partition
/// heals its log converges to the majority's via conflict truncation.
#[test]
fn minority_partition_cannot_elect_and_converges_after_heal() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let majority_ids = [1u32, 2, 3];
	let minority_ids = [4u32, 5];
	let all_replica_ids = [1u32, 2, 3, 4, 5];
	let client_id = 6u32;

	let mut replicas = make_replicas(&network, &clock, &all_replica_ids, &[client_id]);
	for &id in &all_replica_ids {
		send_control(&network, id, MessageBody::StartRequest);
	}
	let mut clients = vec![Client::new(client_id, all_replica_ids.to_vec(), CONTROLLER, network.bus_for(client_id), clock.clone())];
	send_control(&network, client_id, MessageBody::StartRequest);

	for &a in &majority_ids {
		for &b in &minority_ids {
			network.partition(a, b);
		}
	}

	let mut elected = false;
	for _ in 0..300 {
		tick(&mut replicas, &mut clients, &clock);
		let leaders = leader_ids(&replicas);
		if leaders.len() == 1 && majority_ids.contains(&leaders[0]) {
			elected = true;
		}
		assert!(
			leaders.iter().all(|id| !minority_ids.contains(id)),
			"a replica on the minority side became LEADER"
		);
	}
	assert!(elected, "the majority side never elected a leader");

	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "x".into() });
	for _ in 0..300 {
		tick(&mut replicas, &mut clients, &clock);
		if clients[0].pending_commands() == 0 {
			break;
		}
	}
	assert_eq!(clients[0].pending_commands(), 0, "command never committed on the majority side");

	for &a in &majority_ids {
		for &b in &minority_ids {
			network.heal_partition(a, b);
		}
	}

	let mut converged = false;
	for _ in 0..300 {
		tick(&mut replicas, &mut clients, &clock);
		if minority_ids.iter().all(|&id| {
			let r = replicas.iter().find(|r| r.id() == id).unwrap();
			r.log_len() == 1 && r.log_entry(0).map(|e| e.command.as_str()) == Some("x")
		}) {
			converged = true;
			break;
		}
	}
	assert!(converged, "minority replicas never converged to the majority's log after the partition healed");
}

/// Scenario 5: a command sent just before its leader crashes gets exactly one committed
/// acknowledgement once the client retries it against the newly elected leader.
#[test]
fn command_retried_after_leader_loss_commits_exactly_once() {
	let network = Network::new();
	let clock = ManualClock::new(0);
	let replica_ids = [1u32, 2, 3];
	let client_id = 4u32;

	let mut replicas = make_replicas(&network, &clock, &replica_ids, &[client_id]);
	for &id in &replica_ids {
		send_control(&network, id, MessageBody::StartRequest);
	}
	let mut clients = vec![Client::new(client_id, replica_ids.to_vec(), CONTROLLER, network.bus_for(client_id), clock.clone())];
	send_control(&network, client_id, MessageBody::StartRequest);

	let mut l1 = None;
	for _ in 0..200 {
		tick(&mut replicas, &mut clients, &clock);
		if leader_ids(&replicas).len() == 1 {
			l1 = Some(leader_ids(&replicas)[0]);
			break;
		}
	}
	let l1 = l1.expect("no leader elected within budget");

	send_control(&network, client_id, MessageBody::CommandEntryRequest { command: "z".into() });
	// Let the client send "z" to the leader, then crash the leader before it replicates further.
	tick(&mut replicas, &mut clients, &clock);
	send_control(&network, l1, MessageBody::CrashRequest);

	let mut committed = false;
	for _ in 0..300 {
		tick(&mut replicas, &mut clients, &clock);
		if clients[0].pending_commands() == 0 {
			committed = true;
			break;
		}
	}
	assert!(committed, "\"z\" never committed after the client retried against a new leader");

	for r in replicas.iter().filter(|r| r.id() != l1) {
		let occurrences = (0..r.log_len() as u64).filter(|&i| r.log_entry(i).map(|e| e.command.as_str()) == Some("z")).count();
		assert_eq!(occurrences, 1, "replica {} recorded \"z\" {} times, expected exactly once", r.id(), occurrences);
	}
}
