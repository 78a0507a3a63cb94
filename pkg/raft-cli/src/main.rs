//! Launches a Raft cluster as one OS thread per simulated node (controller, replicas, clients)
//! wired together over `raft_transport::Network`, and drives the operator console on stdin.
//!
//! Deliberately thin: everything that decides *how* replicas/clients behave lives in the `raft`
//! crate; this binary only parses `--servers`/`--clients`, assigns node ids, and wires the
//! `raft-transport` crate's one-OS-thread-per-node fabric and each replica's on-disk store
//! together.

extern crate clap;
extern crate env_logger;
#[macro_use] extern crate log;
extern crate raft;
extern crate raft_transport;

use std::path::PathBuf;
use std::process;
use std::thread;

use clap::{App, Arg};

use raft::client::Client;
use raft::clock::SystemClock;
use raft::controller::{Controller, Stdin};
use raft::errors::*;
use raft::ids::NodeId;
use raft::replica::Replica;
use raft::storage::FileStore;
use raft_transport::Network;

const CONTROLLER_ID: NodeId = 0;

struct Args {
	servers: usize,
	clients: usize,
}

fn parse_args() -> std::result::Result<Args, String> {
	let matches = App::new("raft-cli")
		.about("Launches a teaching-grade Raft cluster and an operator console")
		.arg(Arg::with_name("servers").long("servers").takes_value(true).default_value("1"))
		.arg(Arg::with_name("clients").long("clients").takes_value(true).default_value("1"))
		.get_matches();

	let servers: usize = matches
		.value_of("servers")
		.unwrap()
		.parse()
		.map_err(|_| "--servers must be a non-negative integer".to_string())?;
	let clients: usize = matches
		.value_of("clients")
		.unwrap()
		.parse()
		.map_err(|_| "--clients must be a non-negative integer".to_string())?;

	Ok(Args { servers, clients })
}

fn run(args: Args) -> Result<()> {
	let replica_ids: Vec<NodeId> = (1..=args.servers as NodeId).collect();
	let client_ids: Vec<NodeId> = ((args.servers as NodeId + 1)..=(args.servers + args.clients) as NodeId).collect();

	let mut all_node_ids = vec![CONTROLLER_ID];
	all_node_ids.extend(&replica_ids);
	all_node_ids.extend(&client_ids);

	let mut network = Network::new(&all_node_ids);
	let logs_dir = PathBuf::from("logs");

	let mut handles = Vec::new();

	for &id in &replica_ids {
		let peers: Vec<NodeId> = replica_ids.iter().cloned().filter(|&p| p != id).collect();
		let clients = client_ids.clone();
		let bus = network.bus_for(id);
		let store = FileStore::open(&logs_dir, id)?;
		let clock = SystemClock::new();

		handles.push(thread::spawn(move || -> Result<()> {
			let mut replica = Replica::new(id, peers, clients, CONTROLLER_ID, bus, store, clock)?;
			replica.run()
		}));
	}

	for &id in &client_ids {
		let replicas = replica_ids.clone();
		let bus = network.bus_for(id);
		let clock = SystemClock::new();

		handles.push(thread::spawn(move || -> Result<()> {
			let mut client = Client::new(id, replicas, CONTROLLER_ID, bus, clock);
			client.run()
		}));
	}

	let controller_targets: Vec<NodeId> = replica_ids.iter().chain(client_ids.iter()).cloned().collect();
	let controller_bus = network.bus_for(CONTROLLER_ID);
	let mut controller = Controller::new(CONTROLLER_ID, controller_targets, Stdin, controller_bus);
	controller.run();

	for handle in handles {
		match handle.join() {
			Ok(result) => result?,
			Err(_) => error!("a node thread panicked"),
		}
	}

	Ok(())
}

fn main() {
	env_logger::init().ok();

	let args = match parse_args() {
		Ok(args) => args,
		Err(message) => {
			eprintln!("{}", message);
			process::exit(2);
		}
	};

	if let Err(err) = run(args) {
		eprintln!("fatal error: {}", err);
		process::exit(1);
	}
}
