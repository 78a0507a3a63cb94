//! Core Raft replica/client/controller state machines.
//!
//! This crate is deliberately transport- and storage-agnostic: it consumes the `MessageBus`
//! and `Store` capability interfaces (see `bus` and `storage`) rather than any concrete
//! networking or filesystem code, so the role loops can be driven deterministically in tests
//! against in-memory fakes (`testing`) and driven for real by whatever wires them up (see the
//! sibling `raft-transport` and `raft-cli` crates).

#[macro_use] extern crate serde_derive;
extern crate serde;
extern crate rmp_serde as rmps;
#[macro_use] extern crate error_chain;
#[macro_use] extern crate log;
extern crate rand;
extern crate core;

pub mod errors {
	error_chain! {
		foreign_links {
			Io(::std::io::Error);
			Decode(::rmps::decode::Error);
			Encode(::rmps::encode::Error);
		}
	}
}

pub mod ids;
pub mod entries;
pub mod message;
pub mod clock;
pub mod bus;
pub mod storage;
pub mod state;
pub mod replica;
pub mod client;
pub mod controller;
pub mod testing;

pub use ids::{NodeId, Term, LogIndex};
pub use entries::LogEntry;
pub use message::{Envelope, MessageBody, Speed};
pub use replica::Replica;
pub use client::Client;
pub use controller::{Controller, ControlCommand};
