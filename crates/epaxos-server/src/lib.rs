//! Library half of the `epaxosd` replica: config loading, the CLI
//! surface, the gRPC peer transport, the `Epaxos` RPC frontends, and a
//! minimal client used by integration tests to drive a real server over
//! the wire. `main.rs` is a thin binary built on top of this.

pub mod cli;
pub mod client;
pub mod config;
pub mod rpc;
pub mod transport;
