//! Bully leader election over plain TCP.
//!
//! A fixed set of peer processes, each identified by the numeric id derived
//! from its listening port, agree on the highest live id as their leader.
//! Every protocol exchange is one newline-terminated ASCII request answered
//! by a single `OK` line on a fresh connection. A non-leading node pings the
//! believed leader once per interval; any anomaly (no leader, several
//! leaders, missed ping) triggers a new election.
//!
//! Each module focuses on one responsibility:
//!
//! - [`cli`] parses the command-line interface for a node.
//! - [`config`] resolves settings from flags and an optional JSON file.
//! - [`message`] implements the line protocol plus async read/write helpers.
//! - [`registry`] tracks the local identity and the fixed peer sequence.
//! - [`transport`] performs one-shot request/response exchanges with deadlines.
//! - [`node`] ties everything together: listener, election engine, leadership
//!   announcement, and the leader health monitor.
//!
//! Integration tests use this crate directly to run several nodes against
//! real sockets and exercise elections and failover.

pub mod cli;
pub mod config;
pub mod message;
pub mod node;
pub mod registry;
pub mod transport;
