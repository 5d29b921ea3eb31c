//! cliwright: declarative CLI specifications, compiled or interpreted.
//!
//! One specification, two routes: generate standalone Rust source and
//! build it with cargo, or run the specification live. Both share the
//! expression resolver, arity policy, step contract and output rules.

pub mod cli;
pub mod core;
pub mod transport;
