//! refactor-infra: the code-refactor service's cloud stack as typed Rust.
//!
//! Declarers build a CloudFormation template in dependency order; the
//! executor hands it to the engine CLI and keeps a BLAKE3-hashed lock plus
//! provenance events per stack.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
pub mod tripwire;
