//! Command line interface module
//!
//! Argument parsing and the runner that wires config, logging, the registry
//! pipeline and the IPFS backend together.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
