//! `medflow-client` library crate.
//!
//! Configuration, argument parsing and the session supervisor. The binary
//! entrypoint lives in `main.rs`.

pub mod cli;
pub mod config;
pub mod supervisor;
