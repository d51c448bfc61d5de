//! Shell internals for the `arbiter` binary: command parsing and the REPL
//! session wrapper. The binary in `main.rs` wires components from config and
//! hands them to [`repl::run_repl`].

pub mod commands;
pub mod repl;

pub use commands::Command;
