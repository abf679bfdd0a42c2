//! # EviFluor host application
//!
//! Library half of the `evifluor` binary. The instrument driver and run
//! workflow live in the workspace crates; this crate wires them to the
//! command line.
//!
//! - **`cli`**: clap definitions and command execution
//! - **`config`**: layered configuration (defaults, TOML file, environment)
//! - **`logging`**: `tracing-subscriber` setup

pub mod cli;
pub mod config;
pub mod logging;
