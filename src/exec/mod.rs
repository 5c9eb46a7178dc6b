// src/exec/mod.rs

//! Process execution layer.
//!
//! One [`Executor`] supervises exactly one task's `/bin/bash` process, using
//! `tokio::process::Command`, and reports the terminal status back to the
//! scheduler.

pub mod executor;

pub use executor::Executor;
