//! Unified subprocess abstraction for short-lived helper commands.
//!
//! Long-running workloads are spawned by the execution backends directly;
//! this layer covers the one-shot calls around them (container runtime
//! queries, image pulls) so they can be replaced by [`MockProcessRunner`]
//! in tests.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
