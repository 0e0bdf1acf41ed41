//! Launching and stopping supervised subprocesses.
//!
//! [`launch`] turns a [`LaunchSpec`] into a [`ManagedProcess`]. The handle
//! hands out the captured output pipes once ([`ManagedProcess::take_output`])
//! and resolves to a [`ProcessExit`] either when the process exits on its own
//! ([`ManagedProcess::wait`]) or after the harness stops it
//! ([`ManagedProcess::terminate`]).

mod process;
mod spec;

pub use process::{ManagedProcess, ProcessExit, ProcessGroups, ProcessOutput, launch};
pub use spec::LaunchSpec;
