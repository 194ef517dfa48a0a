//! cutover-supervisor — owns the managed child processes.
//!
//! # Components
//!
//! - **`process`** — `ProcessSupervisor::start/stop`, the `Instance` record
//!   and its exclusively owned `ProcessHandle`
//! - **`launch`** — command templates (`{artifact}`, `{port}`)
//! - **`sink`** — one append-only output file per version id
//! - **`tail`** — `LogTailer`, a live line stream over a sink
//! - **`port`** — free-port allocation from a fixed range
//!
//! Every started process gets exactly one reaper task. The reaper owns
//! the `tokio::process::Child`, records the exit outcome whether or not
//! `stop` was ever called, and is the only place a kill signal is sent
//! from.

pub mod error;
pub mod launch;
pub mod port;
pub mod process;
pub mod sink;
pub mod tail;

pub use error::{PortError, StartError, StopError, TailError};
pub use launch::LaunchSpec;
pub use port::PortAllocator;
pub use process::{ExitOutcome, Instance, ProcessHandle, ProcessSupervisor};
pub use sink::LogSinks;
pub use tail::{LogLine, LogStream, LogTailer};
