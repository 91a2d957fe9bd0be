//! censorprobe - client-side censorship assessment and circumvention probe
//!
//! A dependency-ordered, skip-aware scheduler runs four network probe
//! groups (Route, DNS, TCP, TLS) in turn, each internally running many
//! concurrent probes under per-probe deadlines, threading each group's
//! results into a shared registry later groups consult to decide whether
//! they can even run.

pub mod colors;
pub mod config;
pub mod error;
pub mod group;
pub mod groups;
pub mod logging;
pub mod probe;
pub mod results;
pub mod scheduler;

pub use config::{AppSettings, GlobalConfig};
pub use error::{ConfigError, ProbeError, SchedulerError};
pub use results::GlobalResults;

/// Library version, surfaced the way the teacher's crate surfaces its own.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
