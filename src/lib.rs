//! flowhost: a control plane that runs one workflow container per artifact.
//!
//! The manager binary provisions Docker containers on a bounded host port
//! range, supervises their lifecycle, reconciles health, and proxies
//! workflow execution to them over HTTP. The worker binary runs inside each
//! container and executes workflows one at a time off an in-memory queue.

pub mod config;
pub mod error;
pub mod logbuf;
pub mod manager;
pub mod runtime;
pub mod worker;

pub use error::{HostError, Result};
