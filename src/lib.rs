//! Raw packet flood generator: packets are described by templates that are rendered,
//! decoded and injected at layer 3 on every iteration of a job.

pub mod cancel;
pub mod config;
pub mod error;
pub mod gate;
pub mod job;
pub mod metrics;
pub mod monitor;
pub mod packet;
/// Raw IPv4 connections and packet encoding
pub mod raw;
/// Guard against panicking jobs
pub mod supervisor;
/// The packet template language
pub mod templates;

pub use cancel::CancelToken;
pub use config::JobConfig;
pub use error::JobError;
pub use job::{run_packetgen, run_packetgen_with_gate, JobContext, JobSummary};
