//! Email processing pipeline.
//!
//! Inbound emails flow through:
//! 1. `EmailTransport::fetch_inbound()` for spool/channel I/O
//! 2. `EmailProcessor::process()` which runs the step orchestrator
//! 3. `EmailTransport::send()` for the reply, only when the run reached DONE

pub mod email_processor;
pub mod types;

pub use email_processor::{EmailProcessor, spawn_email_processor};
pub use types::{BatchSummary, ProcessingResult};
