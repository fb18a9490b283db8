//! Warranty agent: step-orchestrated handling of customer warranty emails.
//!
//! An inbound email becomes a [`steps::StepContext`]; the
//! [`steps::StepOrchestrator`] executes instruction-driven steps through an
//! LLM until one of them reports DONE, and the [`pipeline::EmailProcessor`]
//! sends the composed reply.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod steps;
pub mod tools;
