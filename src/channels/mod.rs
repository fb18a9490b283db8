//! Email I/O: inbound parsing and the transport replies go out through.

pub mod email;
pub mod email_types;

pub use email::{EmailConfig, EmailTransport, SmtpConfig, SpoolMailbox};
pub use email_types::InboundEmail;
