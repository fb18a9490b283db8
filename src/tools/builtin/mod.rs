//! Built-in step tools backed by the warranty and ticketing services.

pub mod ticket;
pub mod warranty;

pub use ticket::{CreateTicketTool, HttpTicketService, TicketRequest, TicketService};
pub use warranty::{HttpWarrantyService, WarrantyLookupTool, WarrantyService};
