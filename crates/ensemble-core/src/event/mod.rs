//! Event bus and approval channel.
//!
//! The engine is observed exclusively through `WorkflowEvent`s published on
//! the bus, and asks for human input exclusively through an
//! `ApprovalHandler`.

mod approval;
mod bus;

pub use approval::ApprovalHandler;
pub use bus::EventBus;
