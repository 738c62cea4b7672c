//! Request handlers.

pub mod executions;
pub mod health;
pub mod scans;
pub mod schedules;
