//! Domain model: schedules, scans, cookies, job executions.

pub mod cookie;
pub mod execution;
pub mod scan;
pub mod schedule;
