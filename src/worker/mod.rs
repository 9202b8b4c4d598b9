//! Background work started by each streaming session.

pub mod runner;
pub mod workload;
