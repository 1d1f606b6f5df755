//! Domain module - core types and business rules
//!
//! Everything here is I/O-free: record types, the list/detail merge,
//! the job state machine, collaborator contracts, and the error taxonomy.

pub mod case;
pub mod errors;
pub mod job;
pub mod services;
