//! Core domain types
//!
//! The job record is owned and mutated by the server and observed by the
//! client through polling. Both sides share these definitions.

pub mod job;
pub mod run;
