//! Service Module
//!
//! Business logic layer for the server.
//! Services coordinate the job registry and the executor.

pub mod job;

// Re-export for convenience
pub use job as job_service;
