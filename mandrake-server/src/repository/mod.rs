//! Repository Module
//!
//! Data access layer for the server.
//! Jobs are kept in memory for the lifetime of the process.

pub mod job;

pub use job::{JobRegistry, RegistryError};
