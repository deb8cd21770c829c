//! Data Transfer Objects for the job service
//!
//! Request and response bodies exchanged between the client and the server.

pub mod job;
