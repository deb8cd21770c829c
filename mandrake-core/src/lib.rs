//! Mandrake Core
//!
//! Core types shared by the Mandrake server, client library and CLI.
//!
//! This crate contains:
//! - Domain types: the job record, its lifecycle states and run options
//! - DTOs: request/response bodies of the job service

pub mod domain;
pub mod dto;
