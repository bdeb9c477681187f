//! Notegate - Notes Service Behind an Admission Gate
//!
//! This crate serves a small notes CRUD API over HTTP. Every request first
//! passes a per-client sliding-window admission gate; clients over their
//! limit get a 429 and never reach the router.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
pub mod notes;
