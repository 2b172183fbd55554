//! The accreditation backend: domain types, endpoint catalog, tag kinds and
//! a session-aware client.

mod client;
pub mod mutations;
pub mod queries;
pub mod tags;
pub mod types;

pub use client::AccreditClient;
