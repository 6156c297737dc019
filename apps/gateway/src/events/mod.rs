//! Event handling module
//!
//! Decodes twilight gateway events into dispatch payloads for the supervisor.

pub mod serialize;

pub use serialize::dispatch_payload;
