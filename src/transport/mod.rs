//! Transport module - TCP connection to the producer.
//!
//! The producer listens; this crate always dials out, one connection per
//! session run (plus reconnects when the policy allows them).

mod tcp;

pub use tcp::{connect, format_addr};
