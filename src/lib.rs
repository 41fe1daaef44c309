//! # shotwire
//!
//! Pull-based screenshot streaming client.
//!
//! A producer (the "bot") serves raw RGB screenshots over TCP. This crate
//! connects to it, asks for one frame at a time with the `more` token, and
//! reassembles each `<height>|<payload_length>|<payload>` response into a
//! [`Frame`](protocol::Frame) for a [`FrameSink`](sink::FrameSink).
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): header codec and the request/response frame reader
//! - **Transport** ([`transport`]): TCP connect with timeout
//! - **Session** ([`session`]): the request loop, stop signal and reconnect policy
//! - **Sinks** ([`sink`]): channel, closure and PNG directory consumers
//!
//! ## Example
//!
//! ```no_run
//! use shotwire::sink::PngDirSink;
//! use shotwire::SessionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> shotwire::Result<()> {
//!     let session = SessionBuilder::new()
//!         .host("127.0.0.1")
//!         .port(4444)
//!         .start(PngDirSink::create("screenshots")?)
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     let report = session.shutdown().await?;
//!     println!("{} frames", report.stats.frames_delivered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

mod backoff;
mod client;

pub use client::{SessionBuilder, SessionHandle};
pub use config::{ReconnectPolicy, SessionConfig};
pub use error::{Result, ShotwireError};
pub use session::{ConnectionState, SessionEnd, SessionLoop, SessionReport, SessionStats, StopSignal};
