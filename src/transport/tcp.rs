//! TCP connection to the screenshot producer.
//!
//! # Example
//!
//! ```ignore
//! use shotwire::transport::connect;
//! use std::time::Duration;
//!
//! let stream = connect("127.0.0.1", 4444, Some(Duration::from_secs(5))).await?;
//! ```

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Result, ShotwireError};

/// Format a `host:port` pair for logs and errors.
///
/// IPv6 literals are wrapped in brackets.
pub fn format_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Open a TCP connection to the producer.
///
/// Resolves `host`, connects with an optional timeout, and disables Nagle's
/// algorithm so the 4-byte request token goes out immediately.
///
/// # Errors
///
/// Returns [`ShotwireError::Connect`] for resolution, refusal, or timeout.
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addr = format_addr(host, port);
    tracing::debug!("Connecting to {}", addr);

    let attempt = TcpStream::connect((host, port));
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {:?}", limit),
            )),
        },
        None => attempt.await,
    };

    let stream = result.map_err(|source| ShotwireError::Connect {
        addr: addr.clone(),
        source,
    })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY on {}: {}", addr, e);
    }

    tracing::info!("Connected to {}", addr);
    Ok(stream)
}
