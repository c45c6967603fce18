//! Blocking HTTP transport built on reqwest.

use std::io::{self, Read, Write};
use std::time::Duration;

use reqwest::blocking::Client;

use super::super::error::{DataError, DataResult};
use super::super::traits::{Transport, TransportError};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// HTTP transport for release assets.
///
/// Follows redirects (release hosts usually answer with one) and streams the
/// body straight into the caller's sink.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> DataResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> DataResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jpidwr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError> {
        let mut response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        // Read before the body; reqwest reports what is left, not the total.
        let expected_len = response.content_length();

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let bytes_read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Body(e.to_string())),
            };

            sink.write_all(&buffer[..bytes_read])
                .map_err(TransportError::Sink)?;
            written += bytes_read as u64;
        }

        if let Some(expected) = expected_len {
            if written != expected {
                return Err(TransportError::Body(format!(
                    "expected {} bytes, received {}",
                    expected, written
                )));
            }
        }

        sink.flush().map_err(TransportError::Sink)?;
        Ok(written)
    }
}
