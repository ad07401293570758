use std::fmt;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::NtrError;

/// Where a device listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Open a TCP connection, giving up after `timeout`.
    pub async fn connect(&self, timeout: Duration) -> Result<TcpStream, NtrError> {
        debug!("connecting to {self}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| NtrError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
