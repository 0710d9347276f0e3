//! Local port readiness probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Answers "is something listening on this local port?".
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, port: u16) -> bool;
}

/// TCP connect to `127.0.0.1:<port>` bounded by a timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_open(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }
}
