use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::Error;
use crate::quota::QuotaLedger;
use crate::Result;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens outbound connections for the command and pipe stages.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<TcpStream>;
}

/// Plain TCP dialer with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(Error::DialTimeout {
                addr: addr.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Refuses to dial while the ledger is below its low-water mark.
pub struct QuotaDialer {
    ledger: Arc<QuotaLedger>,
    inner: Arc<dyn Dialer>,
}

impl QuotaDialer {
    pub fn new(ledger: Arc<QuotaLedger>, inner: Arc<dyn Dialer>) -> Self {
        Self { ledger, inner }
    }
}

#[async_trait]
impl Dialer for QuotaDialer {
    async fn dial(&self, addr: &str) -> Result<TcpStream> {
        if !self.ledger.enough() {
            return Err(Error::NotEnoughQuota);
        }
        self.inner.dial(addr).await
    }
}
