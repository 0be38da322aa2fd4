use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{Chain, Handler};
use crate::Result;

/// Accept loop feeding every connection through the same handler chain.
pub struct TcpServer {
    addr: String,
    handlers: Vec<Arc<dyn Handler>>,
    final_handler: Option<Arc<dyn Handler>>,
}

impl TcpServer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            handlers: Vec::new(),
            final_handler: None,
        }
    }

    pub fn use_handler(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn set_final_handler(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.final_handler = Some(handler);
        self
    }

    /// Freezes the stages into the chain shared by every connection.
    pub fn chain(&self) -> Result<Chain> {
        let final_handler = self
            .final_handler
            .clone()
            .ok_or_else(|| Error::Config("final handler not set".to_string()))?;
        Ok(Chain::new(self.handlers.clone(), final_handler))
    }

    pub async fn listen_and_serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Returns only when accepting fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let chain = Arc::new(self.chain()?);
        info!(addr = %listener.local_addr()?, "start listen to tcp socket");

        loop {
            let (conn, _) = listener.accept().await?;
            let chain = Arc::clone(&chain);
            tokio::spawn(async move {
                let ctx = Context::new(conn);
                chain.serve(ctx).await;
            });
        }
    }
}
