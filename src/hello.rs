//! Agent/relay "say hello" handshake.
//!
//! Both sides exchange fixed six byte tokens right after connecting. The
//! tokens are static shared values, not derived from any per-connection
//! nonce: this only keeps stray clients off the relay port and provides no
//! confidentiality or authentication in the cryptographic sense.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::context::Context;
use crate::dialer::{Dialer, DEFAULT_DIAL_TIMEOUT};
use crate::error::Error;
use crate::handler::{Handler, Outcome};
use crate::Result;

pub const CLIENT_SECRET: &[u8; 6] = b"dfb06f";
pub const SERVER_SECRET: &[u8; 6] = b"be6048";

/// Compares without stopping at the first differing byte.
fn tokens_match(got: &[u8], expected: &[u8]) -> bool {
    got.len() == expected.len()
        && got
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Chooses the relay an agent connection is tunnelled to.
pub trait RelayPicker: Send + Sync {
    fn pick(&self) -> Option<String>;
}

/// Always the same relay.
#[derive(Debug, Clone)]
pub struct StaticRelay(pub String);

impl RelayPicker for StaticRelay {
    fn pick(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Agent side: dials a relay and proves it knows the client token.
pub struct ClientSayHello {
    dialer: Arc<dyn Dialer>,
    relays: Arc<dyn RelayPicker>,
    timeout: Duration,
}

impl ClientSayHello {
    pub fn new(dialer: Arc<dyn Dialer>, relays: Arc<dyn RelayPicker>) -> Self {
        Self {
            dialer,
            relays,
            timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Bounds the token exchange once the relay is connected.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Handler for ClientSayHello {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let addr = self.relays.pick().ok_or(Error::NoRelay)?;
        let mut target = self.dialer.dial(&addr).await?;

        info!(relay = %addr, "client say hello");
        let buf = &mut ctx.buffer()[..SERVER_SECRET.len()];
        let exchange = async {
            target.write_all(CLIENT_SECRET).await?;
            target.read_exact(&mut *buf).await?;
            Ok::<_, io::Error>(())
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::HandshakeTimeout(self.timeout)),
        }
        if !tokens_match(buf, SERVER_SECRET) {
            return Err(Error::HandshakeMismatch);
        }

        info!("handshake successfully");
        let relay = target.peer_addr()?;
        ctx.host = relay.ip().to_string();
        ctx.port = relay.port();
        ctx.set_target(target);
        Ok(Outcome::Continue)
    }
}

/// Relay side: expects the client token, answers with the server token.
pub struct ServerSayHello;

#[async_trait]
impl Handler for ServerSayHello {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let (conn, buf) = ctx.source_and_buffer()?;
        let buf = &mut buf[..CLIENT_SECRET.len()];

        conn.read_exact(buf).await?;
        if !tokens_match(buf, CLIENT_SECRET) {
            warn!("secret key mismatch");
            return Ok(Outcome::AbortAndClose);
        }

        info!("server say hello");
        conn.write_all(SERVER_SECRET).await?;
        info!("handshake successfully");
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match(b"dfb06f", CLIENT_SECRET));
        assert!(!tokens_match(b"dfb06e", CLIENT_SECRET));
        assert!(!tokens_match(b"dfb06", CLIENT_SECRET));
        assert!(!tokens_match(SERVER_SECRET, CLIENT_SECRET));
    }

    #[test]
    fn test_static_relay() {
        let relay = StaticRelay("10.0.0.1:1081".to_string());
        assert_eq!(relay.pick().as_deref(), Some("10.0.0.1:1081"));
    }
}
