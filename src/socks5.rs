//! SOCKS5 negotiation stages (RFC 1928, CONNECT with no authentication).

use async_trait::async_trait;
use bytebuffer::ByteBuffer;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use strum_macros::Display;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::address::{self, Address};
use crate::context::Context;
use crate::dialer::Dialer;
use crate::error::Error;
use crate::handler::{Handler, Outcome};
use crate::Result;

pub const VERSION: u8 = 0x05;
pub const RSV: u8 = 0x00;

pub const NO_AUTHENTICATION_REQUIRED: u8 = 0x00;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xff;

pub const CONNECT: u8 = 0x01;

/// Reply codes sent back in command replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NetworkUnreachable = 0x03,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

fn check_version(v: u8) -> Result<()> {
    if v == VERSION {
        Ok(())
    } else {
        Err(Error::UnknownProtocol(v))
    }
}

/// Fixed 10-byte failure frame, whatever the requested address type was.
pub fn error_reply(rep: Reply) -> [u8; 10] {
    [VERSION, rep as u8, RSV, 0, 0, 0, 0, 0, 0, 0]
}

/// Success frame echoing `bound`, normally the dialer's local address.
pub fn success_reply(bound: &Address) -> Vec<u8> {
    let mut msg = ByteBuffer::new();
    msg.write_bytes(&[VERSION, Reply::Succeeded as u8, RSV]);
    bound.encode(&mut msg);
    msg.into_vec()
}

/// Picks the first allowed method the client also offers.
pub struct AuthMethodNegotiation {
    allowed: Vec<u8>,
}

impl AuthMethodNegotiation {
    pub fn new(allowed: Vec<u8>) -> Self {
        Self { allowed }
    }

    fn select(&self, offered: &[u8]) -> Option<u8> {
        self.allowed
            .iter()
            .copied()
            .find(|allowed| offered.contains(allowed))
    }
}

#[async_trait]
impl Handler for AuthMethodNegotiation {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let (conn, buf) = ctx.source_and_buffer()?;

        conn.read_exact(&mut buf[..2]).await?;
        check_version(buf[0])?;

        let n = buf[1] as usize;
        conn.read_exact(&mut buf[..n]).await?;

        match self.select(&buf[..n]) {
            Some(method) => {
                conn.write_all(&[VERSION, method]).await?;
                ctx.auth = method;
                Ok(Outcome::Continue)
            }
            None => {
                conn.write_all(&[VERSION, NO_ACCEPTABLE_METHODS]).await?;
                warn!("no accept methods");
                Ok(Outcome::Abort)
            }
        }
    }
}

/// Runs the negotiated method. Only "no authentication" exists.
pub struct Auth;

#[async_trait]
impl Handler for Auth {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        match ctx.auth {
            NO_AUTHENTICATION_REQUIRED => {
                info!("no authentication required");
                Ok(Outcome::Continue)
            }
            method => {
                warn!(method = format_args!("{method:#04x}"), "auth method not implemented");
                if let Err(e) = ctx
                    .source()?
                    .write_all(&[VERSION, NO_ACCEPTABLE_METHODS])
                    .await
                {
                    warn!(error = %e, "fail to send reply");
                }
                Ok(Outcome::AbortAndClose)
            }
        }
    }
}

/// Reads `[ver][cmd][rsv][atyp][addr][port]` into the context.
pub struct CommandNegotiation {
    allowed: Vec<u8>,
}

impl CommandNegotiation {
    pub fn new(allowed: Vec<u8>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Handler for CommandNegotiation {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let (conn, buf) = ctx.source_and_buffer()?;

        conn.read_exact(&mut buf[..3]).await?;
        check_version(buf[0])?;

        let cmd = buf[1];
        if !self.allowed.contains(&cmd) {
            warn!(command = format_args!("{cmd:#04x}"), "command not support");
            conn.write_all(&error_reply(Reply::CommandNotSupported)).await?;
            return Ok(Outcome::AbortAndClose);
        }

        conn.read_exact(&mut buf[..1]).await?;
        let host = match buf[0] {
            address::IPV4 => {
                conn.read_exact(&mut buf[..4]).await?;
                let octets: [u8; 4] = [buf[0], buf[1], buf[2], buf[3]];
                Ipv4Addr::from(octets).to_string()
            }
            address::DOMAIN => {
                conn.read_exact(&mut buf[..1]).await?;
                let len = buf[0] as usize;
                conn.read_exact(&mut buf[..len]).await?;
                String::from_utf8(buf[..len].to_vec())
                    .map_err(|_| Error::InvalidAddress("domain is not utf8".to_string()))?
            }
            address::IPV6 => {
                conn.read_exact(&mut buf[..16]).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                Ipv6Addr::from(octets).to_string()
            }
            atyp => {
                warn!(atyp = format_args!("{atyp:#04x}"), "address type not supported");
                conn.write_all(&error_reply(Reply::AddressTypeNotSupported)).await?;
                return Ok(Outcome::AbortAndClose);
            }
        };

        conn.read_exact(&mut buf[..2]).await?;
        let port = (buf[0] as u16) << 8 | buf[1] as u16;

        ctx.cmd = cmd;
        ctx.host = host;
        ctx.port = port;
        Ok(Outcome::Continue)
    }
}

/// Executes the negotiated command. CONNECT dials the target.
pub struct Command {
    dialer: Arc<dyn Dialer>,
}

impl Command {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl Handler for Command {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        match ctx.cmd {
            CONNECT => {
                let addr = ctx.target_addr();
                let target = match self.dialer.dial(&addr).await {
                    Ok(target) => target,
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "fail to dial target");
                        if let Err(e) = ctx
                            .source()?
                            .write_all(&error_reply(Reply::NetworkUnreachable))
                            .await
                        {
                            warn!(error = %e, "fail to send reply");
                        }
                        return Ok(Outcome::AbortAndClose);
                    }
                };

                let bound = Address::from(target.local_addr()?);
                ctx.set_target(target);
                ctx.source()?.write_all(&success_reply(&bound)).await?;
                info!(addr = %addr, bound = %bound, "target connected");
                Ok(Outcome::Continue)
            }
            cmd => {
                warn!(command = format_args!("{cmd:#04x}"), "command not implemented");
                if let Err(e) = ctx
                    .source()?
                    .write_all(&error_reply(Reply::GeneralFailure))
                    .await
                {
                    warn!(error = %e, "fail to send reply");
                }
                Ok(Outcome::AbortAndClose)
            }
        }
    }
}
