use std::io;
use tokio::net::TcpStream;
use tracing::{debug, info, Span};

/// Largest single SOCKS5 field: atyp + length + 255 byte domain + port.
pub const MAX_BUFFER_SIZE: usize = 1 + 1 + 255 + 2;

/// Cursor value that stops the handler chain.
pub(crate) const ABORT_INDEX: usize = 0xffff;

/// Per-connection state threaded through the handler chain.
pub struct Context {
    span: Span,
    source: Option<TcpStream>,
    target: Option<TcpStream>,

    pub auth: u8,
    pub cmd: u8,
    pub host: String,
    pub port: u16,
    buf: [u8; MAX_BUFFER_SIZE],

    pub(crate) next_index: usize,
}

impl Context {
    pub fn new(source: TcpStream) -> Context {
        let id: u64 = rand::random();
        let peer = source
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let span = tracing::info_span!("conn", id = %format!("{id:016x}"), peer = %peer);
        span.in_scope(|| info!("new connection"));

        Context {
            span,
            source: Some(source),
            target: None,
            auth: 0,
            cmd: 0,
            host: String::new(),
            port: 0,
            buf: [0; MAX_BUFFER_SIZE],
            next_index: 0,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn source(&mut self) -> io::Result<&mut TcpStream> {
        self.source
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "source closed"))
    }

    /// Source stream together with the scratch buffer, for stages that
    /// read protocol fields straight into the buffer.
    pub fn source_and_buffer(
        &mut self,
    ) -> io::Result<(&mut TcpStream, &mut [u8; MAX_BUFFER_SIZE])> {
        match self.source.as_mut() {
            Some(source) => Ok((source, &mut self.buf)),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "source closed")),
        }
    }

    pub fn take_source(&mut self) -> Option<TcpStream> {
        self.source.take()
    }

    pub fn set_target(&mut self, target: TcpStream) {
        self.target = Some(target);
    }

    pub fn take_target(&mut self) -> Option<TcpStream> {
        self.target.take()
    }

    pub fn buffer(&mut self) -> &mut [u8; MAX_BUFFER_SIZE] {
        &mut self.buf
    }

    pub fn target_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn abort(&mut self) {
        self.next_index = ABORT_INDEX;
    }

    pub fn is_aborted(&self) -> bool {
        self.next_index == ABORT_INDEX
    }

    pub fn abort_and_close_source(&mut self) {
        self.abort();
        if self.source.take().is_some() {
            debug!("source conn closed");
        }
    }

    /// Drops both streams. Safe to call more than once.
    pub fn close(&mut self) {
        self.source.take();
        if self.target.take().is_some() {
            debug!("target conn closed");
        }
    }
}
