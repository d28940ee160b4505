//! Point-to-point TCP transport for state exchanges.
//!
//! Each role owns one `Transport`. Connections are never reused: `connect`
//! drops any previous outbound stream before dialing, and `accept` drops the
//! previous inbound stream before taking the next one. Every socket
//! operation is bounded by the configured timeout, and timeouts are reported
//! separately from other failures so callers can treat them as routine.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use gossip_core::{MessageError, decode_state, encode_state};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Timed out after {after:?} during {op}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("Send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    #[error("Peer closed the connection before sending its state")]
    Closed,

    #[error("Peer hung up before the exchange was answered")]
    Abandoned,

    #[error("No open connection")]
    NotConnected,

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Socket parameters shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Bound on each connect/accept/send/recv
    pub timeout: Duration,
    /// Size of the single read that must hold a whole message
    pub buf_size: usize,
    /// Listen backlog
    pub backlog: u32,
}

/// One role's socket pair: an optional listener and the current connection.
pub struct Transport {
    settings: TransportSettings,
    /// Listen address (passive) or outbound source address (active)
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    stream: Option<(TcpStream, SocketAddr)>,
}

impl Transport {
    pub fn new(local_addr: SocketAddr, settings: TransportSettings) -> Self {
        Self {
            settings,
            local_addr,
            listener: None,
            stream: None,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Bind and listen now instead of on the first `accept`.
    ///
    /// Returns the bound address (useful when the configured port is 0).
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener
                .local_addr()
                .map_err(|source| self.bind_error(source));
        }

        let listener = self
            .new_socket(self.local_addr)
            .and_then(|socket| {
                socket.set_reuseaddr(true)?;
                socket.bind(self.local_addr)?;
                socket.listen(self.settings.backlog)
            })
            .map_err(|source| self.bind_error(source))?;
        let bound = listener
            .local_addr()
            .map_err(|source| self.bind_error(source))?;

        info!("Listening for exchanges on {}", bound);
        self.local_addr = bound;
        self.listener = Some(listener);
        Ok(bound)
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Dial `addr`, replacing any existing outbound connection.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        self.close();

        let socket = self
            .new_socket(addr)
            .and_then(|socket| {
                if self.local_addr.is_ipv4() == addr.is_ipv4() {
                    socket.set_reuseaddr(true)?;
                    socket.bind(self.local_addr)?;
                }
                Ok(socket)
            })
            .map_err(|source| TransportError::ConnectionFailed { addr, source })?;

        let stream = timeout(self.settings.timeout, socket.connect(addr))
            .await
            .map_err(|_| self.timeout_error("connect"))?
            .map_err(|source| TransportError::ConnectionFailed { addr, source })?;

        debug!("Connected to {}", addr);
        self.stream = Some((stream, addr));
        Ok(())
    }

    /// Wait for the next inbound connection, binding first if needed.
    ///
    /// Returns the peer's address.
    pub async fn accept(&mut self) -> Result<SocketAddr> {
        self.close();
        if self.listener.is_none() {
            self.bind()?;
        }
        let Some(listener) = self.listener.as_ref() else {
            return Err(TransportError::NotConnected);
        };

        let (stream, peer) = timeout(self.settings.timeout, listener.accept())
            .await
            .map_err(|_| self.timeout_error("accept"))?
            .map_err(TransportError::AcceptFailed)?;

        debug!("Accepted connection from {}", peer);
        self.stream = Some((stream, peer));
        Ok(peer)
    }

    /// Encode `value` and write it on the current connection.
    pub async fn send(&mut self, value: f64) -> Result<()> {
        let payload = encode_state(value)?;
        let after = self.settings.timeout;
        let (stream, _) = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        timeout(after, stream.write_all(&payload))
            .await
            .map_err(|_| TransportError::Timeout { op: "send", after })?
            .map_err(TransportError::SendFailed)?;
        Ok(())
    }

    /// Read once from the current connection and decode it as one message.
    pub async fn recv(&mut self) -> Result<f64> {
        let after = self.settings.timeout;
        let mut buf = vec![0u8; self.settings.buf_size];
        let (stream, _) = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let n = timeout(after, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout { op: "recv", after })?
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }

        Ok(decode_state(&buf[..n])?)
    }

    /// Check, without waiting, that the peer has not hung up since its message.
    ///
    /// A request that sat in the backlog past the initiator's timeout arrives
    /// followed by EOF; answering it would apply only one half of the exchange.
    pub fn ensure_peer_waiting(&self) -> Result<()> {
        let (stream, addr) = self.stream.as_ref().ok_or(TransportError::NotConnected)?;
        let mut extra = [0u8; 1];
        match stream.try_read(&mut extra) {
            Ok(0) => {
                debug!("{} hung up before the reply", addr);
                Err(TransportError::Abandoned)
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::ReceiveFailed(e)),
        }
    }

    /// Peer address of the current connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().map(|(_, addr)| *addr)
    }

    /// Drop the current connection, if any.
    pub fn close(&mut self) {
        if let Some((_, addr)) = self.stream.take() {
            debug!("Closed connection with {}", addr);
        }
    }

    fn new_socket(&self, addr: SocketAddr) -> io::Result<TcpSocket> {
        if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
    }

    fn bind_error(&self, source: io::Error) -> TransportError {
        TransportError::Bind {
            addr: self.local_addr,
            source,
        }
    }

    fn timeout_error(&self, op: &'static str) -> TransportError {
        TransportError::Timeout {
            op,
            after: self.settings.timeout,
        }
    }
}
