//! Non-blocking TCP transport
//!
//! Owns a single stream socket. Connecting never blocks: an in-progress
//! connect leaves the link in `Connecting` and `poll_connect` is called once
//! per tick until the OS reports success or failure.

use crate::error::TransportError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Largest single read
const RECV_BUFFER_SIZE: usize = 4096;

/// Connection status of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of one non-blocking read
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived
    Data(Vec<u8>),
    /// Nothing available right now
    Idle,
    /// Peer closed the connection
    Closed,
}

pub struct SocketTransport {
    socket: Option<Socket>,
    domain: Option<Domain>,
    status: LinkStatus,
    /// Bytes accepted by `send` but not yet taken by the socket
    pending: Vec<u8>,
    host: String,
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTransport {
    pub fn new() -> Self {
        Self {
            socket: None,
            domain: None,
            status: LinkStatus::Disconnected,
            pending: Vec::new(),
            host: String::new(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == LinkStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status == LinkStatus::Connecting
    }

    /// Bytes still waiting to be written
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Create a fresh non-blocking IPv4 stream socket, replacing any old one
    pub fn init(&mut self) -> Result<(), TransportError> {
        self.open(Domain::IPV4)
    }

    fn open(&mut self, domain: Domain) -> Result<(), TransportError> {
        self.disconnect();

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(TransportError::Socket)?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::Socket)?;

        self.socket = Some(socket);
        self.domain = Some(domain);
        Ok(())
    }

    /// Start connecting to `host:port`.
    ///
    /// Returns Ok when the link is either Connected or Connecting.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.host = format!("{}:{}", host, port);

        let addr = resolve(host, port).ok_or_else(|| TransportError::Connect {
            host: self.host.clone(),
            reason: "could not resolve host".to_string(),
        })?;

        let domain = Domain::for_address(addr);
        if self.socket.is_none() || self.domain != Some(domain) {
            self.open(domain)?;
        }

        let result = match &self.socket {
            Some(socket) => socket.connect(&SockAddr::from(addr)),
            None => return Err(self.connect_error("socket not initialised")),
        };

        match result {
            Ok(()) => {
                info!("Connected to {}", self.host);
                self.status = LinkStatus::Connected;
                Ok(())
            }
            Err(e) if is_in_progress(&e) => {
                debug!("Connect to {} in progress", self.host);
                self.status = LinkStatus::Connecting;
                Ok(())
            }
            Err(e) => {
                warn!("Could not connect to {}: {}", self.host, e);
                self.disconnect();
                Err(self.connect_error(&e.to_string()))
            }
        }
    }

    /// Check whether an in-progress connect has finished. Never blocks.
    pub fn poll_connect(&mut self) -> Result<LinkStatus, TransportError> {
        if self.status != LinkStatus::Connecting {
            return Ok(self.status);
        }

        let outcome = match &self.socket {
            Some(socket) => match socket.take_error() {
                Ok(Some(e)) | Err(e) => Err(e),
                Ok(None) => match socket.peer_addr() {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
                    Err(e) => Err(e),
                },
            },
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")),
        };

        match outcome {
            Ok(true) => {
                info!("Connected to {}", self.host);
                self.status = LinkStatus::Connected;
                Ok(self.status)
            }
            Ok(false) => Ok(self.status),
            Err(e) => {
                warn!("Connect to {} failed: {}", self.host, e);
                self.disconnect();
                Err(self.connect_error(&e.to_string()))
            }
        }
    }

    /// Queue bytes and write as much as the socket accepts.
    ///
    /// "Would block" is not an error; the remainder goes out on `flush`.
    /// Bytes sent while not connected are dropped.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.status != LinkStatus::Connected {
            debug!("Dropping {} bytes, link is {:?}", bytes.len(), self.status);
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);
        self.flush()
    }

    /// Retry writing queued bytes
    pub fn flush(&mut self) -> Result<(), TransportError> {
        if self.status != LinkStatus::Connected {
            return Ok(());
        }

        let mut failure = None;
        if let Some(socket) = self.socket.as_mut() {
            while !self.pending.is_empty() {
                match socket.write(&self.pending) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.pending.drain(..n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        match failure {
            Some(e) => {
                warn!("Send to {} failed: {}", self.host, e);
                self.disconnect();
                Err(TransportError::Send(e))
            }
            None => Ok(()),
        }
    }

    /// One non-blocking read
    pub fn receive(&mut self) -> Result<ReadOutcome, TransportError> {
        if self.status != LinkStatus::Connected {
            return Ok(ReadOutcome::Idle);
        }

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let result = match self.socket.as_mut() {
            Some(socket) => socket.read(&mut buffer),
            None => return Ok(ReadOutcome::Idle),
        };

        match result {
            Ok(0) => {
                info!("Connection to {} closed by peer", self.host);
                self.disconnect();
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => Ok(ReadOutcome::Data(buffer[..n].to_vec())),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => {
                warn!("Receive from {} failed: {}", self.host, e);
                self.disconnect();
                Err(TransportError::Receive(e))
            }
        }
    }

    /// Close the socket if open. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            if self.status == LinkStatus::Connected {
                let _ = socket.shutdown(std::net::Shutdown::Both);
            }
        }
        self.domain = None;
        self.pending.clear();
        self.status = LinkStatus::Disconnected;
    }

    fn connect_error(&self, reason: &str) -> TransportError {
        TransportError::Connect {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().ok()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

fn is_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || is_einprogress(err)
}

#[cfg(unix)]
fn is_einprogress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn is_einprogress(_err: &io::Error) -> bool {
    false
}
