//! UDP transport for Ethernet devices.
//!
//! Each datagram may hold several frames or only part of one; received bytes
//! are handed to the parser as a plain stream, exactly like a serial link.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, trace};

use super::Transport;
use crate::config::UdpConfig;
use crate::error::{EComError, EComResult};

/// Largest datagram sent in one `send_to` call.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Receive buffer large enough for any IPv4 UDP datagram.
const RX_DATAGRAM_CAPACITY: usize = 65536;

/// Non-blocking UDP link.
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    connected_mode: bool,
    rx_datagram: Vec<u8>,
    rx_pos: usize,
    rx_len: usize,
}

impl UdpTransport {
    /// Bind a local port and target `remote`.
    ///
    /// In connected mode, datagrams that do not come from `remote` are dropped.
    /// `allow_broadcast` enables `SO_BROADCAST` so `remote` may be a broadcast
    /// address.
    pub fn open(
        remote: impl ToSocketAddrs,
        local_port: u16,
        connected_mode: bool,
        allow_broadcast: bool,
    ) -> EComResult<Self> {
        let remote = remote
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| EComError::InvalidParameter("remote address did not resolve".into()))?;

        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.set_broadcast(allow_broadcast)?;

        debug!(
            "UDP transport bound to {} (remote {}, connected={}, broadcast={})",
            socket.local_addr()?,
            remote,
            connected_mode,
            allow_broadcast
        );

        Self::from_socket(socket, remote, connected_mode)
    }

    pub fn from_config(config: &UdpConfig) -> EComResult<Self> {
        Self::open(
            (config.remote_addr.as_str(), config.remote_port),
            config.local_port,
            config.connected_mode,
            config.allow_broadcast,
        )
    }

    /// Wrap an already bound socket. The socket is switched to non-blocking.
    pub fn from_socket(socket: UdpSocket, remote: SocketAddr, connected_mode: bool) -> EComResult<Self> {
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            remote,
            connected_mode,
            rx_datagram: vec![0u8; RX_DATAGRAM_CAPACITY],
            rx_pos: 0,
            rx_len: 0,
        })
    }

    pub fn local_addr(&self) -> EComResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Receive the next accepted datagram into the internal buffer.
    ///
    /// Returns `false` if no datagram is pending.
    fn fill_datagram(&mut self) -> io::Result<bool> {
        loop {
            match self.socket.recv_from(&mut self.rx_datagram) {
                Ok((len, from)) => {
                    if self.connected_mode && from != self.remote {
                        trace!("Dropping {} byte datagram from {}", len, from);
                        continue;
                    }
                    self.rx_pos = 0;
                    self.rx_len = len;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Transport for UdpTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        for chunk in data.chunks(MAX_DATAGRAM_SIZE) {
            let sent = self.socket.send_to(chunk, self.remote)?;
            if sent != chunk.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("datagram truncated: {sent} of {} bytes sent", chunk.len()),
                ));
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx_pos == self.rx_len && !self.fill_datagram()? {
            return Ok(0);
        }

        let count = buf.len().min(self.rx_len - self.rx_pos);
        buf[..count].copy_from_slice(&self.rx_datagram[self.rx_pos..self.rx_pos + count]);
        self.rx_pos += count;
        Ok(count)
    }

    fn name(&self) -> String {
        format!("udp:{}", self.remote)
    }
}
