//! Non-blocking UDP endpoint
//!
//! A thin wrapper that configures a datagram socket through `socket2` and
//! exposes the descriptor the reactor watches.

use crate::handler::SocketNum;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// Endpoint errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Multicast group {0} requires an IPv4 endpoint")]
    MulticastFamily(Ipv4Addr),
}

impl SocketError {
    /// True when a non-blocking call found nothing to do
    pub fn is_would_block(&self) -> bool {
        matches!(self, SocketError::Io(e) if e.kind() == ErrorKind::WouldBlock)
    }
}

/// Non-blocking UDP socket registered with a reactor by descriptor
#[derive(Debug)]
pub struct UdpEndpoint {
    inner: UdpSocket,
}

impl UdpEndpoint {
    /// Bind a non-blocking endpoint with `SO_REUSEADDR` set
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        tracing::debug!(%addr, fd = socket.as_raw_fd(), "bound UDP endpoint");
        Ok(UdpEndpoint {
            inner: socket.into(),
        })
    }

    /// Descriptor to hand to the reactor
    pub fn socket_num(&self) -> SocketNum {
        self.inner.as_raw_fd()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Join an IPv4 multicast group on the default interface
    pub fn join_multicast_v4(&self, group: Ipv4Addr) -> Result<(), SocketError> {
        if !self.local_addr()?.is_ipv4() {
            return Err(SocketError::MulticastFamily(group));
        }
        self.inner
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        Ok(())
    }

    /// Send one datagram; `WouldBlock` surfaces as an error
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram; `WouldBlock` surfaces as an error
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf)?)
    }

    /// Receive one datagram, mapping `WouldBlock` to `None`
    pub fn try_recv_from(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    pub fn as_udp_socket(&self) -> &UdpSocket {
        &self.inner
    }
}

impl AsRawFd for UdpEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
