//! # Datagram transport helper
//!
//! A thin wrapper around a UDP socket with the operations the UDP driver and the target
//! emulator need: bounded waits, scatter reads that split a reply into header and
//! payload without copying, path MTU discovery and control over IP fragmentation.
use std::{
    io::{self, ErrorKind, IoSliceMut},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    os::fd::AsFd,
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, poll},
    sys::uio::readv,
};
use xvc_server::{Error, IoContext, Result};

/// Bytes of IPv4 and UDP header in every datagram.
pub const IPV4_UDP_OVERHEAD: u32 = 28;
/// Bytes of IPv6 and UDP header in every datagram.
pub const IPV6_UDP_OVERHEAD: u32 = 48;

#[derive(Debug)]
pub struct Datagram {
    socket: UdpSocket,
}

impl Datagram {
    /// Creates a socket connected to the first address `target` resolves to.
    pub fn connect(target: impl ToSocketAddrs) -> Result<Datagram> {
        let addr = target
            .to_socket_addrs()
            .context("Resolving UDP target")?
            .next()
            .ok_or_else(|| Error::Config("UDP target resolved to no address".to_string()))?;
        let local = match addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).context("Binding UDP socket")?;
        socket
            .connect(addr)
            .context(format!("Connecting UDP socket to {}", addr))?;
        log::debug!("UDP socket connected to {}", addr);
        Ok(Datagram { socket })
    }

    pub fn bind(addr: impl ToSocketAddrs) -> Result<Datagram> {
        let socket = UdpSocket::bind(addr).context("Binding UDP socket")?;
        Ok(Datagram { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("Querying local address")
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.socket.peer_addr().context("Querying peer address")
    }

    /// Sends one datagram to the connected peer.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        match self.socket.send(buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => Err(Error::Protocol(format!(
                "sent {} of {} bytes of a datagram",
                n,
                buf.len()
            ))),
            Err(err) if err.raw_os_error() == Some(Errno::EMSGSIZE as i32) => Err(Error::io(
                format!(
                    "Sending a {} byte datagram exceeds the path MTU; lower the MTU with -m",
                    buf.len()
                ),
                err,
            )),
            Err(err) => Err(Error::io("Sending datagram", err)),
        }
    }

    /// Waits until a datagram is readable. Returns `false` if `timeout` expired first.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        loop {
            let mut fds = [PollFd::new(self.socket.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, millis) {
                Ok(n) => return Ok(n > 0),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::io("Polling UDP socket", errno.into())),
            }
        }
    }

    /// Receives one datagram within `timeout`, scattering its first bytes into `hdr` and
    /// the rest into `payload`. Returns the number of bytes stored; bytes beyond both
    /// buffers are discarded.
    pub fn recv_split(&self, hdr: &mut [u8], payload: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.wait_readable(timeout)? {
            return Err(Error::Timeout(format!(
                "waiting {:?} for a UDP response",
                timeout
            )));
        }
        let mut iov = [IoSliceMut::new(hdr), IoSliceMut::new(payload)];
        loop {
            match readv(self.socket.as_fd(), &mut iov) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::io("Receiving datagram", errno.into())),
            }
        }
    }

    /// Discards datagrams that are already queued, e.g. late replies to an earlier request.
    pub fn drain(&self) -> Result<usize> {
        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        while self.wait_readable(Duration::ZERO)? {
            match self.socket.recv(&mut scratch) {
                Ok(_) => discarded += 1,
                // Asynchronous errors such as ICMP port unreachable are reported here.
                Err(err) if err.kind() == ErrorKind::ConnectionRefused => discarded += 1,
                Err(err) => return Err(Error::io("Draining UDP socket", err)),
            }
        }
        if discarded > 0 {
            log::debug!("Discarded {} stale datagrams", discarded);
        }
        Ok(discarded)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).context("Receiving datagram")
    }

    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(buf, addr)
            .context(format!("Sending datagram to {}", addr))?;
        Ok(())
    }

    /// Bytes of IP and UDP header preceding every payload on this socket.
    pub fn header_overhead(&self) -> Result<u32> {
        Ok(match self.local_addr()? {
            SocketAddr::V4(_) => IPV4_UDP_OVERHEAD,
            SocketAddr::V6(_) => IPV6_UDP_OVERHEAD,
        })
    }

    /// The path MTU the kernel knows for the connected peer, including IP and UDP headers.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn path_mtu(&self) -> Result<u32> {
        use nix::sys::socket::{getsockopt, sockopt::IpMtu};

        let mtu = match self.local_addr()? {
            SocketAddr::V4(_) => getsockopt(&self.socket, IpMtu)
                .map_err(|errno| Error::io("Querying path MTU", errno.into()))?,
            SocketAddr::V6(_) => self.ipv6_path_mtu()?,
        };
        Ok(mtu as u32)
    }

    // nix has no IPV6_MTU socket option.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn ipv6_path_mtu(&self) -> Result<i32> {
        use nix::libc;
        use std::os::fd::AsRawFd;

        let mut mtu: libc::c_int = 0;
        let mut len = size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: mtu and len are valid for writes and len holds the size of mtu.
        let rc = unsafe {
            libc::getsockopt(
                self.socket.as_raw_fd(),
                libc::IPPROTO_IPV6,
                libc::IPV6_MTU,
                (&mut mtu as *mut libc::c_int).cast(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(Error::io("Querying path MTU", io::Error::last_os_error()));
        }
        Ok(mtu)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn path_mtu(&self) -> Result<u32> {
        Err(Error::Config(
            "path MTU discovery is not supported on this platform; pass -m".to_string(),
        ))
    }

    /// Allows or forbids IP fragmentation of outgoing datagrams. When forbidden, datagrams
    /// larger than the path MTU fail with `EMSGSIZE` instead of being fragmented.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn set_fragmentation(&self, allow: bool) -> Result<()> {
        use nix::libc;
        use std::os::fd::AsRawFd;

        let (level, name, value) = match self.local_addr()? {
            SocketAddr::V4(_) => (
                libc::IPPROTO_IP,
                libc::IP_MTU_DISCOVER,
                if allow {
                    libc::IP_PMTUDISC_DONT
                } else {
                    libc::IP_PMTUDISC_DO
                },
            ),
            SocketAddr::V6(_) => (
                libc::IPPROTO_IPV6,
                libc::IPV6_MTU_DISCOVER,
                if allow {
                    libc::IPV6_PMTUDISC_DONT
                } else {
                    libc::IPV6_PMTUDISC_DO
                },
            ),
        };
        // SAFETY: value lives across the call and the length matches its type.
        let rc = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                level,
                name,
                (&value as *const libc::c_int).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(Error::io(
                "Configuring IP fragmentation",
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn set_fragmentation(&self, allow: bool) -> Result<()> {
        log::warn!("Cannot configure IP fragmentation (allow={}) on this platform", allow);
        Ok(())
    }
}
