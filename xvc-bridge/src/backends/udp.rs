//! # UDP Backend
//!
//! For targets that receive AXIS-to-JTAG messages as UDP datagrams, e.g. firmware on a
//! network-attached FPGA. Every request and every reply must fit a single datagram, so
//! the largest vector follows from the MTU of the path to the target.
//!
//! ## Example Usage
//!
//! ```no_run
//! use xvc_bridge::backends::{axis_to_jtag::AxisToJtag, udp::{UdpConfig, UdpTransport}};
//! use xvc_server::server::{Config, Server};
//!
//! let transport = UdpTransport::connect("192.168.1.10:2542", &UdpConfig::default())?;
//! let mut server = Server::new(AxisToJtag::new(transport)?, Config::default());
//! server.listen("127.0.0.1:2542")?;
//! # Ok::<(), xvc_server::Error>(())
//! ```
use std::time::Duration;

use xvc_server::{Error, Result};

use super::{axis_to_jtag::Transport, datagram::Datagram};

pub const DEFAULT_PORT: u16 = 2542;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Ceiling for the datagram payload size. The discovered path MTU is used if unset.
    pub mtu: Option<u32>,
    /// Let the kernel fragment oversized datagrams instead of failing the send.
    pub allow_fragmentation: bool,
    /// How long to wait for each reply.
    pub timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            mtu: None,
            allow_fragmentation: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Splits `host[:port]`; IPv6 hosts are written in brackets.
pub fn parse_target(target: &str) -> Result<(String, u16)> {
    let invalid = || Error::Config(format!("invalid UDP target '{}'", target));
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
        match rest {
            "" => (host, None),
            _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match target.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            _ => (target, None),
        }
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Transport over a connected UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Datagram,
    mtu: u32,
    timeout: Duration,
}

impl UdpTransport {
    pub fn connect(target: &str, config: &UdpConfig) -> Result<UdpTransport> {
        let (host, port) = parse_target(target)?;
        let socket = Datagram::connect((host.as_str(), port)).map_err(|e| match e {
            Error::Io { source, .. } => {
                Error::Config(format!("cannot reach UDP target {}: {}", target, source))
            }
            other => other,
        })?;
        socket.set_fragmentation(config.allow_fragmentation)?;

        let discovered = socket
            .path_mtu()?
            .saturating_sub(socket.header_overhead()?);
        let mtu = match config.mtu {
            Some(mtu) => mtu.min(discovered),
            None => discovered,
        };
        log::info!(
            "UDP target {}: discovered payload MTU {}, using {}, fragmentation {}",
            socket.peer_addr()?,
            discovered,
            mtu,
            if config.allow_fragmentation {
                "allowed"
            } else {
                "forbidden"
            }
        );
        Ok(UdpTransport {
            socket,
            mtu,
            timeout: config.timeout,
        })
    }

    /// Largest datagram payload used.
    pub fn mtu(&self) -> u32 {
        self.mtu
    }
}

impl Transport for UdpTransport {
    fn xfer(&mut self, tx: &[u8], hdr: &mut [u8], rx: &mut [u8]) -> Result<usize> {
        if tx.len() > self.mtu as usize {
            return Err(Error::Protocol(format!(
                "request of {} bytes exceeds the MTU of {}",
                tx.len(),
                self.mtu
            )));
        }
        self.socket.drain()?;
        self.socket.send(tx)?;
        let received = self.socket.recv_split(hdr, rx, self.timeout)?;
        if received < hdr.len() {
            return Err(Error::Protocol(format!(
                "received {} bytes, expected a header of {}",
                received,
                hdr.len()
            )));
        }
        log::trace!("UDP exchange: sent {} bytes, received {}", tx.len(), received);
        Ok(received - hdr.len())
    }

    fn max_vector_size(&self, word_size: usize) -> Option<u32> {
        // Header plus TMS and TDI must fit one datagram.
        let ws = word_size as u32;
        Some(self.mtu.saturating_sub(ws) / 2 / ws * ws)
    }
}
