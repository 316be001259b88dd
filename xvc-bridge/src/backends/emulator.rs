//! # Target emulation
//!
//! [`JtagTarget`] is a software model of an AXIS-to-JTAG target whose JTAG chain is a
//! plain wire: TDO equals TDI. [`UdpTargetEmulator`] serves it on a datagram socket and
//! answers exactly like firmware would, so the UDP driver can be exercised end to end
//! without hardware.
use std::{
    net::{SocketAddr, ToSocketAddrs},
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use xvc_protocol::vector_bytes;
use xvc_server::Result;

use super::{
    axis_to_jtag::{
        Command, ERR_BAD_COMMAND, ERR_BAD_LENGTH, ERR_TOO_LARGE, Header, request_len,
    },
    datagram::Datagram,
};

/// Largest datagram the emulator accepts.
const MAX_DATAGRAM: usize = 65536;

/// Software model of a loopback AXIS-to-JTAG target.
#[derive(Debug, Clone)]
pub struct JtagTarget {
    word_size: usize,
    mem_depth: u16,
    period_ns: Option<u32>,
    drop_every: Option<NonZeroU32>,
    shifts: u32,
}

impl JtagTarget {
    /// A streaming target with `word_size` byte words (4..=16).
    pub fn new(word_size: usize) -> JtagTarget {
        assert!((4..=16).contains(&word_size), "unsupported word size");
        JtagTarget {
            word_size,
            mem_depth: 0,
            period_ns: None,
            drop_every: None,
            shifts: 0,
        }
    }

    /// Limit vectors to `words` target words; 0 means streaming.
    pub fn with_mem_depth(mut self, words: u16) -> Self {
        self.mem_depth = words;
        self
    }

    pub fn with_period_ns(mut self, period_ns: Option<u32>) -> Self {
        self.period_ns = period_ns;
        self
    }

    /// Silently drop every `n`th shift request since the last query.
    pub fn with_drop_every(mut self, n: Option<NonZeroU32>) -> Self {
        self.drop_every = n;
        self
    }

    pub fn word_size(&self) -> usize {
        self.word_size
    }

    fn error_reply(&self, code: u8) -> Vec<u8> {
        log::debug!("Target replies with error {}", code);
        let mut reply = Vec::with_capacity(self.word_size);
        Header::error(code).write_word(&mut reply, self.word_size);
        reply
    }

    /// Processes one request and returns the reply, or `None` if the request is dropped.
    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let Some(header) = Header::from_bytes(request) else {
            return Some(self.error_reply(ERR_BAD_LENGTH));
        };
        log::trace!("Target received {:?} with {} bytes", header, request.len());
        match header.command() {
            Some(Command::Query) => {
                self.shifts = 0;
                let reply = Header::query_reply(self.word_size, self.mem_depth, self.period_ns);
                Some(reply.0.to_le_bytes().to_vec())
            }
            Some(Command::Shift) => {
                self.shifts += 1;
                if let Some(n) = self.drop_every
                    && self.shifts % n.get() == 0
                {
                    log::debug!("Target drops shift request {}", self.shifts);
                    return None;
                }
                let num_bytes = vector_bytes(header.num_bits());
                if request.len() != request_len(num_bytes, self.word_size) {
                    return Some(self.error_reply(ERR_BAD_LENGTH));
                }
                if self.mem_depth != 0 && num_bytes > usize::from(self.mem_depth) * self.word_size
                {
                    return Some(self.error_reply(ERR_TOO_LARGE));
                }

                let ws = self.word_size;
                let mut reply = Vec::with_capacity(ws + num_bytes.div_ceil(ws) * ws);
                header.write_word(&mut reply, ws);
                for pair in request[ws..].chunks(2 * ws) {
                    reply.extend_from_slice(&pair[ws..]);
                }
                Some(reply)
            }
            _ => Some(self.error_reply(ERR_BAD_COMMAND)),
        }
    }
}

/// Serves a [`JtagTarget`] on a UDP socket.
pub struct UdpTargetEmulator {
    socket: Datagram,
    target: JtagTarget,
    received: Arc<AtomicUsize>,
}

impl UdpTargetEmulator {
    pub fn bind(addr: impl ToSocketAddrs, target: JtagTarget) -> Result<UdpTargetEmulator> {
        let socket = Datagram::bind(addr)?;
        log::info!("UDP target emulator listening on {}", socket.local_addr()?);
        Ok(UdpTargetEmulator {
            socket,
            target,
            received: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Counter of datagrams received so far.
    pub fn received(&self) -> Arc<AtomicUsize> {
        self.received.clone()
    }

    /// Answers one request.
    pub fn serve_one(&mut self, buf: &mut [u8]) -> Result<()> {
        let (n, peer) = self.socket.recv_from(buf)?;
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Some(reply) = self.target.handle(&buf[..n]) {
            self.socket.send_to(&reply, peer)?;
        }
        Ok(())
    }

    pub fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            if let Err(e) = self.serve_one(&mut buf) {
                log::error!("UDP target emulator: {}", e);
            }
        }
    }

    /// Runs the emulator on its own thread.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        thread::spawn(move || self.run())
    }
}
