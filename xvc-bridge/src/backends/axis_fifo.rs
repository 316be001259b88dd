//! # AXI-Stream FIFO Backend
//!
//! For targets attached to an AXI-Stream FIFO in the programmable logic, exposed via the
//! Linux UIO subsystem. Requests are pushed word by word through the TX data port and
//! framed by the end-of-frame register; replies are read from the RX data port once the
//! FIFO reports a complete frame.
//!
//! ## Example Usage
//!
//! ```no_run
//! use xvc_bridge::backends::{
//!     axis_fifo::{AxisFifo, AxisFifoConfig},
//!     axis_to_jtag::AxisToJtag,
//!     mmap::{MAP_SIZE, MemMap},
//! };
//! use xvc_server::server::{Config, Server};
//!
//! let fifo = AxisFifo::new(MemMap::open("/dev/uio0", MAP_SIZE)?, AxisFifoConfig::default())?;
//! let mut server = Server::new(AxisToJtag::new(fifo)?, Config::default());
//! server.listen("127.0.0.1:2542")?;
//! # Ok::<(), xvc_server::Error>(())
//! ```
use std::{
    fs::File,
    io::{Read, Write},
    num::NonZeroU32,
    os::fd::AsFd,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, poll},
};
use xvc_server::{Error, IoContext, Result};

use super::{axis_to_jtag::Transport, mmap::RegisterAccess};

pub const ISR: usize = 0;
pub const IER: usize = 1;
pub const TDFR: usize = 2;
pub const TDFV: usize = 3;
pub const TDFD: usize = 4;
pub const TEOF: usize = 5;
pub const RDFR: usize = 6;
pub const RDFO: usize = 7;
pub const RDFD: usize = 8;
pub const RLR: usize = 9;
pub const CFG: usize = 10;

/// Written to `TDFR` and `RDFR` to reset the respective side.
pub const RESET_MAGIC: u32 = 0xA5;

pub const ISR_RX_RESET_DONE: u32 = 1 << 23;
pub const ISR_TX_RESET_DONE: u32 = 1 << 24;
pub const ISR_RX_COMPLETE: u32 = 1 << 26;

/// Width of the data ports in bytes.
const PORT_WIDTH: usize = 4;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct AxisFifoConfig {
    /// Deadline for every status wait.
    pub poll_timeout: Duration,
    /// Fail every `n`th transfer since the last query with a timeout.
    pub drop_every: Option<NonZeroU32>,
}

impl Default for AxisFifoConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            drop_every: None,
        }
    }
}

/// Interrupt line of a UIO device.
#[derive(Debug)]
pub struct UioInterrupt {
    file: File,
}

impl UioInterrupt {
    pub fn new(device: &File) -> Result<UioInterrupt> {
        let file = device.try_clone().context("Duplicating UIO handle")?;
        Ok(UioInterrupt { file })
    }

    /// Unmasks the interrupt and waits up to `timeout` for it. Returns `false` on expiry.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        self.file
            .write_all(&1u32.to_ne_bytes())
            .context("Unmasking UIO interrupt")?;
        let millis = u16::try_from(timeout.as_millis().max(1)).unwrap_or(u16::MAX);
        let ready = loop {
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, millis) {
                Ok(n) => break n > 0,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::io("Waiting for UIO interrupt", errno.into())),
            }
        };
        if ready {
            let mut count = [0u8; 4];
            self.file
                .read_exact(&mut count)
                .context("Reading UIO interrupt count")?;
        }
        Ok(ready)
    }
}

/// Transport through an AXI-Stream FIFO behind a register window.
#[derive(Debug)]
pub struct AxisFifo<R> {
    regs: R,
    depth: u32,
    poll_timeout: Duration,
    interrupt: Option<UioInterrupt>,
    drop_every: Option<NonZeroU32>,
    transfers: u32,
}

impl<R: RegisterAccess> AxisFifo<R> {
    /// Resets both FIFO sides and reads the FIFO geometry.
    pub fn new(regs: R, config: AxisFifoConfig) -> Result<AxisFifo<R>> {
        let mut fifo = AxisFifo {
            regs,
            depth: 0,
            poll_timeout: config.poll_timeout,
            interrupt: None,
            drop_every: config.drop_every,
            transfers: 0,
        };
        fifo.regs.write(ISR, u32::MAX);
        fifo.regs.write(TDFR, RESET_MAGIC);
        fifo.wait_for(ISR_TX_RESET_DONE, "TX reset")?;
        fifo.regs.write(RDFR, RESET_MAGIC);
        fifo.wait_for(ISR_RX_RESET_DONE, "RX reset")?;

        let cfg = fifo.regs.read(CFG);
        let word_size = (cfg & 0xff) as usize;
        let depth = cfg >> 8;
        log::debug!("FIFO config: word_size={}, depth={}", word_size, depth);
        if word_size != PORT_WIDTH {
            return Err(Error::Config(format!(
                "FIFO data port is {} bytes wide, only {} is supported",
                word_size, PORT_WIDTH
            )));
        }
        // Room for the header and one word each of TMS and TDI.
        if depth < 3 {
            return Err(Error::Config(format!(
                "FIFO depth of {} words is too small",
                depth
            )));
        }
        fifo.depth = depth;
        if let Some(n) = fifo.drop_every {
            log::warn!("Fault injection enabled: every {}th transfer times out", n);
        }
        Ok(fifo)
    }

    /// Waits for frames with the UIO interrupt instead of polling.
    pub fn with_interrupt(mut self, interrupt: UioInterrupt) -> Self {
        self.regs.write(IER, ISR_RX_COMPLETE);
        self.interrupt = Some(interrupt);
        self
    }

    /// FIFO depth in words.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Waits until any bit of `mask` is set in the status register, then clears it.
    fn wait_for(&mut self, mask: u32, what: &str) -> Result<()> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            if self.regs.read(ISR) & mask != 0 {
                self.regs.write(ISR, mask);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "waiting {:?} for {}",
                    self.poll_timeout, what
                )));
            }
            match &mut self.interrupt {
                Some(interrupt) => {
                    interrupt.wait(deadline - now)?;
                }
                None => std::hint::spin_loop(),
            }
        }
    }

    fn read_into(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(PORT_WIDTH) {
            let word = self.regs.read(RDFD).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn discard(&self, words: usize) {
        for _ in 0..words {
            self.regs.read(RDFD);
        }
    }
}

impl<R: RegisterAccess> Transport for AxisFifo<R> {
    fn xfer(&mut self, tx: &[u8], hdr: &mut [u8], rx: &mut [u8]) -> Result<usize> {
        self.transfers += 1;
        if let Some(n) = self.drop_every
            && self.transfers % n.get() == 0
        {
            return Err(Error::Timeout(format!(
                "on injected drop of transfer {}",
                self.transfers
            )));
        }

        let words = tx.len().div_ceil(PORT_WIDTH);
        let vacancy = self.regs.read(TDFV) as usize;
        if words > vacancy {
            return Err(Error::Protocol(format!(
                "request of {} words exceeds the TX vacancy of {}",
                words, vacancy
            )));
        }
        for chunk in tx.chunks(PORT_WIDTH) {
            let mut word = [0u8; PORT_WIDTH];
            word[..chunk.len()].copy_from_slice(chunk);
            self.regs.write(TDFD, u32::from_le_bytes(word));
        }
        let last = match tx.len() % PORT_WIDTH {
            0 => PORT_WIDTH,
            n => n,
        };
        self.regs.write(TEOF, last as u32);
        log::trace!("FIFO sent {} words", words);

        self.wait_for(ISR_RX_COMPLETE, "a reply frame")?;
        let frame_len = self.regs.read(RLR) as usize;
        let frame_words = frame_len.div_ceil(PORT_WIDTH);
        if frame_len < hdr.len() {
            self.discard(frame_words);
            return Err(Error::Protocol(format!(
                "reply of {} bytes is shorter than the {} byte header",
                frame_len,
                hdr.len()
            )));
        }
        self.read_into(hdr);
        let payload = frame_len - hdr.len();
        let keep = payload.min(rx.len());
        self.read_into(&mut rx[..keep]);
        let consumed = hdr.len().div_ceil(PORT_WIDTH) + keep.div_ceil(PORT_WIDTH);
        self.discard(frame_words.saturating_sub(consumed));
        log::trace!("FIFO received {} bytes", frame_len);
        Ok(payload)
    }

    fn max_vector_size(&self, word_size: usize) -> Option<u32> {
        // The whole request, header included, must fit the TX FIFO.
        let ws = word_size as u32;
        Some((self.depth * PORT_WIDTH as u32).saturating_sub(ws) / 2 / ws * ws)
    }

    fn word_size(&self) -> Option<usize> {
        Some(PORT_WIDTH)
    }

    fn new_connection(&mut self) -> Result<()> {
        self.transfers = 0;
        // A reply to a timed out request may still sit in the RX FIFO.
        self.regs.write(RDFR, RESET_MAGIC);
        self.wait_for(ISR_RX_RESET_DONE, "RX reset")?;
        self.regs.write(ISR, ISR_RX_COMPLETE);
        Ok(())
    }
}
