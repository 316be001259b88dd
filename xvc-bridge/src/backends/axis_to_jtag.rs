//! # AXIS-to-JTAG target protocol
//!
//! The FIFO and UDP backends talk to the same kind of target: a JTAG engine fed by a byte
//! stream. Only the way bytes move differs, which is abstracted by [`Transport`];
//! [`AxisToJtag`] implements the protocol on top of it and is the [`Driver`] the server uses.
//!
//! Every message starts with one header word, little-endian. The 32-bit [`Header`] sits in
//! its first four bytes. A shift request carries TMS and TDI interleaved word by word, the
//! reply carries TDO padded to a whole word.
use std::fmt;

use xvc_protocol::vector_bytes;
use xvc_server::{Driver, Error, Result};

/// Most bits a single shift header can describe.
pub const MAX_SHIFT_BITS: u32 = 1 << 20;

const VERSION_SHIFT: u32 = 30;
const PROTOCOL_VERSION: u32 = 0;
const COMMAND_SHIFT: u32 = 28;
const COMMAND_MASK: u32 = 0x3;
const LEN_MASK: u32 = 0x000f_ffff;
const XID_SHIFT: u32 = 20;
const WORD_SIZE_MASK: u32 = 0xf;
const DEPTH_SHIFT: u32 = 4;
const DEPTH_MASK: u32 = 0xffff;
const PERIOD_SHIFT: u32 = 20;
const PERIOD_UNIT_NS: u32 = 4;

/// Error codes carried by error replies.
pub const ERR_BAD_LENGTH: u8 = 1;
pub const ERR_BAD_COMMAND: u8 = 2;
pub const ERR_TOO_LARGE: u8 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Query,
    Shift,
    Error,
}

/// The header word of every request and reply.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Header(pub u32);

impl Header {
    fn new(command: Command, fields: u32) -> Header {
        let command = match command {
            Command::Query => 0,
            Command::Shift => 1,
            Command::Error => 2,
        };
        Header((PROTOCOL_VERSION << VERSION_SHIFT) | (command << COMMAND_SHIFT) | fields)
    }

    pub fn query() -> Header {
        Header::new(Command::Query, 0)
    }

    /// Reply to a query. `period_ns` is rounded to the 4 ns resolution of the field.
    pub fn query_reply(word_size: usize, mem_depth: u16, period_ns: Option<u32>) -> Header {
        let period = period_ns.map_or(0, |p| (p / PERIOD_UNIT_NS).clamp(1, 0xff));
        Header::new(
            Command::Query,
            ((word_size as u32 - 1) & WORD_SIZE_MASK)
                | (u32::from(mem_depth) << DEPTH_SHIFT)
                | (period << PERIOD_SHIFT),
        )
    }

    /// Request or reply for a shift of `num_bits` (1..=[`MAX_SHIFT_BITS`]) bits.
    pub fn shift(num_bits: u32, xid: u8) -> Header {
        Header::new(
            Command::Shift,
            ((num_bits - 1) & LEN_MASK) | (u32::from(xid) << XID_SHIFT),
        )
    }

    pub fn error(code: u8) -> Header {
        Header::new(Command::Error, u32::from(code))
    }

    pub fn version(&self) -> u32 {
        self.0 >> VERSION_SHIFT
    }

    pub fn command(&self) -> Option<Command> {
        match (self.0 >> COMMAND_SHIFT) & COMMAND_MASK {
            0 => Some(Command::Query),
            1 => Some(Command::Shift),
            2 => Some(Command::Error),
            _ => None,
        }
    }

    pub fn word_size(&self) -> usize {
        ((self.0 & WORD_SIZE_MASK) + 1) as usize
    }

    /// Target memory depth in words, 0 for a streaming target.
    pub fn mem_depth(&self) -> u32 {
        (self.0 >> DEPTH_SHIFT) & DEPTH_MASK
    }

    pub fn period_ns(&self) -> Option<u32> {
        match (self.0 >> PERIOD_SHIFT) & 0xff {
            0 => None,
            units => Some(units * PERIOD_UNIT_NS),
        }
    }

    pub fn num_bits(&self) -> u32 {
        (self.0 & LEN_MASK) + 1
    }

    pub fn xid(&self) -> u8 {
        (self.0 >> XID_SHIFT) as u8
    }

    pub fn error_code(&self) -> u8 {
        self.0 as u8
    }

    /// Writes the header as one word of `word_size` bytes.
    pub fn write_word(&self, out: &mut Vec<u8>, word_size: usize) {
        out.extend_from_slice(&self.0.to_le_bytes());
        out.resize(out.len() + word_size - 4, 0);
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Header> {
        let word = bytes.first_chunk::<4>()?;
        Some(Header(u32::from_le_bytes(*word)))
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Header({:#010x}, {:?})", self.0, self.command())
    }
}

/// Packs TMS and TDI word-interleaved behind the header, padding the last word.
pub fn pack_vectors(out: &mut Vec<u8>, tms: &[u8], tdi: &[u8], word_size: usize) {
    for (tms, tdi) in tms.chunks(word_size).zip(tdi.chunks(word_size)) {
        out.extend_from_slice(tms);
        out.resize(out.len() + word_size - tms.len(), 0);
        out.extend_from_slice(tdi);
        out.resize(out.len() + word_size - tdi.len(), 0);
    }
}

/// Length of a shift request for `num_bytes` bytes per vector.
pub fn request_len(num_bytes: usize, word_size: usize) -> usize {
    word_size + 2 * num_bytes.div_ceil(word_size) * word_size
}

/// Moves raw protocol messages to and from a target.
pub trait Transport {
    /// Sends `tx` and receives the reply: the header word into `hdr` and at most
    /// `rx.len()` payload bytes into `rx`. Payload beyond `rx.len()` is discarded.
    ///
    /// Returns the number of payload bytes the target sent, which may be smaller or
    /// larger than `rx.len()`. A reply shorter than `hdr` is a protocol error.
    fn xfer(&mut self, tx: &[u8], hdr: &mut [u8], rx: &mut [u8]) -> Result<usize>;

    /// Largest vector, in bytes, the transport can carry for a target with `word_size`
    /// byte words. `None` means unbounded.
    fn max_vector_size(&self, word_size: usize) -> Option<u32>;

    /// Word size imposed by the transport itself, if any.
    fn word_size(&self) -> Option<usize> {
        None
    }

    /// Called when a new client connection begins, before the target is queried.
    /// Discards anything left over from an aborted exchange.
    fn new_connection(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`Driver`] speaking the AXIS-to-JTAG protocol over a [`Transport`].
#[derive(Debug)]
pub struct AxisToJtag<T> {
    transport: T,
    word_size: usize,
    mem_depth: u32,
    period_ns: Option<u32>,
    xid: u8,
    tx: Vec<u8>,
    hdr: Vec<u8>,
}

impl<T: Transport> AxisToJtag<T> {
    /// Queries the target once to learn its word size and checks it against the transport.
    pub fn new(transport: T) -> Result<AxisToJtag<T>> {
        let mut driver = AxisToJtag {
            transport,
            word_size: 4,
            mem_depth: 0,
            period_ns: None,
            xid: 0,
            tx: Vec::new(),
            hdr: Vec::new(),
        };
        driver.query_target()?;
        log::info!(
            "Target: word_size={}, mem_depth={}, period_ns={:?}, max_vector_size={}",
            driver.word_size,
            driver.mem_depth,
            driver.period_ns,
            driver.max_vector_size()
        );
        Ok(driver)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn word_size(&self) -> usize {
        self.word_size
    }

    fn query_target(&mut self) -> Result<()> {
        self.tx.clear();
        Header::query().write_word(&mut self.tx, 4);
        let mut hdr = [0u8; 4];
        self.transport.xfer(&self.tx, &mut hdr, &mut [])?;

        let reply = Header(u32::from_le_bytes(hdr));
        log::debug!("Query reply: {:?}", reply);
        match reply.command() {
            Some(Command::Query) if reply.version() == PROTOCOL_VERSION => {}
            Some(Command::Error) => {
                return Err(Error::Protocol(format!(
                    "target rejected query with error {}",
                    reply.error_code()
                )));
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected reply to query: {:?}",
                    reply
                )));
            }
        }
        if reply.word_size() < 4 {
            return Err(Error::Protocol(format!(
                "target word size {} is smaller than the header",
                reply.word_size()
            )));
        }
        if let Some(word_size) = self.transport.word_size()
            && word_size != reply.word_size()
        {
            return Err(Error::Config(format!(
                "transport word size {} does not match target word size {}",
                word_size,
                reply.word_size()
            )));
        }
        if self.transport.max_vector_size(reply.word_size()) == Some(0) {
            return Err(Error::Config(format!(
                "transport cannot carry a single {} byte word per vector",
                reply.word_size()
            )));
        }
        self.word_size = reply.word_size();
        self.mem_depth = reply.mem_depth();
        self.period_ns = reply.period_ns();
        self.hdr.resize(self.word_size, 0);
        Ok(())
    }
}

impl<T: Transport> Driver for AxisToJtag<T> {
    fn query(&mut self) -> Result<u32> {
        self.transport.new_connection()?;
        self.query_target()?;
        Ok(self.mem_depth * self.word_size as u32)
    }

    fn max_vector_size(&self) -> u32 {
        let limit = MAX_SHIFT_BITS / 8;
        self.transport
            .max_vector_size(self.word_size)
            .map_or(limit, |size| size.min(limit))
    }

    fn set_period_ns(&mut self, period_ns: u32) -> u32 {
        // The target runs TCK from its own fixed clock.
        let actual = self.period_ns.unwrap_or(period_ns);
        log::debug!("set_period_ns: requested={}, actual={}", period_ns, actual);
        actual
    }

    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> Result<()> {
        let num_bytes = vector_bytes(num_bits);
        if tms.len() != num_bytes || tdi.len() != num_bytes || tdo.len() != num_bytes {
            return Err(Error::Protocol(format!(
                "vectors of {}/{}/{} bytes do not carry {} bits",
                tms.len(),
                tdi.len(),
                tdo.len(),
                num_bits
            )));
        }
        if num_bits == 0 {
            return Ok(());
        }
        let max = self.max_vector_size();
        if num_bits > MAX_SHIFT_BITS || num_bytes > max as usize {
            return Err(Error::Protocol(format!(
                "vector of {} bytes exceeds the driver limit of {}",
                num_bytes, max
            )));
        }

        self.xid = self.xid.wrapping_add(1);
        let request = Header::shift(num_bits, self.xid);
        self.tx.clear();
        request.write_word(&mut self.tx, self.word_size);
        pack_vectors(&mut self.tx, tms, tdi, self.word_size);
        log::trace!("Sending {:?} with {} bytes", request, self.tx.len());

        let received = self.transport.xfer(&self.tx, &mut self.hdr, tdo)?;

        let reply = Header::from_bytes(&self.hdr)
            .ok_or_else(|| Error::Protocol("reply header is too short".to_string()))?;
        match reply.command() {
            Some(Command::Shift) if reply.xid() == self.xid => {}
            Some(Command::Error) => {
                return Err(Error::Protocol(format!(
                    "target rejected shift with error {}",
                    reply.error_code()
                )));
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected reply {:?} to {:?}",
                    reply, request
                )));
            }
        }
        if received < num_bytes {
            return Err(Error::Protocol(format!(
                "target returned {} of {} TDO bytes",
                received, num_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backends::emulator::JtagTarget;

    /// Transport that hands requests straight to a software target.
    struct Direct {
        target: JtagTarget,
        limit: Option<u32>,
        sent: usize,
    }

    impl Transport for Direct {
        fn xfer(&mut self, tx: &[u8], hdr: &mut [u8], rx: &mut [u8]) -> Result<usize> {
            self.sent += 1;
            let reply = self
                .target
                .handle(tx)
                .ok_or_else(|| Error::Timeout("waiting for the target".to_string()))?;
            if reply.len() < hdr.len() {
                return Err(Error::Protocol("short reply".to_string()));
            }
            let (head, payload) = reply.split_at(hdr.len());
            hdr.copy_from_slice(head);
            let n = payload.len().min(rx.len());
            rx[..n].copy_from_slice(&payload[..n]);
            Ok(payload.len())
        }

        fn max_vector_size(&self, _word_size: usize) -> Option<u32> {
            self.limit
        }
    }

    fn direct(target: JtagTarget, limit: Option<u32>) -> Result<AxisToJtag<Direct>> {
        AxisToJtag::new(Direct {
            target,
            limit,
            sent: 0,
        })
    }

    #[test]
    fn header_fields() {
        let header = Header::shift(33, 0x5a);
        assert_eq!(header.command(), Some(Command::Shift));
        assert_eq!(header.num_bits(), 33);
        assert_eq!(header.xid(), 0x5a);
        assert_eq!(header.version(), 0);

        let reply = Header::query_reply(8, 512, Some(40));
        assert_eq!(reply.command(), Some(Command::Query));
        assert_eq!(reply.word_size(), 8);
        assert_eq!(reply.mem_depth(), 512);
        assert_eq!(reply.period_ns(), Some(40));
        assert_eq!(Header::query_reply(4, 0, None).period_ns(), None);

        let error = Header::error(ERR_TOO_LARGE);
        assert_eq!(error.command(), Some(Command::Error));
        assert_eq!(error.error_code(), ERR_TOO_LARGE);
    }

    #[test]
    fn vectors_are_interleaved_by_word() {
        let mut out = Vec::new();
        pack_vectors(&mut out, &[1, 2, 3, 4, 5], &[6, 7, 8, 9, 10], 4);
        assert_eq!(
            out,
            [1, 2, 3, 4, 6, 7, 8, 9, 5, 0, 0, 0, 10, 0, 0, 0].to_vec()
        );
        assert_eq!(request_len(5, 4), 4 + out.len());
    }

    #[test]
    fn query_reports_target_memory() {
        let mut driver = direct(JtagTarget::new(4).with_mem_depth(256), None).unwrap();
        assert_eq!(driver.query().unwrap(), 1024);
        assert_eq!(driver.max_vector_size(), MAX_SHIFT_BITS / 8);
    }

    #[test]
    fn shift_loops_back_through_target() {
        let mut driver = direct(JtagTarget::new(8), Some(64)).unwrap();
        let tdi: Vec<u8> = (1..=13).collect();
        let mut tdo = vec![0; 13];
        driver.shift(100, &[0; 13], &tdi, &mut tdo).unwrap();
        assert_eq!(tdo, tdi);
    }

    #[test]
    fn period_is_fixed_by_target() {
        let mut driver = direct(JtagTarget::new(4).with_period_ns(Some(20)), None).unwrap();
        assert_eq!(driver.set_period_ns(100), 20);
        let mut driver = direct(JtagTarget::new(4), None).unwrap();
        assert_eq!(driver.set_period_ns(100), 100);
    }

    #[test]
    fn oversized_vector_is_rejected_before_sending() {
        let mut driver = direct(JtagTarget::new(4), Some(8)).unwrap();
        let sent = driver.transport().sent;
        let mut tdo = [0u8; 9];
        let result = driver.shift(72, &[0; 9], &[0; 9], &mut tdo);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(driver.transport().sent, sent);
    }

    #[test]
    fn target_error_reply_is_a_protocol_error() {
        let mut driver = direct(JtagTarget::new(4).with_mem_depth(1), None).unwrap();
        let mut tdo = [0u8; 8];
        let result = driver.shift(64, &[0; 8], &[0; 8], &mut tdo);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn transport_too_small_for_one_word_is_rejected() {
        let result = direct(JtagTarget::new(16), Some(0));
        assert!(matches!(result, Err(Error::Config(_))));

        let driver = direct(JtagTarget::new(4), Some(4)).unwrap();
        assert_eq!(driver.max_vector_size(), 4);
    }
}
