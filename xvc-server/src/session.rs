//! Per-connection XVC protocol state machine.
//!
//! A [`Session`] owns a receive buffer large enough for the largest shift the connection
//! accepts (header, TMS and TDI) and a transmit buffer for the largest TDO vector.
//! Commands are served strictly in arrival order. Every command already present in the
//! receive buffer is answered before the socket is read again, so clients that pipeline
//! several small commands into one segment are served without extra reads, and commands
//! split across several segments are reassembled.
use std::io::{self, ErrorKind, Read, Write};

use xvc_protocol::{Request, Version, XvcInfo, vector_bytes};

use crate::{Driver, Error, IoContext, Result, VectorLimits};

/// Slack added to the receive buffer on top of the two vectors of a maximal shift.
const RX_OVERHEAD: usize = Request::MAX_HEADER_LEN;
/// Slack added to the transmit buffer, enough for the GetInfo reply.
const TX_OVERHEAD: usize = 64;

/// Receive buffer with a read cursor.
///
/// Unconsumed bytes live in `buf[start..end]`. The cursor returns to the origin once the
/// buffer is fully drained.
#[derive(Debug)]
pub struct RxBuffer {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl RxBuffer {
    pub fn with_capacity(capacity: usize) -> RxBuffer {
        RxBuffer {
            buf: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Marks the first `n` unconsumed bytes as consumed.
    pub fn bump(&mut self, n: usize) {
        assert!(n <= self.len(), "bump past the received data");
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Makes room for `n` contiguous unconsumed bytes, moving the residue to the origin
    /// if it would not fit behind the cursor. Returns `false` if `n` exceeds the capacity.
    pub fn reserve(&mut self, n: usize) -> bool {
        if n > self.capacity() {
            return false;
        }
        if self.start + n > self.capacity() {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        true
    }

    /// Performs one read into the free space behind the received data.
    pub fn fill_from(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        let n = loop {
            match reader.read(&mut self.buf[self.end..]) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };
        self.end += n;
        Ok(n)
    }
}

/// Serves one client connection against a driver.
pub struct Session<'d, D: Driver + ?Sized, S> {
    driver: &'d mut D,
    stream: S,
    max_vector_len: u32,
    limits: VectorLimits,
    rx: RxBuffer,
    tx: Vec<u8>,
}

impl<'d, D: Driver + ?Sized, S: Read + Write> Session<'d, D, S> {
    /// Starts a session on `stream` that accepts vectors up to `max_vector_len` bytes.
    ///
    /// Queries the driver, which tells it that a new connection has begun.
    pub fn new(driver: &'d mut D, stream: S, max_vector_len: u32) -> Result<Self> {
        if max_vector_len == 0 {
            return Err(Error::Config(
                "the maximum vector length must not be zero".to_string(),
            ));
        }
        let target = driver.query()?;
        let limits = VectorLimits {
            connection: max_vector_len,
            driver: driver.max_vector_size(),
            target,
        };
        log::debug!(
            "Session limits: connection={}, driver={}, target={}, chunk={}",
            limits.connection,
            limits.driver,
            limits.target,
            limits.effective()
        );

        let max_vector_len_bytes = max_vector_len as usize;
        Ok(Session {
            driver,
            stream,
            max_vector_len,
            limits,
            rx: RxBuffer::with_capacity(2 * max_vector_len_bytes + RX_OVERHEAD),
            tx: Vec::with_capacity(max_vector_len_bytes + TX_OVERHEAD),
        })
    }

    pub fn limits(&self) -> VectorLimits {
        self.limits
    }

    /// Serves commands until the peer closes the connection or an error occurs.
    pub fn run(mut self) -> Result<()> {
        loop {
            if self.rx.is_empty() && self.read()? == 0 {
                log::debug!("Peer closed the connection");
                return Ok(());
            }
            self.process_command()?;
        }
    }

    fn read(&mut self) -> Result<usize> {
        match self.rx.fill_from(&mut self.stream) {
            Ok(n) => {
                log::trace!("Received {} bytes ({} buffered)", n, self.rx.len());
                Ok(n)
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(Error::Timeout("waiting for the client".to_string()))
            }
            Err(err) => Err(Error::io("Reading from client", err)),
        }
    }

    /// Reads until at least `n` unconsumed bytes are buffered.
    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.rx.len() < n {
            if !self.rx.reserve(n) {
                return Err(Error::Protocol(format!(
                    "request of {} bytes does not fit the receive buffer",
                    n
                )));
            }
            if self.read()? == 0 {
                return Err(Error::io(
                    "Reading from client",
                    io::Error::new(ErrorKind::UnexpectedEof, "connection closed mid-command"),
                ));
            }
        }
        Ok(())
    }

    fn process_command(&mut self) -> Result<()> {
        let request = loop {
            match Request::decode(self.rx.data(), self.max_vector_len as usize)? {
                Some(request) => break request,
                None => self.ensure(self.rx.len() + 1)?,
            }
        };
        self.ensure(request.wire_len())?;

        match request {
            Request::GetInfo => {
                log::debug!("Received GetInfo message");
                self.limits.target = self.driver.query()?;
                self.tx.clear();
                XvcInfo::new(Version::V1_0, self.max_vector_len).write_to(&mut self.tx)?;
            }
            Request::SetTck { period_ns } => {
                log::debug!("Received SetTck message: period_ns={}", period_ns);
                let actual = self.driver.set_period_ns(period_ns);
                log::debug!("Set TCK returned: period_ns={}", actual);
                self.tx.clear();
                self.tx.extend_from_slice(&actual.to_le_bytes());
            }
            Request::Shift { num_bits } => {
                log::debug!("Received Shift message: num_bits={}", num_bits);
                self.shift(num_bits, request.header_len())?;
            }
        }
        self.rx.bump(request.wire_len());

        self.stream
            .write_all(&self.tx)
            .and_then(|_| self.stream.flush())
            .context("Writing response")?;
        Ok(())
    }

    /// Forwards a buffered shift to the driver chunk by chunk and assembles TDO in `tx`.
    fn shift(&mut self, num_bits: u32, header_len: usize) -> Result<()> {
        let num_bytes = vector_bytes(num_bits);
        let chunk = self.limits.effective() as usize;
        let payload = &self.rx.data()[header_len..header_len + 2 * num_bytes];
        let (tms, tdi) = payload.split_at(num_bytes);
        log::trace!("Shift TMS data: {:02x?}", tms);
        log::trace!("Shift TDI data: {:02x?}", tdi);

        self.tx.clear();
        self.tx.resize(num_bytes, 0);

        let mut bits_left = num_bits;
        for ((tms, tdi), tdo) in tms
            .chunks(chunk)
            .zip(tdi.chunks(chunk))
            .zip(self.tx.chunks_mut(chunk))
        {
            let bits = bits_left.min(8 * tms.len() as u32);
            self.driver.shift(bits, tms, tdi, tdo)?;
            bits_left -= bits;
        }

        log::trace!("Shift result TDO data: {:02x?}", &self.tx[..]);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    use xvc_protocol::Message;

    use super::{RxBuffer, Session};
    use crate::loopback::LoopbackDriver;
    use crate::{Driver, Error, Result};

    /// A stream that hands out pre-arranged segments, one per read.
    #[derive(Default)]
    struct ScriptedStream {
        segments: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        reads: usize,
    }

    impl ScriptedStream {
        fn new(segments: Vec<Vec<u8>>) -> Self {
            ScriptedStream {
                segments: segments.into(),
                ..Default::default()
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            let Some(mut segment) = self.segments.pop_front() else {
                return Ok(0);
            };
            let n = segment.len().min(buf.len());
            buf[..n].copy_from_slice(&segment[..n]);
            if n < segment.len() {
                self.segments.push_front(segment.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn encode(messages: &[Message]) -> Vec<u8> {
        let mut out = Vec::new();
        for message in messages {
            message.write_to(&mut out).unwrap();
        }
        out
    }

    fn shift(tms: &[u8], tdi: &[u8]) -> Message {
        Message::Shift {
            num_bits: 8 * tdi.len() as u32,
            tms: tms.into(),
            tdi: tdi.into(),
        }
    }

    fn run(driver: &mut impl Driver, segments: Vec<Vec<u8>>, max: u32) -> (Result<()>, Vec<u8>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut stream = ScriptedStream::new(segments);
        let result = Session::new(driver, &mut stream, max).and_then(Session::run);
        (result, stream.written)
    }

    #[test]
    fn bump_resets_cursor_when_drained() {
        let mut rx = RxBuffer::with_capacity(8);
        let mut source: &[u8] = b"abcdef";
        assert_eq!(rx.fill_from(&mut source).unwrap(), 6);
        rx.bump(2);
        assert_eq!(rx.data(), b"cdef");
        rx.bump(4);
        assert!(rx.is_empty());
        let mut source: &[u8] = b"12345678";
        assert_eq!(rx.fill_from(&mut source).unwrap(), 8);
        assert_eq!(rx.data(), b"12345678");
    }

    #[test]
    fn reserve_compacts_residue() {
        let mut rx = RxBuffer::with_capacity(8);
        let mut source: &[u8] = b"abcdef";
        rx.fill_from(&mut source).unwrap();
        rx.bump(5);
        assert!(rx.reserve(4));
        assert_eq!(rx.data(), b"f");
        let mut source: &[u8] = b"ghi";
        rx.fill_from(&mut source).unwrap();
        assert_eq!(rx.data(), b"fghi");
        assert!(!rx.reserve(9));
    }

    #[test]
    fn getinfo_reports_connection_ceiling() {
        let mut driver = LoopbackDriver::new();
        let (result, written) = run(&mut driver, vec![encode(&[Message::GetInfo])], 32768);
        result.unwrap();
        assert_eq!(written, b"xvcServer_v1.0:32768\n");
    }

    #[test]
    fn commands_in_one_segment_are_all_served() {
        let mut driver = LoopbackDriver::new().with_period_step_ns(40);
        let data = encode(&[
            Message::GetInfo,
            Message::SetTck { period_ns: 100 },
            shift(&[0x03, 0x00], &[0xAA, 0x55]),
            Message::GetInfo,
        ]);
        let (result, written) = run(&mut driver, vec![data], 64);
        result.unwrap();

        let mut expected = b"xvcServer_v1.0:64\n".to_vec();
        expected.extend_from_slice(&120u32.to_le_bytes());
        expected.extend_from_slice(&[0xAA, 0x55]);
        expected.extend_from_slice(b"xvcServer_v1.0:64\n");
        assert_eq!(written, expected);
    }

    #[test]
    fn command_split_across_reads() {
        let mut driver = LoopbackDriver::new();
        let data = encode(&[shift(&[0; 6], &[1, 2, 3, 4, 5, 6]), Message::GetInfo]);
        let segments = data.iter().map(|b| vec![*b]).collect();
        let (result, written) = run(&mut driver, segments, 16);
        result.unwrap();

        let mut expected = vec![1, 2, 3, 4, 5, 6];
        expected.extend_from_slice(b"xvcServer_v1.0:16\n");
        assert_eq!(written, expected);
    }

    #[test]
    fn residue_before_maximal_shift_is_compacted() {
        let mut driver = LoopbackDriver::new();
        let max = 8;
        let tdi: Vec<u8> = (1..=8).collect();
        let mut first = encode(&[Message::GetInfo]);
        let second = encode(&[shift(&[0; 8], &tdi)]);
        // GetInfo plus the start of the shift header arrive together.
        first.extend_from_slice(&second[..4]);
        let (result, written) = run(&mut driver, vec![first, second[4..].to_vec()], max);
        result.unwrap();
        assert_eq!(&written[written.len() - 8..], &tdi[..]);
    }

    #[test]
    fn limits_combine_connection_driver_and_target() {
        let mut driver = LoopbackDriver::new()
            .with_max_vector_size(1400)
            .with_target_vector_size(96);
        let session = Session::new(&mut driver, ScriptedStream::default(), 32768).unwrap();
        let limits = session.limits();
        assert_eq!(
            (limits.connection, limits.driver, limits.target),
            (32768, 1400, 96)
        );
        assert_eq!(limits.effective(), 96);
    }

    #[test]
    fn shift_is_chunked_to_driver_limit() {
        let mut driver = LoopbackDriver::new().with_max_vector_size(3);
        let tdi: Vec<u8> = (0..10).collect();
        let message = Message::Shift {
            num_bits: 75,
            tms: vec![0; 10].into(),
            tdi: tdi.clone().into(),
        };
        let (result, written) = run(&mut driver, vec![encode(&[message])], 32);
        result.unwrap();
        assert_eq!(written, tdi);
    }

    #[test]
    fn oversized_shift_is_rejected_without_reply() {
        let mut driver = LoopbackDriver::new();
        let message = shift(&[0; 17], &[0; 17]);
        let (result, written) = run(&mut driver, vec![encode(&[message])], 16);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(written.is_empty());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut driver = LoopbackDriver::new();
        let (result, written) = run(&mut driver, vec![b"xyzzy".to_vec()], 16);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(written.is_empty());
    }

    #[test]
    fn eof_mid_command_is_a_disconnect() {
        let mut driver = LoopbackDriver::new();
        let data = encode(&[shift(&[0; 4], &[0; 4])]);
        let (result, _) = run(&mut driver, vec![data[..12].to_vec()], 16);
        assert!(result.unwrap_err().is_disconnect());
    }

    #[test]
    fn zero_length_shift_replies_nothing() {
        let mut driver = LoopbackDriver::new();
        let message = Message::Shift {
            num_bits: 0,
            tms: Box::default(),
            tdi: Box::default(),
        };
        let data = encode(&[message, Message::GetInfo]);
        let (result, written) = run(&mut driver, vec![data], 16);
        result.unwrap();
        assert_eq!(written, b"xvcServer_v1.0:16\n");
    }

    #[test]
    fn zero_maximum_is_a_configuration_error() {
        let mut driver = LoopbackDriver::new();
        let (result, _) = run(&mut driver, vec![], 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
